use std::sync::Arc;

use cmt_types::Transaction;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::pipeline::IngestPipeline;

/// Running totals of an ingest worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub transactions: usize,
    /// Transactions rejected by the pipeline.
    pub rejected: usize,
    pub rows_inserted: usize,
}

/// Sending side of an ingest worker's queue.
#[derive(Clone, Debug)]
pub struct IngestHandle {
    sender: mpsc::Sender<Transaction>,
}

impl IngestHandle {
    /// Queue a transaction, waiting while the queue is full.
    pub async fn submit(&self, tx: Transaction) -> IngestResult<()> {
        self.sender.send(tx).await.map_err(|_| IngestError::WorkerStopped)
    }
}

/// Drains a bounded queue of transactions into a pipeline, one at a time and
/// in arrival order.
///
/// The worker stops once every [`IngestHandle`] is dropped and the queue is
/// empty; the join handle then yields its totals.
pub struct IngestWorker;

impl IngestWorker {
    pub fn spawn(pipeline: Arc<IngestPipeline>, capacity: usize) -> (IngestHandle, JoinHandle<IngestStats>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(pipeline, receiver));
        (IngestHandle { sender }, task)
    }
}

async fn run(pipeline: Arc<IngestPipeline>, mut receiver: mpsc::Receiver<Transaction>) -> IngestStats {
    info!("ingest worker started");
    let mut stats = IngestStats::default();
    while let Some(tx) = receiver.recv().await {
        stats.transactions += 1;
        match pipeline.ingest_transaction(&tx, None) {
            Ok(report) => stats.rows_inserted += report.rows_inserted,
            Err(e) => {
                stats.rejected += 1;
                warn!(signature = %tx.signature, slot = tx.slot, error = %e, "transaction rejected");
            }
        }
    }
    info!(transactions = stats.transactions, rejected = stats.rejected, "ingest worker stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeLogEvent, EventSchema};
    use crate::pipeline::ProgramIds;
    use cmt_crypto::AuthenticatedTree;
    use cmt_store::{InMemoryNodeStore, NodeStore};
    use cmt_types::{AccountId, Digest};

    fn tx_for(tree: &mut AuthenticatedTree, seq: u64, balanced: bool) -> Transaction {
        let programs = ProgramIds::default();
        let program = programs.tree_program.to_hex();
        tree.update(seq as u32, Digest::from_hash([seq as u8 + 1; 32])).unwrap();
        let (root, path, index) = tree.change_log(seq as u32).unwrap();
        let event = ChangeLogEvent::from_path(AccountId::new([2; 32]), seq, index, root, &path);
        let mut log_messages = vec![
            format!("Program {program} invoke [1]"),
            event.to_log_line().unwrap(),
        ];
        if balanced {
            log_messages.push(format!("Program {program} success"));
        }
        Transaction {
            signature: format!("sig-{seq}"),
            slot: 100 + seq,
            error: None,
            account_keys: vec![programs.tree_program],
            log_messages,
            instructions: vec![],
            inner_instructions: vec![],
        }
    }

    #[tokio::test]
    async fn drains_queue_and_survives_bad_transactions() {
        let store = Arc::new(InMemoryNodeStore::new());
        let pipeline = Arc::new(IngestPipeline::new(store.clone(), ProgramIds::default()));
        let (handle, task) = IngestWorker::spawn(pipeline, 4);

        let mut tree = AuthenticatedTree::empty(3).unwrap();
        handle.submit(tx_for(&mut tree, 0, true)).await.unwrap();
        handle.submit(tx_for(&mut tree, 1, false)).await.unwrap();
        handle.submit(tx_for(&mut tree, 2, true)).await.unwrap();
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.transactions, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.rows_inserted, 8);
        assert_eq!(store.row_count().unwrap(), 8);
    }
}
