use std::sync::Arc;

use cmt_ingest::{IngestError, IngestPipeline};
use cmt_store::GapRecord;
use cmt_types::{AccountId, Transaction};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::source::ChainDataSource;

/// Totals for one or more repaired gaps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub gaps: usize,
    pub slots_scanned: usize,
    pub transactions: usize,
    pub rows_inserted: usize,
}

impl BackfillReport {
    fn absorb(&mut self, other: BackfillReport) {
        self.gaps += other.gaps;
        self.slots_scanned += other.slots_scanned;
        self.transactions += other.transactions;
        self.rows_inserted += other.rows_inserted;
    }
}

/// Replays historical blocks through the ingestion pipeline to close gaps.
///
/// Gaps are repaired concurrently. Within one gap, slots are replayed in
/// increasing order and only sequences inside the gap's window are written,
/// so overlapping or repeated repairs are harmless.
#[derive(Clone)]
pub struct Backfiller {
    source: Arc<dyn ChainDataSource>,
    pipeline: Arc<IngestPipeline>,
}

impl Backfiller {
    pub fn new(source: Arc<dyn ChainDataSource>, pipeline: Arc<IngestPipeline>) -> Self {
        Self { source, pipeline }
    }

    /// Replay every slot in `[gap.prev_slot, gap.curr_slot]` for `tree`.
    ///
    /// A pruned slot makes the gap [`SyncError::GapUnrecoverable`].
    pub async fn repair_gap(&self, tree: AccountId, gap: GapRecord) -> SyncResult<BackfillReport> {
        let window = gap.replay_window();
        let mut report = BackfillReport {
            gaps: 1,
            ..Default::default()
        };
        debug!(
            tree = %tree,
            from_slot = gap.prev_slot,
            to_slot = gap.curr_slot,
            start_seq = window.start,
            end_seq = window.end,
            "repairing gap"
        );

        for slot in gap.prev_slot..=gap.curr_slot {
            let block = match self.source.block(slot).await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(SyncError::SlotUnavailable { slot }) => {
                    return Err(SyncError::GapUnrecoverable { tree, slot });
                }
                Err(e) => return Err(e),
            };
            report.slots_scanned += 1;

            for tx in block.transactions.iter().filter(|tx| self.is_relevant(tx, &tree)) {
                match self.pipeline.ingest_transaction(tx, Some(window)) {
                    Ok(ingested) => {
                        report.transactions += 1;
                        report.rows_inserted += ingested.rows_inserted;
                    }
                    Err(IngestError::Store(e)) => return Err(e.into()),
                    Err(e) => {
                        warn!(tree = %tree, signature = %tx.signature, slot, error = %e, "skipping transaction during backfill");
                    }
                }
            }
        }

        info!(
            tree = %tree,
            start_seq = window.start,
            end_seq = window.end,
            rows = report.rows_inserted,
            "gap repaired"
        );
        Ok(report)
    }

    /// Repair every gap concurrently. Each gap's outcome is reported
    /// separately; one failing does not stop the others.
    pub async fn repair_all(&self, tree: AccountId, gaps: Vec<GapRecord>) -> Vec<(GapRecord, SyncResult<BackfillReport>)> {
        let mut tasks = JoinSet::new();
        for gap in gaps {
            let backfiller = self.clone();
            tasks.spawn(async move {
                let result = backfiller.repair_gap(tree, gap).await;
                (gap, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(tree = %tree, error = %e, "backfill task panicked or was cancelled"),
            }
        }
        outcomes.sort_by_key(|(gap, _)| gap.prev_seq);
        outcomes
    }

    /// Repair every gap and fold the results, failing with the first error.
    pub async fn repair(&self, tree: AccountId, gaps: Vec<GapRecord>) -> SyncResult<BackfillReport> {
        let mut total = BackfillReport::default();
        let mut first_error = None;
        for (_, result) in self.repair_all(tree, gaps).await {
            match result {
                Ok(report) => total.absorb(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    fn is_relevant(&self, tx: &Transaction, tree: &AccountId) -> bool {
        let programs = self.pipeline.programs();
        tx.is_success()
            && tx.touches(tree)
            && (tx.touches(&programs.tree_program) || tx.touches(&programs.asset_program))
    }
}

impl std::fmt::Debug for Backfiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backfiller")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::GapDetector;
    use crate::testing::SimLedger;
    use cmt_store::{InMemoryNodeStore, NodeStore, ProofGenerator};

    fn setup(ledger: &SimLedger) -> (Arc<IngestPipeline>, Backfiller) {
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::new(InMemoryNodeStore::new()),
            ledger.programs.clone(),
        ));
        let backfiller = Backfiller::new(ledger.chain.clone(), pipeline.clone());
        (pipeline, backfiller)
    }

    #[tokio::test]
    async fn closes_internal_and_forward_gaps() {
        let mut ledger = SimLedger::new(3, 8);
        for _ in 0..5 {
            ledger.mint();
        }
        let (pipeline, backfiller) = setup(&ledger);
        for i in [0, 1, 3] {
            pipeline.ingest_transaction(&ledger.transactions[i], None).unwrap();
        }
        let store = pipeline.store();
        let gaps = GapDetector::detect(&**store, &ledger.tree_id, &ledger.account, ledger.slot()).unwrap();
        assert_eq!(gaps.len(), 2);

        let report = backfiller.repair(ledger.tree_id, gaps).await.unwrap();
        assert_eq!(report.gaps, 2);
        assert_eq!(report.rows_inserted, 3 * 4);

        let gaps = GapDetector::detect(&**store, &ledger.tree_id, &ledger.account, ledger.slot()).unwrap();
        assert!(gaps.is_empty());
        assert_eq!(
            ProofGenerator::current_digest(&**store, &ledger.tree_id, 3, 1).unwrap(),
            ledger.tree.root()
        );
    }

    #[tokio::test]
    async fn repeated_repair_writes_nothing_new() {
        let mut ledger = SimLedger::new(3, 8);
        ledger.mint();
        ledger.mint();
        let (pipeline, backfiller) = setup(&ledger);
        let gaps = GapDetector::detect(&**pipeline.store(), &ledger.tree_id, &ledger.account, ledger.slot()).unwrap();

        let first = backfiller.repair(ledger.tree_id, gaps.clone()).await.unwrap();
        assert_eq!(first.transactions, 3);
        let rows = pipeline.store().row_count().unwrap();
        let second = backfiller.repair(ledger.tree_id, gaps).await.unwrap();
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(pipeline.store().row_count().unwrap(), rows);
    }

    #[tokio::test]
    async fn pruned_history_is_unrecoverable() {
        let mut ledger = SimLedger::new(3, 8);
        ledger.mint();
        ledger.mint();
        let (pipeline, backfiller) = setup(&ledger);
        ledger.chain.prune_before(ledger.slot());
        let gaps = GapDetector::detect(&**pipeline.store(), &ledger.tree_id, &ledger.account, ledger.slot()).unwrap();

        let err = backfiller.repair(ledger.tree_id, gaps).await.unwrap_err();
        assert!(matches!(err, SyncError::GapUnrecoverable { tree, .. } if tree == ledger.tree_id));
    }

    #[tokio::test]
    async fn other_trees_and_failed_transactions_are_filtered() {
        let mut ledger = SimLedger::new(3, 8);
        ledger.mint();
        let (pipeline, backfiller) = setup(&ledger);
        let other = AccountId::new([0x99; 32]);
        let gap = GapRecord {
            prev_seq: 0,
            curr_seq: 2,
            prev_slot: 0,
            curr_slot: ledger.slot(),
            kind: cmt_store::GapKind::Leading,
        };
        let report = backfiller.repair_gap(other, gap).await.unwrap();
        assert_eq!(report.transactions, 0);
        assert_eq!(pipeline.store().row_count().unwrap(), 0);

        let mut failed = ledger.transactions[1].clone();
        failed.error = Some("boom".into());
        assert!(!backfiller.is_relevant(&failed, &ledger.tree_id));
        assert!(backfiller.is_relevant(&ledger.transactions[1], &ledger.tree_id));
    }
}
