use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cmt_account::TreeAccount;
use cmt_ingest::IngestPipeline;
use cmt_store::{NodeRow, NodeStore, TreeRecord, WriteBatch};
use cmt_types::{AccountId, Seq, Slot};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backfill::{BackfillReport, Backfiller};
use crate::config::SyncConfig;
use crate::detector::GapDetector;
use crate::error::{SyncError, SyncResult};
use crate::source::ChainDataSource;
use crate::validator::{TreeValidator, ValidationReport};

/// Where a tracked tree stands after its latest poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TreeStatus {
    /// Not polled yet.
    Unknown,
    Consistent,
    Repairing,
    Inconsistent { reason: String },
}

/// What one poll of one tree did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub ledger_seq: Seq,
    pub slot: Slot,
    /// Rows written from the account's change-log buffer on cold start.
    pub seeded: usize,
    pub gaps: usize,
    pub backfill: BackfillReport,
    pub validation_attempts: u32,
}

/// Keeps each tracked tree's stored history in step with the ledger.
///
/// One poll per tree: snapshot the account, seed an empty store, detect
/// gaps, replay them, then validate the result. Trees are polled
/// concurrently and a failure in one never stops the others; it leaves that
/// tree [`TreeStatus::Inconsistent`] until a later poll succeeds.
pub struct Reconciler {
    source: Arc<dyn ChainDataSource>,
    pipeline: Arc<IngestPipeline>,
    backfiller: Backfiller,
    config: SyncConfig,
    status: RwLock<HashMap<AccountId, TreeStatus>>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn ChainDataSource>, pipeline: Arc<IngestPipeline>, config: SyncConfig) -> Self {
        let backfiller = Backfiller::new(source.clone(), pipeline.clone());
        let status = config.trees.iter().map(|tree| (*tree, TreeStatus::Unknown)).collect();
        Self {
            source,
            pipeline,
            backfiller,
            config,
            status: RwLock::new(status),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    /// Status of a tracked tree; `None` for trees this reconciler does not
    /// track.
    pub fn status(&self, tree: &AccountId) -> Option<TreeStatus> {
        self.status.read().expect("lock poisoned").get(tree).cloned()
    }

    pub fn statuses(&self) -> Vec<(AccountId, TreeStatus)> {
        let mut all: Vec<_> = self
            .status
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(tree, status)| (*tree, status.clone()))
            .collect();
        all.sort_by_key(|(tree, _)| *tree);
        all
    }

    fn set_status(&self, tree: AccountId, status: TreeStatus) {
        self.status.write().expect("lock poisoned").insert(tree, status);
    }

    /// Reconcile one tree and record the resulting status.
    pub async fn poll_tree(&self, tree: AccountId) -> SyncResult<PollOutcome> {
        let result = self.reconcile(tree).await;
        match &result {
            Ok(outcome) => {
                debug!(tree = %tree, seq = outcome.ledger_seq, gaps = outcome.gaps, "tree consistent");
                self.set_status(tree, TreeStatus::Consistent);
            }
            Err(e) => {
                error!(tree = %tree, error = %e, "reconciliation failed");
                self.set_status(
                    tree,
                    TreeStatus::Inconsistent {
                        reason: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn reconcile(&self, tree: AccountId) -> SyncResult<PollOutcome> {
        // Account first: the slot read after it bounds every seq it holds.
        let bytes = self.source.account_bytes(&tree).await?;
        let slot = self.source.current_slot().await?;
        let account = TreeAccount::decode(&bytes)?;
        let store = self.pipeline.store();

        let mut outcome = PollOutcome {
            ledger_seq: account.sequence_number(),
            slot,
            ..Default::default()
        };

        self.register(&**store, &tree, &account)?;
        let cold = store.sequences(&tree)?.is_empty();
        // On a cold store this is one leading gap over the whole history,
        // so seeded seqs are replayed too and their leaf events recorded.
        let gaps = GapDetector::detect(&**store, &tree, &account, slot)?;
        if cold && self.config.seed_from_account {
            outcome.seeded = seed_from_account(&**store, &tree, &account, slot)?;
        }

        outcome.gaps = gaps.len();
        if !gaps.is_empty() {
            self.set_status(tree, TreeStatus::Repairing);
            info!(tree = %tree, gaps = gaps.len(), ledger_seq = outcome.ledger_seq, "repairing");
            outcome.backfill = self.backfiller.repair(tree, gaps).await?;

            let remaining = GapDetector::detect(&**store, &tree, &account, slot)?;
            if let Some(first) = remaining.first() {
                warn!(tree = %tree, gaps = remaining.len(), "gaps remain after repair");
                return Err(SyncError::GapsRemain {
                    tree,
                    gaps: remaining.len(),
                    first_missing: first.replay_window().start,
                });
            }
        }

        let (report, attempts) = self.validate_with_retries(&tree).await?;
        outcome.validation_attempts = attempts;
        if !report.is_consistent() {
            for mismatch in &report.mismatches {
                error!(
                    tree = %tree,
                    node_index = mismatch.node_index,
                    level = mismatch.level,
                    stored = %mismatch.stored,
                    recomputed = %mismatch.recomputed,
                    "stored node disagrees with recomputed node"
                );
            }
            return Err(report.to_error());
        }
        Ok(outcome)
    }

    /// Record the account's full shape unless the store already has it.
    fn register<S: NodeStore + ?Sized>(&self, store: &S, tree: &AccountId, account: &TreeAccount) -> SyncResult<()> {
        let record = TreeRecord {
            tree: *tree,
            max_depth: account.max_depth(),
            max_buffer_size: account.header.max_buffer_size,
            canopy_depth: account.canopy_depth(),
            created_slot: account.header.creation_slot,
        };
        if store.tree(tree)?.as_ref() != Some(&record) {
            store.upsert(&WriteBatch {
                trees: vec![record],
                ..Default::default()
            })?;
        }
        Ok(())
    }

    async fn validate_with_retries(&self, tree: &AccountId) -> SyncResult<(ValidationReport, u32)> {
        let store = self.pipeline.store();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let report = TreeValidator::validate(&**store, tree)?;
            if report.is_consistent() || attempt > self.config.validation_retries {
                return Ok((report, attempt));
            }
            let wait = self.config.retry_backoff(attempt);
            warn!(
                tree = %tree,
                attempt,
                mismatches = report.mismatches.len(),
                wait_ms = wait.as_millis() as u64,
                "validation failed, re-checking"
            );
            time::sleep(wait).await;
        }
    }

    /// Poll every tracked tree concurrently.
    pub async fn poll_once(self: &Arc<Self>) -> Vec<(AccountId, SyncResult<PollOutcome>)> {
        let mut tasks = JoinSet::new();
        for tree in self.config.trees.iter().copied() {
            let reconciler = Arc::clone(self);
            tasks.spawn(async move {
                let result = reconciler.poll_tree(tree).await;
                (tree, result)
            });
        }

        let mut results = Vec::with_capacity(self.config.trees.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "poll task panicked or was cancelled"),
            }
        }
        results.sort_by_key(|(tree, _)| *tree);
        results
    }

    /// Poll on the configured interval until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            trees = self.config.trees.len(),
            interval_ms = self.config.poll_interval_ms,
            "reconciler started"
        );
        loop {
            ticker.tick().await;
            let results = self.poll_once().await;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            debug!(trees = results.len(), failed, "poll complete");
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("trees", &self.config.trees.len())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Write every retained change log of `account` into an empty store.
///
/// The rows take `slot`, read after the snapshot: an upper bound on when
/// each mutation landed, so later gap slot ranges still cover everything
/// after it. Only node rows are written; asset rows come from replaying the
/// seeded seqs. Returns the number of rows written.
pub fn seed_from_account<S: NodeStore + ?Sized>(
    store: &S,
    tree: &AccountId,
    account: &TreeAccount,
    slot: Slot,
) -> SyncResult<usize> {
    let nodes: Vec<NodeRow> = account
        .change_logs_by_node_index()
        .into_iter()
        .flat_map(|log| {
            log.nodes.into_iter().map(move |n| NodeRow {
                tree: *tree,
                node_index: n.node_index,
                seq: log.seq,
                level: n.level,
                hash: n.digest,
                slot,
            })
        })
        .collect();
    if nodes.is_empty() {
        return Ok(0);
    }
    let stats = store.upsert(&WriteBatch {
        nodes,
        ..Default::default()
    })?;
    info!(tree = %tree, rows = stats.nodes_inserted, slot, "seeded from account snapshot");
    Ok(stats.nodes_inserted)
}
