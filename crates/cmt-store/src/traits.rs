use cmt_types::{AccountId, Digest, NodeIndex};

use crate::error::StoreResult;
use crate::types::{AssetRow, NodeRow, SeqSlot, TreeRecord, UpsertStats, WriteBatch};

/// Persisted node history for one or more trees.
///
/// All implementations must satisfy these invariants:
/// - Rows are append-only: never updated in place, never deleted.
/// - A `(tree, node_index, seq)` already stored is skipped on re-insert, so
///   replaying the same events is a no-op.
/// - `upsert` applies a batch atomically: readers see all of it or none.
/// - Reads may run concurrently with writes and see whatever has committed.
pub trait NodeStore: Send + Sync {
    /// Atomically apply one transaction's worth of rows.
    fn upsert(&self, batch: &WriteBatch) -> StoreResult<UpsertStats>;

    /// Row with the highest sequence number for a node, if any.
    fn current_row(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Option<NodeRow>>;

    /// Every stored row for a node, ascending by sequence number.
    fn node_history(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Vec<NodeRow>>;

    /// Distinct sequence numbers seen for a tree, ascending, each with the
    /// slot it was first recorded at.
    fn sequences(&self, tree: &AccountId) -> StoreResult<Vec<SeqSlot>>;

    /// Current row of every leaf-level node that has any row.
    fn current_leaves(&self, tree: &AccountId) -> StoreResult<Vec<NodeRow>>;

    /// The leaf whose current value is `leaf_hash`, preferring the most
    /// recently written one when several match.
    fn find_leaf(&self, tree: &AccountId, leaf_hash: &Digest) -> StoreResult<Option<NodeRow>>;

    fn tree(&self, tree: &AccountId) -> StoreResult<Option<TreeRecord>>;

    fn trees(&self) -> StoreResult<Vec<TreeRecord>>;

    fn asset(&self, tree: &AccountId, nonce: u64) -> StoreResult<Option<AssetRow>>;

    /// Total rows across all trees.
    fn row_count(&self) -> StoreResult<usize>;

    /// Newest sequence number seen for a tree.
    ///
    /// Default implementation scans [`NodeStore::sequences`]. Backends may
    /// override with an index lookup.
    fn max_sequence(&self, tree: &AccountId) -> StoreResult<Option<SeqSlot>> {
        Ok(self.sequences(tree)?.last().copied())
    }
}
