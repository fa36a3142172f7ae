use cmt_types::{AccountId, Digest, NodeIndex, Seq, Slot};
use serde::{Deserialize, Serialize};

/// One persisted node value: node `node_index` of `tree` held `hash` after
/// mutation `seq`, observed at ledger position `slot`.
///
/// Rows are append-only. The current value of a node is the row with the
/// highest `seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub tree: AccountId,
    pub node_index: NodeIndex,
    pub seq: Seq,
    pub level: u32,
    pub hash: Digest,
    pub slot: Slot,
}

/// Shape of a tracked tree.
///
/// `max_buffer_size == 0` means the shape came from an event that only
/// reveals the depth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub tree: AccountId,
    pub max_depth: u32,
    pub max_buffer_size: u32,
    pub canopy_depth: u32,
    pub created_slot: Slot,
}

impl TreeRecord {
    /// `true` when this record carries the full account shape.
    pub fn is_complete(&self) -> bool {
        self.max_buffer_size > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    Active,
    Burnt,
    Redeemed,
}

/// Current ownership of the leaf minted at `nonce`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRow {
    pub tree: AccountId,
    pub nonce: u64,
    pub owner: AccountId,
    pub delegate: AccountId,
    pub data_hash: Digest,
    pub leaf_hash: Digest,
    /// Sequence number of the mutation that last touched this asset.
    pub seq: Seq,
    pub status: AssetStatus,
}

/// Everything one transaction writes. Applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub trees: Vec<TreeRecord>,
    pub nodes: Vec<NodeRow>,
    pub assets: Vec<AssetRow>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.nodes.is_empty() && self.assets.is_empty()
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.trees.extend(other.trees);
        self.nodes.extend(other.nodes);
        self.assets.extend(other.assets);
    }
}

/// Counts reported by an upsert.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub nodes_inserted: usize,
    /// Rows skipped because `(tree, node_index, seq)` was already stored.
    pub nodes_duplicate: usize,
    pub assets_updated: usize,
}

/// A sequence number and the slot it was first observed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqSlot {
    pub seq: Seq,
    pub slot: Slot,
}

/// Half-open sequence window `[start, end)` used to bound a replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqWindow {
    pub start: Seq,
    pub end: Seq,
}

impl SeqWindow {
    pub fn new(start: Seq, end: Seq) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, seq: Seq) -> bool {
        seq >= self.start && seq < self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapKind {
    /// Sequences before the first stored one are missing.
    Leading,
    /// Sequences strictly between two stored ones are missing.
    Internal,
    /// The ledger is ahead of the newest stored sequence.
    Forward,
}

/// A discontinuity in a tree's stored history and the slots bracketing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    pub prev_seq: Seq,
    pub curr_seq: Seq,
    pub prev_slot: Slot,
    pub curr_slot: Slot,
    pub kind: GapKind,
}

impl GapRecord {
    pub fn internal(prev: SeqSlot, curr: SeqSlot) -> Self {
        Self {
            prev_seq: prev.seq,
            curr_seq: curr.seq,
            prev_slot: prev.slot,
            curr_slot: curr.slot,
            kind: GapKind::Internal,
        }
    }

    /// The sequences a replay must cover to close this gap.
    ///
    /// `Internal` misses `(prev, curr)`, `Forward` misses `(prev, curr]`,
    /// and `Leading` misses `[0, curr)`.
    pub fn replay_window(&self) -> SeqWindow {
        match self.kind {
            GapKind::Internal => SeqWindow::new(self.prev_seq + 1, self.curr_seq),
            GapKind::Forward => SeqWindow::new(self.prev_seq + 1, self.curr_seq + 1),
            GapKind::Leading => SeqWindow::new(0, self.curr_seq),
        }
    }

    /// Number of sequence numbers missing.
    pub fn missing(&self) -> u64 {
        let window = self.replay_window();
        window.end.saturating_sub(window.start)
    }
}
