use cmt_account::DecodeError;
use cmt_ingest::IngestError;
use cmt_store::StoreError;
use cmt_types::{AccountId, Seq, Slot};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The data source no longer holds this slot.
    #[error("slot {slot} is no longer available")]
    SlotUnavailable { slot: Slot },

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    /// A gap needs history the data source has pruned.
    #[error("gap in tree {tree} cannot be repaired: slot {slot} is unavailable")]
    GapUnrecoverable { tree: AccountId, slot: Slot },

    /// Sequences are still missing after every gap was replayed.
    #[error("tree {tree} still has {gaps} gap(s) after repair, first missing seq {first_missing}")]
    GapsRemain { tree: AccountId, gaps: usize, first_missing: Seq },

    /// Recomputed digests disagree with the stored ones after repair.
    #[error("tree {tree} inconsistent: {mismatches} node(s) disagree, root {stored_root} vs recomputed {recomputed_root}")]
    ConsistencyMismatch {
        tree: AccountId,
        mismatches: usize,
        stored_root: String,
        recomputed_root: String,
    },

    #[error("tree {0} is not tracked")]
    UnknownTree(AccountId),

    #[error("data source error: {0}")]
    Source(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
}

pub type SyncResult<T> = Result<T, SyncError>;
