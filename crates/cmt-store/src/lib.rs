//! Append-only node history for the concurrent merkle tree mirror.
//!
//! Every mutation the mirror learns about is stored as rows of
//! `(tree, node_index, seq, level, hash, slot)`. A node's current value is
//! its highest-sequence row. From that current view the store answers proof
//! requests and reports gaps in the sequence history.
//!
//! # Backends
//!
//! - [`InMemoryNodeStore`]: indexes behind a `RwLock`, for tests and embedding
//! - [`JournaledNodeStore`]: the same indexes replayed from a CRC-framed
//!   append-only journal on open

pub mod error;
pub mod gaps;
pub mod journal;
pub mod memory;
pub mod proof;
pub mod traits;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use gaps::{gaps_between, missing_sequence_ranges};
pub use journal::{JournaledNodeStore, StoreConfig, SyncMode};
pub use memory::InMemoryNodeStore;
pub use proof::ProofGenerator;
pub use traits::NodeStore;
pub use types::{
    AssetRow, AssetStatus, GapKind, GapRecord, NodeRow, SeqSlot, SeqWindow, TreeRecord, UpsertStats,
    WriteBatch,
};
