//! Ledger reconciliation for the concurrent merkle tree mirror.
//!
//! The live ingestion path can miss transactions. This crate compares each
//! tracked tree's stored history with a fresh snapshot of its account,
//! replays the missing sequence ranges from historical blocks, and checks
//! that the stored nodes still hash up to the stored root.
//!
//! - [`ChainDataSource`]: async read access to accounts and blocks
//! - [`GapDetector`]: leading, internal and forward gaps
//! - [`Backfiller`]: windowed replay of a gap's slot range
//! - [`TreeValidator`]: bottom-up recompute of stored nodes
//! - [`Reconciler`]: the per-tree poll loop tying them together

pub mod backfill;
pub mod config;
pub mod detector;
pub mod error;
pub mod reconciler;
pub mod source;
pub mod validator;

#[cfg(test)]
mod testing;

pub use backfill::{BackfillReport, Backfiller};
pub use config::SyncConfig;
pub use detector::GapDetector;
pub use error::{SyncError, SyncResult};
pub use reconciler::{seed_from_account, PollOutcome, Reconciler, TreeStatus};
pub use source::{ChainDataSource, InMemoryChain};
pub use validator::{NodeMismatch, TreeValidator, ValidationReport};
