//! Foundation types for the concurrent merkle tree mirror.
//!
//! Every other `cmt-*` crate depends on `cmt-types`.
//!
//! # Key Types
//!
//! - [`Digest`]: 32-byte hash value produced by the tree hash function
//! - [`AccountId`]: 32-byte ledger account / program identity
//! - [`node`]: complete-tree index arithmetic (root = 1, children 2n / 2n+1)
//! - [`Transaction`]: the ledger transaction shape the ingestion pipeline consumes

pub mod account;
pub mod digest;
pub mod error;
pub mod node;
pub mod transaction;

pub use account::AccountId;
pub use digest::Digest;
pub use error::TypeError;
pub use node::{NodeIndex, Seq, Slot};
pub use transaction::{Block, CompiledInstruction, InnerInstructions, Transaction};
