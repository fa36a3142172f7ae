//! Hash primitives and the authenticated tree for the concurrent merkle tree
//! mirror.
//!
//! Provides the two-to-one BLAKE3 node hash, the memoized table of empty
//! subtree digests, a fixed-depth complete binary tree stored as an
//! index-addressed arena, and inclusion proof generation/verification.
//!
//! All hashing goes through the `blake3` crate.

pub mod error;
pub mod hasher;
pub mod merkle;

pub use error::{TreeError, TreeResult};
pub use hasher::{empty_node, hash_pair, MAX_DEPTH};
pub use merkle::{recompute, verify_proof, AuthenticatedTree, Proof};
