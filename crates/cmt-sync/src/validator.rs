use std::collections::BTreeMap;

use cmt_crypto::{empty_node, hash_pair};
use cmt_store::{NodeStore, ProofGenerator};
use cmt_types::node::{self, ROOT};
use cmt_types::{AccountId, Digest, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// A node whose stored digest disagrees with the digest recomputed from the
/// stored leaves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMismatch {
    pub node_index: NodeIndex,
    pub level: u32,
    pub stored: Digest,
    pub recomputed: Digest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tree: AccountId,
    pub stored_root: Digest,
    pub recomputed_root: Digest,
    pub mismatches: Vec<NodeMismatch>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.stored_root == self.recomputed_root
    }

    /// The report as a [`SyncError::ConsistencyMismatch`].
    pub fn to_error(&self) -> SyncError {
        SyncError::ConsistencyMismatch {
            tree: self.tree,
            mismatches: self.mismatches.len(),
            stored_root: self.stored_root.to_hex(),
            recomputed_root: self.recomputed_root.to_hex(),
        }
    }
}

/// Recomputes a tree's internal nodes from its stored leaves and compares
/// them with the stored digests.
pub struct TreeValidator;

impl TreeValidator {
    /// Walk up from every stored leaf, hashing with empty digests where a
    /// sibling has never been written, and compare each recomputed node
    /// against the store's current digest for it.
    ///
    /// Only nodes above a stored leaf are checked; subtrees with no stored
    /// leaves are empty on both sides by construction.
    pub fn validate<S: NodeStore + ?Sized>(store: &S, tree: &AccountId) -> SyncResult<ValidationReport> {
        let record = store.tree(tree)?.ok_or(SyncError::UnknownTree(*tree))?;
        let depth = record.max_depth;

        let mut level_nodes: BTreeMap<NodeIndex, Digest> = store
            .current_leaves(tree)?
            .into_iter()
            .map(|row| (row.node_index, row.hash))
            .collect();

        let mut mismatches = Vec::new();
        let mut recomputed_root = empty_node(depth);
        for level in 0..depth {
            let mut parents = BTreeMap::new();
            for (&index, digest) in &level_nodes {
                let parent = node::parent(index);
                if parents.contains_key(&parent) {
                    continue;
                }
                let sibling = node::sibling(index);
                let sibling_digest = level_nodes.get(&sibling).copied().unwrap_or_else(|| empty_node(level));
                let combined = if node::is_left(index) {
                    hash_pair(digest, &sibling_digest)
                } else {
                    hash_pair(&sibling_digest, digest)
                };
                parents.insert(parent, combined);
            }

            for (&index, recomputed) in &parents {
                let stored = ProofGenerator::current_digest(store, tree, depth, index)?;
                if stored != *recomputed {
                    debug!(
                        tree = %tree,
                        node_index = index,
                        level = level + 1,
                        stored = %stored.short_hex(),
                        recomputed = %recomputed.short_hex(),
                        "node mismatch"
                    );
                    mismatches.push(NodeMismatch {
                        node_index: index,
                        level: level + 1,
                        stored,
                        recomputed: *recomputed,
                    });
                }
            }
            if let Some(root) = parents.get(&ROOT) {
                recomputed_root = *root;
            }
            level_nodes = parents;
        }

        let stored_root = ProofGenerator::current_digest(store, tree, depth, ROOT)?;
        let report = ValidationReport {
            tree: *tree,
            stored_root,
            recomputed_root,
            mismatches,
        };
        if !report.is_consistent() {
            warn!(
                tree = %tree,
                mismatches = report.mismatches.len(),
                stored_root = %stored_root,
                recomputed_root = %recomputed_root,
                "validation failed"
            );
        }
        Ok(report)
    }
}
