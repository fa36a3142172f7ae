use cmt_crypto::{empty_node, verify_proof, Proof};
use cmt_types::node::{self, ROOT};
use cmt_types::{AccountId, Digest, NodeIndex};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::NodeStore;

/// Builds inclusion proofs from the current view of a [`NodeStore`].
///
/// Stateless; every method reads through the store it is given. Reads may
/// interleave with ingestion, so a proof is assembled from whatever rows are
/// committed at the time and checked against the stored root before it is
/// handed out.
pub struct ProofGenerator;

impl ProofGenerator {
    /// Current digest of a node: the highest-seq row, or the empty digest
    /// for the node's level when nothing has been written there.
    pub fn current_digest<S: NodeStore + ?Sized>(
        store: &S,
        tree: &AccountId,
        depth: u32,
        node_index: NodeIndex,
    ) -> StoreResult<Digest> {
        let level = node::level_of(node_index, depth)
            .ok_or(StoreError::NodeOutOfRange { node_index, depth })?;
        Ok(store
            .current_row(tree, node_index)?
            .map(|row| row.hash)
            .unwrap_or_else(|| empty_node(level)))
    }

    /// Proof for the leaf at `node_index`.
    ///
    /// `leaf` overrides the stored leaf digest (the caller's claim about
    /// what the leaf holds). With `verify` set, a proof that does not
    /// recompute to the stored root is withheld and `Ok(None)` returned:
    /// the leaf cannot currently be proven, which says nothing about
    /// whether it exists.
    pub fn generate_proof<S: NodeStore + ?Sized>(
        store: &S,
        tree: &AccountId,
        node_index: NodeIndex,
        leaf: Option<Digest>,
        verify: bool,
    ) -> StoreResult<Option<Proof>> {
        let record = store.tree(tree)?.ok_or(StoreError::UnknownTree(*tree))?;
        let depth = record.max_depth;
        let index = node::leaf_index_of(node_index, depth)
            .ok_or(StoreError::NotALeaf { node_index, depth })?;

        let leaf = match leaf {
            Some(digest) => digest,
            None => Self::current_digest(store, tree, depth, node_index)?,
        };

        let mut proof = Vec::with_capacity(depth as usize);
        let mut current = node_index;
        while current > ROOT {
            proof.push(Self::current_digest(store, tree, depth, node::sibling(current))?);
            current = node::parent(current);
        }
        let root = Self::current_digest(store, tree, depth, ROOT)?;

        if verify && !verify_proof(leaf, index, &proof, root) {
            warn!(
                tree = %tree,
                node_index,
                leaf = %leaf.short_hex(),
                root = %root.short_hex(),
                "proof does not reproduce stored root; withholding"
            );
            return Ok(None);
        }

        debug!(tree = %tree, node_index, "proof generated");
        Ok(Some(Proof {
            leaf,
            root,
            proof,
            index,
            node_index,
        }))
    }

    /// Verified proof for whichever leaf currently holds `leaf_hash`.
    ///
    /// `Ok(None)` when no current leaf has that value or the proof does not
    /// verify.
    pub fn proof_for_leaf_hash<S: NodeStore + ?Sized>(
        store: &S,
        tree: &AccountId,
        leaf_hash: &Digest,
    ) -> StoreResult<Option<Proof>> {
        match store.find_leaf(tree, leaf_hash)? {
            Some(row) => Self::generate_proof(store, tree, row.node_index, Some(*leaf_hash), true),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNodeStore;
    use crate::types::{NodeRow, TreeRecord, WriteBatch};
    use cmt_crypto::AuthenticatedTree;
    use cmt_types::Seq;

    fn tree_id() -> AccountId {
        AccountId::new([9; 32])
    }

    fn register(store: &InMemoryNodeStore, depth: u32) {
        store
            .upsert(&WriteBatch {
                trees: vec![TreeRecord {
                    tree: tree_id(),
                    max_depth: depth,
                    max_buffer_size: 8,
                    canopy_depth: 0,
                    created_slot: 1,
                }],
                ..Default::default()
            })
            .unwrap();
    }

    /// Rows a change log for `leaf_index` of `tree` would produce.
    fn change_log_rows(tree: &AuthenticatedTree, leaf_index: u32, seq: Seq) -> Vec<NodeRow> {
        let depth = tree.depth();
        let mut rows: Vec<NodeRow> = tree
            .path_nodes(leaf_index)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(level, hash)| NodeRow {
                tree: tree_id(),
                node_index: node::path_node_index(depth, level as u32, leaf_index),
                seq,
                level: level as u32,
                hash,
                slot: 50 + seq,
            })
            .collect();
        rows.push(NodeRow {
            tree: tree_id(),
            node_index: ROOT,
            seq,
            level: depth,
            hash: tree.root(),
            slot: 50 + seq,
        });
        rows
    }

    #[test]
    fn empty_store_falls_back_to_empty_digests() {
        let store = InMemoryNodeStore::new();
        register(&store, 3);
        assert_eq!(
            ProofGenerator::current_digest(&store, &tree_id(), 3, 1).unwrap(),
            empty_node(3)
        );
        assert_eq!(
            ProofGenerator::current_digest(&store, &tree_id(), 3, 9).unwrap(),
            empty_node(0)
        );
        let proof = ProofGenerator::generate_proof(&store, &tree_id(), 8, None, true)
            .unwrap()
            .unwrap();
        assert_eq!(proof.root, AuthenticatedTree::empty(3).unwrap().root());
    }

    #[test]
    fn append_at_index_zero_proves_against_local_root() {
        let leaf = Digest::from_hash([0x11; 32]);
        let mut local = AuthenticatedTree::empty(3).unwrap();
        local.update(0, leaf).unwrap();

        let store = InMemoryNodeStore::new();
        register(&store, 3);
        store
            .upsert(&WriteBatch {
                nodes: change_log_rows(&local, 0, 0),
                ..Default::default()
            })
            .unwrap();

        let proof = ProofGenerator::proof_for_leaf_hash(&store, &tree_id(), &leaf)
            .unwrap()
            .unwrap();
        assert_eq!(proof.index, 0);
        assert_eq!(proof.node_index, 8);
        assert_eq!(proof.root, local.root());
        assert!(verify_proof(leaf, 0, &proof.proof, local.root()));
        assert_eq!(proof.proof, local.proof_of(0, None).unwrap());
    }

    #[test]
    fn unverifiable_proof_is_withheld() {
        let (a, b, c) = (
            Digest::from_hash([1; 32]),
            Digest::from_hash([2; 32]),
            Digest::from_hash([3; 32]),
        );
        let mut local = AuthenticatedTree::empty(2).unwrap();
        local.update(0, a).unwrap();
        let first = change_log_rows(&local, 0, 0);
        local.update(1, b).unwrap();
        let second = change_log_rows(&local, 1, 1);
        local.update(2, c).unwrap();
        let third = change_log_rows(&local, 2, 2);

        let store = InMemoryNodeStore::new();
        register(&store, 2);
        // Only the newest mutation has arrived; leaf 1 is unknown locally.
        store
            .upsert(&WriteBatch {
                nodes: third,
                ..Default::default()
            })
            .unwrap();

        assert!(ProofGenerator::generate_proof(&store, &tree_id(), 4, Some(a), true)
            .unwrap()
            .is_none());
        let unchecked = ProofGenerator::generate_proof(&store, &tree_id(), 4, Some(a), false)
            .unwrap()
            .unwrap();
        assert!(!unchecked.verify());

        let mut backfill = second;
        backfill.extend(first);
        store
            .upsert(&WriteBatch {
                nodes: backfill,
                ..Default::default()
            })
            .unwrap();
        let proof = ProofGenerator::generate_proof(&store, &tree_id(), 4, Some(a), true)
            .unwrap()
            .unwrap();
        assert_eq!(proof.root, local.root());
    }

    #[test]
    fn rejects_unknown_tree_and_non_leaf() {
        let store = InMemoryNodeStore::new();
        assert!(matches!(
            ProofGenerator::generate_proof(&store, &tree_id(), 8, None, true),
            Err(StoreError::UnknownTree(_))
        ));
        register(&store, 3);
        assert!(matches!(
            ProofGenerator::generate_proof(&store, &tree_id(), 4, None, true),
            Err(StoreError::NotALeaf { node_index: 4, depth: 3 })
        ));
        assert!(matches!(
            ProofGenerator::current_digest(&store, &tree_id(), 3, 16),
            Err(StoreError::NodeOutOfRange { .. })
        ));
    }

    #[test]
    fn unknown_leaf_hash_has_no_proof() {
        let store = InMemoryNodeStore::new();
        register(&store, 3);
        let missing = Digest::from_hash([0x42; 32]);
        assert!(ProofGenerator::proof_for_leaf_hash(&store, &tree_id(), &missing)
            .unwrap()
            .is_none());
    }
}
