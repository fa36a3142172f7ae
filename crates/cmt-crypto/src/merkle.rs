use std::collections::HashMap;

use cmt_types::node::{self, NodeIndex, ROOT};
use cmt_types::Digest;
use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};
use crate::hasher::{empty_node, hash_pair, MAX_DEPTH};

/// Fixed-depth complete binary tree with inclusion proofs.
///
/// Nodes live in an arena keyed by complete-tree index (root = 1, children
/// `2n` / `2n + 1`). Only materialized nodes are stored; any index that was
/// never written reads as the empty subtree digest for its level, so the
/// structure is always a complete tree of the configured depth no matter how
/// many leaves were supplied.
#[derive(Clone, Debug)]
pub struct AuthenticatedTree {
    depth: u32,
    /// One past the highest leaf index ever supplied or written.
    leaf_count: u64,
    nodes: HashMap<NodeIndex, Digest>,
}

impl AuthenticatedTree {
    /// Build a tree of `depth` from the leftmost `leaves`.
    ///
    /// Nodes are paired bottom-up. When a level has an odd count, the last
    /// node is paired with the empty subtree of its own level.
    pub fn build(leaves: &[Digest], depth: u32) -> TreeResult<Self> {
        check_depth(depth)?;
        let capacity = 1u64 << depth;
        let count = leaves.len() as u64;
        if count > capacity {
            return Err(TreeError::TooManyLeaves { count, capacity });
        }

        let mut nodes = HashMap::with_capacity(leaves.len() * 2 + depth as usize);
        let mut current: Vec<Digest> = leaves.to_vec();

        for level in 0..depth {
            let first = 1u64 << (depth - level);
            for (offset, digest) in current.iter().enumerate() {
                nodes.insert(first + offset as u64, *digest);
            }
            let sibling_fill = empty_node(level);
            current = current
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).copied().unwrap_or(sibling_fill);
                    hash_pair(&pair[0], &right)
                })
                .collect();
        }

        if let Some(root) = current.first() {
            nodes.insert(ROOT, *root);
        }

        Ok(Self {
            depth,
            leaf_count: count,
            nodes,
        })
    }

    /// An all-empty tree of `depth`.
    pub fn empty(depth: u32) -> TreeResult<Self> {
        Self::build(&[], depth)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of leaf slots (`2^depth`).
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// One past the highest leaf index ever supplied or written.
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn root(&self) -> Digest {
        self.node(ROOT)
    }

    /// Digest at `index`, or the empty digest for its level.
    ///
    /// Indices outside the tree read as the zero digest.
    pub fn node(&self, index: NodeIndex) -> Digest {
        match self.nodes.get(&index) {
            Some(digest) => *digest,
            None => node::level_of(index, self.depth)
                .map(empty_node)
                .unwrap_or_default(),
        }
    }

    pub fn leaf(&self, leaf_index: u32) -> TreeResult<Digest> {
        self.check_leaf(leaf_index)?;
        Ok(self.node(node::leaf_node_index(self.depth, leaf_index)))
    }

    /// Replace a leaf and recompute every ancestor up to the root.
    pub fn update(&mut self, leaf_index: u32, digest: Digest) -> TreeResult<()> {
        self.check_leaf(leaf_index)?;
        let mut index = node::leaf_node_index(self.depth, leaf_index);
        let mut current = digest;
        self.nodes.insert(index, current);

        while index > ROOT {
            let sibling = self.node(node::sibling(index));
            current = if node::is_left(index) {
                hash_pair(&current, &sibling)
            } else {
                hash_pair(&sibling, &current)
            };
            index = node::parent(index);
            self.nodes.insert(index, current);
        }

        self.leaf_count = self.leaf_count.max(leaf_index as u64 + 1);
        Ok(())
    }

    /// Sibling digests from the leaf up toward the root.
    ///
    /// With `truncate_to = Some(k)` the proof stops `k` levels short of the
    /// root; the caller supplies those upper levels (canopy) out of band.
    pub fn proof_of(&self, leaf_index: u32, truncate_to: Option<u32>) -> TreeResult<Vec<Digest>> {
        self.check_leaf(leaf_index)?;
        let truncate = truncate_to.unwrap_or(0);
        if truncate > self.depth {
            return Err(TreeError::TruncateBeyondDepth {
                truncate,
                depth: self.depth,
            });
        }

        let mut index = node::leaf_node_index(self.depth, leaf_index);
        let levels = self.depth - truncate;
        let mut proof = Vec::with_capacity(levels as usize);
        for _ in 0..levels {
            proof.push(self.node(node::sibling(index)));
            index = node::parent(index);
        }
        Ok(proof)
    }

    /// Full inclusion proof for a leaf against the current root.
    pub fn prove(&self, leaf_index: u32) -> TreeResult<Proof> {
        Ok(Proof {
            leaf: self.leaf(leaf_index)?,
            root: self.root(),
            proof: self.proof_of(leaf_index, None)?,
            index: leaf_index,
            node_index: node::leaf_node_index(self.depth, leaf_index),
        })
    }

    /// Digests on the leaf→root path, leaf first, child of the root last.
    ///
    /// This is the `path` a change-log entry records for a mutation of
    /// `leaf_index`.
    pub fn path_nodes(&self, leaf_index: u32) -> TreeResult<Vec<Digest>> {
        self.check_leaf(leaf_index)?;
        Ok((0..self.depth)
            .map(|level| self.node(node::path_node_index(self.depth, level, leaf_index)))
            .collect())
    }

    /// `(root, path, index)` a ledger change log records after mutating
    /// `leaf_index`.
    pub fn change_log(&self, leaf_index: u32) -> TreeResult<(Digest, Vec<Digest>, u32)> {
        Ok((self.root(), self.path_nodes(leaf_index)?, leaf_index))
    }

    fn check_leaf(&self, leaf_index: u32) -> TreeResult<()> {
        if leaf_index as u64 >= self.capacity() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: leaf_index as u64,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }
}

fn check_depth(depth: u32) -> TreeResult<()> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(TreeError::DepthOutOfRange {
            depth,
            max: MAX_DEPTH,
        });
    }
    Ok(())
}

/// Fold `leaf` with `proof` into the digest at level `proof.len()`.
///
/// At level `i`, bit `i` of `index` selects the side: 0 means the running
/// node is the left child, 1 means it is the right child.
pub fn recompute(leaf: Digest, proof: &[Digest], index: u32) -> Digest {
    proof.iter().enumerate().fold(leaf, |current, (level, sibling)| {
        if (index as u64 >> level) & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        }
    })
}

/// Check that `leaf` at `index` hashes up through `proof` to `root`.
pub fn verify_proof(leaf: Digest, index: u32, proof: &[Digest], root: Digest) -> bool {
    recompute(leaf, proof, index) == root
}

/// Inclusion proof for one leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub leaf: Digest,
    pub root: Digest,
    /// Sibling digests, leaf level first.
    pub proof: Vec<Digest>,
    /// Leaf index (position among the leaves, 0 = leftmost).
    pub index: u32,
    /// Complete-tree index of the leaf.
    pub node_index: NodeIndex,
}

impl Proof {
    /// Recompute the root from the leaf and path.
    pub fn verify(&self) -> bool {
        verify_proof(self.leaf, self.index, &self.proof, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(seed: u8) -> Digest {
        Digest::from_hash(*blake3::hash(&[seed]).as_bytes())
    }

    fn leaves(count: usize) -> Vec<Digest> {
        (0..count).map(|i| leaf(i as u8)).collect()
    }

    #[test]
    fn empty_depth_three_root_is_triple_self_hash() {
        let tree = AuthenticatedTree::empty(3).unwrap();
        let zero = Digest::zero();
        let l1 = hash_pair(&zero, &zero);
        let l2 = hash_pair(&l1, &l1);
        let l3 = hash_pair(&l2, &l2);
        assert_eq!(tree.root(), l3);
        assert_eq!(tree.root(), empty_node(3));
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn explicit_zero_leaves_match_empty_tree() {
        let tree = AuthenticatedTree::build(&[Digest::zero(); 8], 3).unwrap();
        assert_eq!(tree.root(), empty_node(3));
    }

    #[test]
    fn partial_tree_pads_with_empty_subtrees() {
        let ls = leaves(3);
        let tree = AuthenticatedTree::build(&ls, 2).unwrap();
        let left = hash_pair(&ls[0], &ls[1]);
        let right = hash_pair(&ls[2], &empty_node(0));
        assert_eq!(tree.root(), hash_pair(&left, &right));
    }

    #[test]
    fn rejects_bad_depth_and_overfill() {
        assert!(matches!(
            AuthenticatedTree::empty(0),
            Err(TreeError::DepthOutOfRange { .. })
        ));
        assert!(matches!(
            AuthenticatedTree::empty(MAX_DEPTH + 1),
            Err(TreeError::DepthOutOfRange { .. })
        ));
        assert_eq!(
            AuthenticatedTree::build(&leaves(5), 2).unwrap_err(),
            TreeError::TooManyLeaves {
                count: 5,
                capacity: 4
            }
        );
    }

    #[test]
    fn deep_empty_tree_is_cheap() {
        let mut tree = AuthenticatedTree::empty(MAX_DEPTH).unwrap();
        assert_eq!(tree.root(), empty_node(MAX_DEPTH));
        tree.update(12345, leaf(1)).unwrap();
        let proof = tree.prove(12345).unwrap();
        assert_eq!(proof.proof.len(), MAX_DEPTH as usize);
        assert!(proof.verify());
    }

    #[test]
    fn leaf_index_out_of_range() {
        let tree = AuthenticatedTree::empty(3).unwrap();
        assert_eq!(
            tree.proof_of(8, None).unwrap_err(),
            TreeError::LeafIndexOutOfRange {
                index: 8,
                capacity: 8
            }
        );
    }

    #[test]
    fn truncated_proof_reaches_canopy_node() {
        let tree = AuthenticatedTree::build(&leaves(8), 3).unwrap();
        let proof = tree.proof_of(5, Some(1)).unwrap();
        assert_eq!(proof.len(), 2);
        // Level-2 ancestor of leaf 5 is node 3.
        assert_eq!(recompute(leaf(5), &proof, 5), tree.node(3));
        assert!(matches!(
            tree.proof_of(5, Some(4)),
            Err(TreeError::TruncateBeyondDepth { .. })
        ));
    }

    #[test]
    fn flipped_sibling_is_rejected() {
        let tree = AuthenticatedTree::build(&leaves(8), 3).unwrap();
        let mut proof = tree.prove(2).unwrap();
        assert!(proof.verify());
        for i in 0..proof.proof.len() {
            let mut tampered = proof.clone();
            let mut bytes = *tampered.proof[i].as_bytes();
            bytes[0] ^= 1;
            tampered.proof[i] = Digest::from_hash(bytes);
            assert!(!tampered.verify(), "flip at level {i} must fail");
        }
        proof.index = 3;
        assert!(!proof.verify(), "wrong index must fail");
    }

    #[test]
    fn path_nodes_match_change_log_shape() {
        let tree = AuthenticatedTree::build(&leaves(5), 3).unwrap();
        let path = tree.path_nodes(4).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], leaf(4));
        assert_eq!(path[1], hash_pair(&leaf(4), &empty_node(0)));
        assert_eq!(hash_pair(&tree.node(2), &path[2]), tree.root());

        let (root, logged, index) = tree.change_log(4).unwrap();
        assert_eq!((root, index), (tree.root(), 4));
        assert_eq!(logged, path);
    }

    #[test]
    fn proof_serde_roundtrip() {
        let tree = AuthenticatedTree::build(&leaves(4), 2).unwrap();
        let proof = tree.prove(2).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let parsed: Proof = serde_json::from_str(&json).unwrap();
        assert_eq!(proof, parsed);
        assert!(parsed.verify());
    }

    proptest! {
        #[test]
        fn every_proof_verifies(depth in 1u32..=6, fill in 0usize..=64) {
            let capacity = 1usize << depth;
            let count = fill.min(capacity);
            let ls = leaves(count);
            let tree = AuthenticatedTree::build(&ls, depth).unwrap();
            for i in 0..capacity as u32 {
                let expected_leaf = ls.get(i as usize).copied().unwrap_or(Digest::zero());
                let proof = tree.proof_of(i, None).unwrap();
                prop_assert!(verify_proof(expected_leaf, i, &proof, tree.root()));
            }
        }

        #[test]
        fn update_matches_rebuild(depth in 1u32..=6, fill in 0usize..=64, target in any::<u32>(), seed in any::<u8>()) {
            let capacity = 1usize << depth;
            let count = fill.min(capacity);
            let mut ls = leaves(count);
            let index = target % capacity as u32;
            let mut tree = AuthenticatedTree::build(&ls, depth).unwrap();
            let new_leaf = Digest::from_hash([seed; 32]);
            tree.update(index, new_leaf).unwrap();

            if (index as usize) >= ls.len() {
                ls.resize(index as usize + 1, Digest::zero());
            }
            ls[index as usize] = new_leaf;
            let rebuilt = AuthenticatedTree::build(&ls, depth).unwrap();
            prop_assert_eq!(tree.root(), rebuilt.root());
            prop_assert_eq!(tree.leaf_count(), rebuilt.leaf_count());
        }
    }
}
