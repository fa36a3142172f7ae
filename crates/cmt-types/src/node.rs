//! Complete-tree index arithmetic.
//!
//! The root is node 1; node `n` has children `2n` and `2n + 1`. In a tree of
//! depth `D`, leaves occupy `[2^D, 2^(D+1))` and leaf `i` is node `2^D + i`.
//! Levels count up from the leaves: leaves are level 0, the root is level `D`.

/// Complete-tree node index.
pub type NodeIndex = u64;
/// Change-log sequence number.
pub type Seq = u64;
/// Ledger position (block height).
pub type Slot = u64;

/// Index of the root node.
pub const ROOT: NodeIndex = 1;

/// Node index of leaf `leaf_index` in a tree of `depth`.
pub fn leaf_node_index(depth: u32, leaf_index: u32) -> NodeIndex {
    (1u64 << depth) + leaf_index as u64
}

/// Node index of the level-`level` ancestor of `leaf_index`.
///
/// Level 0 is the leaf itself and level `depth` is the root.
pub fn path_node_index(depth: u32, level: u32, leaf_index: u32) -> NodeIndex {
    (1u64 << (depth - level)) + ((leaf_index as u64) >> level)
}

/// Level of `node` in a tree of `depth`, or `None` when the index lies
/// outside the tree.
pub fn level_of(node: NodeIndex, depth: u32) -> Option<u32> {
    if node == 0 {
        return None;
    }
    let row = 63 - node.leading_zeros();
    depth.checked_sub(row)
}

/// Leaf index for a leaf-level `node`, or `None` if `node` is not a leaf.
pub fn leaf_index_of(node: NodeIndex, depth: u32) -> Option<u32> {
    let first = 1u64 << depth;
    if node < first || node >= first << 1 {
        return None;
    }
    u32::try_from(node - first).ok()
}

/// The node sharing `node`'s parent. Odd nodes pair with `n - 1`, even with `n + 1`.
pub fn sibling(node: NodeIndex) -> NodeIndex {
    node ^ 1
}

pub fn parent(node: NodeIndex) -> NodeIndex {
    node >> 1
}

/// `true` when `node` is the left child of its parent.
pub fn is_left(node: NodeIndex) -> bool {
    node & 1 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn leaf_indices_for_depth_three() {
        assert_eq!(leaf_node_index(3, 0), 8);
        assert_eq!(leaf_node_index(3, 7), 15);
        assert_eq!(leaf_index_of(8, 3), Some(0));
        assert_eq!(leaf_index_of(15, 3), Some(7));
        assert_eq!(leaf_index_of(16, 3), None);
        assert_eq!(leaf_index_of(7, 3), None);
    }

    #[test]
    fn path_indices_reach_root() {
        assert_eq!(path_node_index(3, 0, 5), 13);
        assert_eq!(path_node_index(3, 1, 5), 6);
        assert_eq!(path_node_index(3, 2, 5), 3);
        assert_eq!(path_node_index(3, 3, 5), ROOT);
    }

    #[test]
    fn levels() {
        assert_eq!(level_of(1, 3), Some(3));
        assert_eq!(level_of(2, 3), Some(2));
        assert_eq!(level_of(15, 3), Some(0));
        assert_eq!(level_of(16, 3), None);
        assert_eq!(level_of(0, 3), None);
    }

    #[test]
    fn sibling_and_parent() {
        assert_eq!(sibling(8), 9);
        assert_eq!(sibling(9), 8);
        assert_eq!(parent(9), 4);
        assert!(is_left(8));
        assert!(!is_left(9));
    }

    proptest! {
        #[test]
        fn path_node_matches_repeated_parent(depth in 1u32..=30, seed in any::<u32>(), level in 0u32..=30) {
            let level = level.min(depth);
            let leaf = seed % (1u32 << depth);
            let mut node = leaf_node_index(depth, leaf);
            for _ in 0..level {
                node = parent(node);
            }
            prop_assert_eq!(path_node_index(depth, level, leaf), node);
            prop_assert_eq!(level_of(node, depth), Some(level));
        }
    }
}
