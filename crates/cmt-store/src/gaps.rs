use cmt_types::AccountId;

use crate::error::StoreResult;
use crate::traits::NodeStore;
use crate::types::{GapRecord, SeqSlot};

/// One [`GapRecord`] per adjacent pair of sorted sequences more than one apart.
pub fn gaps_between(sequences: &[SeqSlot]) -> Vec<GapRecord> {
    sequences
        .windows(2)
        .filter(|pair| pair[1].seq > pair[0].seq + 1)
        .map(|pair| GapRecord::internal(pair[0], pair[1]))
        .collect()
}

/// Internal gaps in the history stored for `tree`.
///
/// Only discontinuities between two stored sequences are reported. Whether
/// sequences before the first stored one are missing depends on knowing the
/// tree exists on the ledger, which the store does not.
pub fn missing_sequence_ranges<S: NodeStore + ?Sized>(
    store: &S,
    tree: &AccountId,
) -> StoreResult<Vec<GapRecord>> {
    Ok(gaps_between(&store.sequences(tree)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNodeStore;
    use crate::types::{GapKind, NodeRow, WriteBatch};
    use cmt_crypto::AuthenticatedTree;
    use cmt_types::node::{self, ROOT};
    use cmt_types::{Digest, Seq};

    fn tree_id() -> AccountId {
        AccountId::new([5; 32])
    }

    fn seq_row(seq: Seq) -> NodeRow {
        NodeRow {
            tree: tree_id(),
            node_index: 1,
            seq,
            level: 3,
            hash: Digest::zero(),
            slot: seq * 10,
        }
    }

    #[test]
    fn reports_each_internal_gap() {
        let store = InMemoryNodeStore::new();
        store
            .upsert(&WriteBatch {
                nodes: [0, 1, 2, 5, 6, 9].into_iter().map(seq_row).collect(),
                ..Default::default()
            })
            .unwrap();
        let gaps = missing_sequence_ranges(&store, &tree_id()).unwrap();
        let pairs: Vec<(Seq, Seq)> = gaps.iter().map(|g| (g.prev_seq, g.curr_seq)).collect();
        assert_eq!(pairs, vec![(2, 5), (6, 9)]);
        assert_eq!((gaps[0].prev_slot, gaps[0].curr_slot), (20, 50));
        assert!(gaps.iter().all(|g| g.kind == GapKind::Internal));
    }

    #[test]
    fn leading_absence_is_not_an_internal_gap() {
        let seqs = [SeqSlot { seq: 4, slot: 1 }, SeqSlot { seq: 5, slot: 2 }];
        assert!(gaps_between(&seqs).is_empty());
        assert!(gaps_between(&[]).is_empty());
    }

    #[test]
    fn out_of_order_arrival_closes_every_gap() {
        let leaves = [
            Digest::from_hash([1; 32]),
            Digest::from_hash([2; 32]),
            Digest::from_hash([3; 32]),
        ];
        let depth = 3;
        let mut local = AuthenticatedTree::empty(depth).unwrap();
        let mut batches = Vec::new();
        for (seq, leaf) in leaves.iter().enumerate() {
            let index = seq as u32;
            local.update(index, *leaf).unwrap();
            let mut nodes: Vec<NodeRow> = local
                .path_nodes(index)
                .unwrap()
                .into_iter()
                .enumerate()
                .map(|(level, hash)| NodeRow {
                    tree: tree_id(),
                    node_index: node::path_node_index(depth, level as u32, index),
                    seq: seq as Seq,
                    level: level as u32,
                    hash,
                    slot: 100 + seq as u64,
                })
                .collect();
            nodes.push(NodeRow {
                tree: tree_id(),
                node_index: ROOT,
                seq: seq as Seq,
                level: depth,
                hash: local.root(),
                slot: 100 + seq as u64,
            });
            batches.push(WriteBatch {
                nodes,
                ..Default::default()
            });
        }

        let store = InMemoryNodeStore::new();
        store.upsert(&batches[0]).unwrap();
        store.upsert(&batches[2]).unwrap();
        assert_eq!(missing_sequence_ranges(&store, &tree_id()).unwrap().len(), 1);
        store.upsert(&batches[1]).unwrap();
        assert!(missing_sequence_ranges(&store, &tree_id()).unwrap().is_empty());

        let mut current: Vec<(u32, Digest)> = store
            .current_leaves(&tree_id())
            .unwrap()
            .iter()
            .filter_map(|row| node::leaf_index_of(row.node_index, depth).map(|i| (i, row.hash)))
            .collect();
        current.sort();
        let rebuilt_leaves: Vec<Digest> = current.iter().map(|(_, hash)| *hash).collect();
        let rebuilt = AuthenticatedTree::build(&rebuilt_leaves, depth).unwrap();
        assert_eq!(rebuilt.root(), local.root());
        assert_eq!(store.current_row(&tree_id(), ROOT).unwrap().unwrap().hash, rebuilt.root());
    }
}
