use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use cmt_types::{AccountId, Digest, NodeIndex, Seq, Slot};

use crate::error::StoreResult;
use crate::traits::NodeStore;
use crate::types::{AssetRow, NodeRow, SeqSlot, TreeRecord, UpsertStats, WriteBatch};

/// Row log plus the indexes every query needs.
#[derive(Default)]
pub(crate) struct Tables {
    rows: Vec<NodeRow>,
    /// (tree, node) -> seq -> position in `rows`.
    by_node: HashMap<(AccountId, NodeIndex), BTreeMap<Seq, usize>>,
    seqs: HashMap<AccountId, BTreeMap<Seq, Slot>>,
    leaf_nodes: HashMap<AccountId, BTreeSet<NodeIndex>>,
    leaves_by_hash: HashMap<(AccountId, Digest), BTreeSet<NodeIndex>>,
    trees: BTreeMap<AccountId, TreeRecord>,
    assets: HashMap<(AccountId, u64), AssetRow>,
}

impl Tables {
    pub(crate) fn apply(&mut self, batch: &WriteBatch) -> UpsertStats {
        let mut stats = UpsertStats::default();

        for record in &batch.trees {
            let keep_existing = self
                .trees
                .get(&record.tree)
                .is_some_and(|existing| {
                    !record.is_complete() && (existing.is_complete() || record.created_slot == 0)
                });
            if !keep_existing {
                self.trees.insert(record.tree, record.clone());
            }
        }

        for row in &batch.nodes {
            let history = self.by_node.entry((row.tree, row.node_index)).or_default();
            if history.contains_key(&row.seq) {
                stats.nodes_duplicate += 1;
                continue;
            }
            history.insert(row.seq, self.rows.len());
            self.rows.push(*row);
            self.seqs
                .entry(row.tree)
                .or_default()
                .entry(row.seq)
                .or_insert(row.slot);
            if row.level == 0 {
                self.leaf_nodes.entry(row.tree).or_default().insert(row.node_index);
                self.leaves_by_hash
                    .entry((row.tree, row.hash))
                    .or_default()
                    .insert(row.node_index);
            }
            stats.nodes_inserted += 1;
        }

        for asset in &batch.assets {
            let key = (asset.tree, asset.nonce);
            let newer = self.assets.get(&key).map_or(true, |current| current.seq < asset.seq);
            if newer {
                self.assets.insert(key, asset.clone());
                stats.assets_updated += 1;
            }
        }

        stats
    }

    fn current_row(&self, tree: &AccountId, node_index: NodeIndex) -> Option<NodeRow> {
        self.by_node
            .get(&(*tree, node_index))
            .and_then(|history| history.values().next_back())
            .map(|pos| self.rows[*pos])
    }
}

/// In-memory, index-backed node store.
///
/// Intended for tests and embedding, and used as the read side of
/// [`JournaledNodeStore`](crate::JournaledNodeStore). All tables live behind
/// one `RwLock`, which is what makes a batch atomic to readers.
pub struct InMemoryNodeStore {
    tables: RwLock<Tables>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Number of distinct trees with at least one row or record.
    pub fn tree_count(&self) -> usize {
        let tables = self.tables.read().expect("lock poisoned");
        let mut ids: BTreeSet<AccountId> = tables.trees.keys().copied().collect();
        ids.extend(tables.seqs.keys().copied());
        ids.len()
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn upsert(&self, batch: &WriteBatch) -> StoreResult<UpsertStats> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.apply(batch))
    }

    fn current_row(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Option<NodeRow>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.current_row(tree, node_index))
    }

    fn node_history(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Vec<NodeRow>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .by_node
            .get(&(*tree, node_index))
            .map(|history| history.values().map(|pos| tables.rows[*pos]).collect())
            .unwrap_or_default())
    }

    fn sequences(&self, tree: &AccountId) -> StoreResult<Vec<SeqSlot>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .seqs
            .get(tree)
            .map(|seqs| {
                seqs.iter()
                    .map(|(seq, slot)| SeqSlot { seq: *seq, slot: *slot })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn max_sequence(&self, tree: &AccountId) -> StoreResult<Option<SeqSlot>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .seqs
            .get(tree)
            .and_then(|seqs| seqs.iter().next_back())
            .map(|(seq, slot)| SeqSlot { seq: *seq, slot: *slot }))
    }

    fn current_leaves(&self, tree: &AccountId) -> StoreResult<Vec<NodeRow>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .leaf_nodes
            .get(tree)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node_index| tables.current_row(tree, *node_index))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_leaf(&self, tree: &AccountId, leaf_hash: &Digest) -> StoreResult<Option<NodeRow>> {
        let tables = self.tables.read().expect("lock poisoned");
        let Some(candidates) = tables.leaves_by_hash.get(&(*tree, *leaf_hash)) else {
            return Ok(None);
        };
        Ok(candidates
            .iter()
            .filter_map(|node_index| tables.current_row(tree, *node_index))
            .filter(|row| row.hash == *leaf_hash)
            .max_by_key(|row| row.seq))
    }

    fn tree(&self, tree: &AccountId) -> StoreResult<Option<TreeRecord>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.trees.get(tree).cloned())
    }

    fn trees(&self) -> StoreResult<Vec<TreeRecord>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.trees.values().cloned().collect())
    }

    fn asset(&self, tree: &AccountId, nonce: u64) -> StoreResult<Option<AssetRow>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.assets.get(&(*tree, nonce)).cloned())
    }

    fn row_count(&self) -> StoreResult<usize> {
        Ok(self.tables.read().expect("lock poisoned").rows.len())
    }
}

impl std::fmt::Debug for InMemoryNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = self.tables.read().map(|t| t.rows.len()).unwrap_or_default();
        f.debug_struct("InMemoryNodeStore")
            .field("row_count", &rows)
            .finish()
    }
}
