use cmt_crypto::MAX_DEPTH;
use cmt_store::{AssetRow, AssetStatus, NodeRow};
use cmt_types::node::{self, ROOT};
use cmt_types::{AccountId, Digest, NodeIndex, Seq, Slot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Bytes of the type tag in front of every event and instruction payload.
pub const DISCRIMINATOR_LEN: usize = 8;

pub type Discriminator = [u8; DISCRIMINATOR_LEN];

const DATA_PREFIX: &str = "Program data: ";

fn tagged(namespace: &str, name: &str) -> Discriminator {
    let hash = blake3::hash(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&hash.as_bytes()[..DISCRIMINATOR_LEN]);
    out
}

/// Tag for event `name`: the first 8 bytes of `BLAKE3("event:<name>")`.
pub fn event_discriminator(name: &str) -> Discriminator {
    tagged("event", name)
}

/// Tag for instruction `snake_name`: the first 8 bytes of
/// `BLAKE3("global:<snake_name>")`.
pub fn instruction_discriminator(snake_name: &str) -> Discriminator {
    tagged("global", snake_name)
}

/// A structured event a program emits as `discriminator || bincode(body)`.
pub trait EventSchema: Serialize + DeserializeOwned {
    const NAME: &'static str;

    fn discriminator() -> Discriminator {
        event_discriminator(Self::NAME)
    }

    /// Tagged binary payload.
    fn to_payload(&self) -> IngestResult<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| IngestError::MalformedEvent(e.to_string()))?;
        let mut out = Self::discriminator().to_vec();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// The `Program data:` line a program would log for this event.
    fn to_log_line(&self) -> IngestResult<String> {
        Ok(format!("{DATA_PREFIX}{}", hex::encode(self.to_payload()?)))
    }

    /// Decode a tagged payload; `None` if the tag or body does not match.
    fn from_payload(bytes: &[u8]) -> Option<Self> {
        let (tag, body) = bytes.split_at_checked(DISCRIMINATOR_LEN)?;
        if tag != Self::discriminator() {
            return None;
        }
        bincode::deserialize(body).ok()
    }
}

/// Decode `E` from a data-bearing log line.
///
/// Accepts the full `Program data: <hex>` line or just its payload text.
/// A line that is not hex, carries another event's tag, or fails to decode
/// yields `None`; the surrounding transaction carries on without it.
pub fn extract_event<E: EventSchema>(line: &str) -> Option<E> {
    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();
    let Ok(bytes) = hex::decode(payload) else {
        debug!(event = E::NAME, "data line is not hex");
        return None;
    };
    let event = E::from_payload(&bytes);
    if event.is_none() {
        debug!(event = E::NAME, len = bytes.len(), "schema mismatch");
    }
    event
}

/// One node of a change-log path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub node: Digest,
    /// Complete-tree index of `node`.
    pub index: NodeIndex,
}

/// Emitted by the tree program for every mutation.
///
/// `path` runs leaf to root inclusive, so it holds `depth + 1` nodes and the
/// last one is the new root at index 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEvent {
    pub tree: AccountId,
    pub seq: Seq,
    pub leaf_index: u32,
    pub path: Vec<PathNode>,
}

impl EventSchema for ChangeLogEvent {
    const NAME: &'static str = "ChangeLogEvent";
}

impl ChangeLogEvent {
    /// Event for a mutation of `leaf_index` that produced `root` through
    /// `path` (leaf first, child of the root last).
    pub fn from_path(tree: AccountId, seq: Seq, leaf_index: u32, root: Digest, path: &[Digest]) -> Self {
        let depth = path.len() as u32;
        let mut nodes: Vec<PathNode> = path
            .iter()
            .enumerate()
            .map(|(level, digest)| PathNode {
                node: *digest,
                index: node::path_node_index(depth, level as u32, leaf_index),
            })
            .collect();
        nodes.push(PathNode { node: root, index: ROOT });
        Self {
            tree,
            seq,
            leaf_index,
            path: nodes,
        }
    }

    pub fn depth(&self) -> u32 {
        self.path.len().saturating_sub(1) as u32
    }

    pub fn root(&self) -> Option<Digest> {
        self.path.last().map(|p| p.node)
    }

    /// Check the path indices against the leaf index and depth.
    pub fn validate(&self) -> IngestResult<()> {
        let depth = self.depth();
        if depth == 0 || depth > MAX_DEPTH {
            return Err(IngestError::MalformedEvent(format!(
                "seq {}: path of {} nodes",
                self.seq,
                self.path.len()
            )));
        }
        if u64::from(self.leaf_index) >= 1u64 << depth {
            return Err(IngestError::MalformedEvent(format!(
                "seq {}: leaf {} outside depth-{depth} tree",
                self.seq, self.leaf_index
            )));
        }
        for (level, path_node) in self.path.iter().enumerate() {
            let expected = node::path_node_index(depth, level as u32, self.leaf_index);
            if path_node.index != expected {
                return Err(IngestError::MalformedEvent(format!(
                    "seq {}: level {level} has index {}, expected {expected}",
                    self.seq, path_node.index
                )));
            }
        }
        Ok(())
    }

    /// Store rows for every node on the path.
    pub fn to_rows(&self, slot: Slot) -> Vec<NodeRow> {
        self.path
            .iter()
            .enumerate()
            .map(|(level, path_node)| NodeRow {
                tree: self.tree,
                node_index: path_node.index,
                seq: self.seq,
                level: level as u32,
                hash: path_node.node,
                slot,
            })
            .collect()
    }
}

/// Emitted by the asset program with the leaf an instruction wrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSchemaEvent {
    pub tree: AccountId,
    pub nonce: u64,
    pub owner: AccountId,
    pub delegate: AccountId,
    pub data_hash: Digest,
    pub leaf_hash: Digest,
}

impl EventSchema for LeafSchemaEvent {
    const NAME: &'static str = "LeafSchemaEvent";
}

impl LeafSchemaEvent {
    pub fn new(tree: AccountId, nonce: u64, owner: AccountId, delegate: AccountId, data_hash: Digest) -> Self {
        Self {
            tree,
            nonce,
            owner,
            delegate,
            data_hash,
            leaf_hash: Self::compute_leaf_hash(&tree, nonce, &owner, &delegate, &data_hash),
        }
    }

    /// Leaf digest for an asset: `BLAKE3(tree || nonce || owner || delegate || data_hash)`.
    pub fn compute_leaf_hash(
        tree: &AccountId,
        nonce: u64,
        owner: &AccountId,
        delegate: &AccountId,
        data_hash: &Digest,
    ) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tree.as_bytes());
        hasher.update(&nonce.to_le_bytes());
        hasher.update(owner.as_bytes());
        hasher.update(delegate.as_bytes());
        hasher.update(data_hash.as_bytes());
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    pub fn to_asset(&self, seq: Seq, status: AssetStatus) -> AssetRow {
        AssetRow {
            tree: self.tree,
            nonce: self.nonce,
            owner: self.owner,
            delegate: self.delegate,
            data_hash: self.data_hash,
            leaf_hash: self.leaf_hash,
            seq,
            status,
        }
    }
}
