use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cmt_types::{AccountId, Digest, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryNodeStore;
use crate::traits::NodeStore;
use crate::types::{AssetRow, NodeRow, SeqSlot, TreeRecord, UpsertStats, WriteBatch};

/// Frame header: 4 bytes length + 4 bytes CRC.
const FRAME_HEADER_SIZE: usize = 8;

/// When the journal is flushed to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every batch.
    EveryWrite,
    /// Flush to the OS and let it decide.
    #[default]
    OsDefault,
}

/// Where node history lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Journal file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    pub sync: SyncMode,
}

impl StoreConfig {
    /// Build the store this config describes.
    pub fn open(&self) -> StoreResult<Arc<dyn NodeStore>> {
        match &self.path {
            Some(path) => Ok(Arc::new(JournaledNodeStore::open(path, self.sync)?)),
            None => Ok(Arc::new(InMemoryNodeStore::new())),
        }
    }
}

/// Durable node store: an append-only journal of write batches in front of
/// an [`InMemoryNodeStore`].
///
/// On-disk frame format, one frame per batch:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WriteBatch)]
/// ```
///
/// A batch is journaled before it becomes visible to readers. On open the
/// journal is replayed front-to-back; frames failing the CRC are skipped and
/// a torn tail is cut off so later appends start on a frame boundary. A
/// failed append is cut off the same way before the error is returned.
pub struct JournaledNodeStore {
    path: PathBuf,
    sync: SyncMode,
    writer: Mutex<JournalFile>,
    memory: InMemoryNodeStore,
}

/// The open journal and the length of its last complete frame.
struct JournalFile {
    file: File,
    committed: u64,
}

impl JournalFile {
    fn append(&mut self, frame: &[u8], sync: SyncMode) -> StoreResult<()> {
        let on_disk = self.file.metadata()?.len();
        if on_disk != self.committed {
            warn!(committed = self.committed, on_disk, "discarding bytes past the last complete frame");
            self.file.set_len(self.committed)?;
        }
        if let Err(e) = self.write(frame, sync) {
            if let Err(rollback) = self.file.set_len(self.committed) {
                warn!(error = %rollback, "could not cut partial frame; retrying on next append");
            }
            return Err(e.into());
        }
        self.committed += frame.len() as u64;
        Ok(())
    }

    fn write(&mut self, frame: &[u8], sync: SyncMode) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        if sync == SyncMode::EveryWrite {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl JournaledNodeStore {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: &Path, sync: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let memory = InMemoryNodeStore::new();
        let valid_len = if path.exists() {
            let (batches, valid_len) = recover(path)?;
            for batch in &batches {
                memory.upsert(batch)?;
            }
            info!(path = %path.display(), batches = batches.len(), "journal replayed");
            Some(valid_len)
        } else {
            None
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut committed = file.metadata()?.len();
        if let Some(valid_len) = valid_len {
            if valid_len < committed {
                warn!(valid_len, file_len = committed, "dropping torn journal tail");
                file.set_len(valid_len)?;
                committed = valid_len;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            sync,
            writer: Mutex::new(JournalFile { file, committed }),
            memory,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode `batch` as one length- and CRC-prefixed frame.
fn encode_frame(batch: &WriteBatch) -> StoreResult<Vec<u8>> {
    let payload = bincode::serialize(batch).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("batch of {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read every intact batch and the byte length of the usable prefix.
fn recover(path: &Path) -> StoreResult<(Vec<WriteBatch>, u64)> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut batches = Vec::new();
    let mut offset = 0usize;
    while offset + FRAME_HEADER_SIZE <= data.len() {
        let header = &data[offset..offset + FRAME_HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + FRAME_HEADER_SIZE;
        if length == 0 || start + length > data.len() {
            warn!(offset, length, file_len = data.len(), "invalid journal frame; stopping recovery");
            break;
        }

        let payload = &data[start..start + length];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping frame");
        } else {
            match bincode::deserialize::<WriteBatch>(payload) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(offset, error = %e, "undecodable journal frame; skipping"),
            }
        }
        offset = start + length;
    }

    Ok((batches, offset as u64))
}

impl NodeStore for JournaledNodeStore {
    fn upsert(&self, batch: &WriteBatch) -> StoreResult<UpsertStats> {
        if batch.is_empty() {
            return Ok(UpsertStats::default());
        }
        // Holding the writer across apply keeps journal order equal to
        // apply order.
        let frame = encode_frame(batch)?;
        let mut writer = self.writer.lock().expect("lock poisoned");
        writer.append(&frame, self.sync)?;
        let bytes = frame.len();
        let stats = self.memory.upsert(batch)?;
        debug!(bytes, inserted = stats.nodes_inserted, "journal append");
        Ok(stats)
    }

    fn current_row(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Option<NodeRow>> {
        self.memory.current_row(tree, node_index)
    }

    fn node_history(&self, tree: &AccountId, node_index: NodeIndex) -> StoreResult<Vec<NodeRow>> {
        self.memory.node_history(tree, node_index)
    }

    fn sequences(&self, tree: &AccountId) -> StoreResult<Vec<SeqSlot>> {
        self.memory.sequences(tree)
    }

    fn max_sequence(&self, tree: &AccountId) -> StoreResult<Option<SeqSlot>> {
        self.memory.max_sequence(tree)
    }

    fn current_leaves(&self, tree: &AccountId) -> StoreResult<Vec<NodeRow>> {
        self.memory.current_leaves(tree)
    }

    fn find_leaf(&self, tree: &AccountId, leaf_hash: &Digest) -> StoreResult<Option<NodeRow>> {
        self.memory.find_leaf(tree, leaf_hash)
    }

    fn tree(&self, tree: &AccountId) -> StoreResult<Option<TreeRecord>> {
        self.memory.tree(tree)
    }

    fn trees(&self) -> StoreResult<Vec<TreeRecord>> {
        self.memory.trees()
    }

    fn asset(&self, tree: &AccountId, nonce: u64) -> StoreResult<Option<AssetRow>> {
        self.memory.asset(tree, nonce)
    }

    fn row_count(&self) -> StoreResult<usize> {
        self.memory.row_count()
    }
}

impl std::fmt::Debug for JournaledNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournaledNodeStore")
            .field("path", &self.path)
            .field("sync", &self.sync)
            .field("memory", &self.memory)
            .finish()
    }
}
