use cmt_crypto::{empty_node, MAX_DEPTH};
use cmt_types::node::{self, NodeIndex, ROOT};
use cmt_types::{AccountId, Digest, Seq, Slot};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DecodeError, DecodeResult};
use crate::layout::{self, ByteReader, HEADER_SIZE};

/// Immutable account header, written once when the tree is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHeader {
    pub max_buffer_size: u32,
    pub max_depth: u32,
    pub authority: AccountId,
    pub creation_slot: Slot,
}

/// One ring-buffer slot: the result of a single mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub root: Digest,
    /// Nodes on the mutated leaf's path, leaf first, child of the root last.
    pub path: Vec<Digest>,
    pub index: u32,
}

/// Proof to the highest-index leaf ever appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightmostPath {
    pub leaf: Digest,
    pub proof: Vec<Digest>,
    pub index: u32,
}

/// A ring-buffer slot paired with the sequence number that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub seq: Seq,
    pub root: Digest,
    pub path: Vec<Digest>,
    pub index: u32,
}

/// A node touched by a change log, addressed by complete-tree index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathNodeRow {
    pub node_index: NodeIndex,
    pub level: u32,
    pub digest: Digest,
}

/// Every node one retained mutation touched, root included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeLogNodes {
    pub seq: Seq,
    pub leaf_index: u32,
    pub nodes: Vec<PathNodeRow>,
}

/// Decoded tree account snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeAccount {
    pub header: TreeHeader,
    pub sequence_number: Seq,
    pub active_index: u64,
    pub buffer_size: u64,
    pub change_logs: Vec<ChangeLog>,
    pub rightmost_path: RightmostPath,
    /// Cached upper levels in breadth-first order: `canopy[i]` is node `i + 2`.
    pub canopy: Vec<Digest>,
}

impl TreeAccount {
    /// Decode an account buffer, inferring the canopy from the trailing bytes.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let header = decode_header(data)?;
        let base = expected_size(&header, 0)?;
        if data.len() < base {
            return Err(DecodeError::LengthMismatch {
                expected: base,
                actual: data.len(),
            });
        }
        let trailing = data.len() - base;
        let canopy_depth = layout::canopy_depth_for(trailing, header.max_depth).ok_or(
            DecodeError::CanopyMismatch {
                trailing,
                max_depth: header.max_depth,
            },
        )?;
        Self::decode_body(data, header, canopy_depth)
    }

    /// Decode an account buffer that must carry exactly `canopy_depth` levels of canopy.
    pub fn decode_with_canopy(data: &[u8], canopy_depth: u32) -> DecodeResult<Self> {
        let header = decode_header(data)?;
        if canopy_depth > header.max_depth {
            return Err(DecodeError::InvalidHeader(format!(
                "canopy depth {canopy_depth} exceeds max depth {}",
                header.max_depth
            )));
        }
        let expected = expected_size(&header, canopy_depth)?;
        if data.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Self::decode_body(data, header, canopy_depth)
    }

    fn decode_body(data: &[u8], header: TreeHeader, canopy_depth: u32) -> DecodeResult<Self> {
        let depth = header.max_depth as usize;
        let mut reader = ByteReader::new(&data[HEADER_SIZE..]);

        let sequence_number = reader.read_u64()?;
        let active_index = reader.read_u64()?;
        let buffer_size = reader.read_u64()?;

        let mut change_logs = Vec::with_capacity(header.max_buffer_size as usize);
        for _ in 0..header.max_buffer_size {
            let root = reader.read_digest()?;
            let path = reader.read_digests(depth)?;
            let index = reader.read_u32()?;
            let _padding = reader.read_u32()?;
            change_logs.push(ChangeLog { root, path, index });
        }

        let leaf = reader.read_digest()?;
        let proof = reader.read_digests(depth)?;
        let index = reader.read_u32()?;
        let _padding = reader.read_u32()?;
        let rightmost_path = RightmostPath { leaf, proof, index };

        let canopy = reader.read_digests(layout::canopy_size(canopy_depth) / 32)?;

        let consumed = HEADER_SIZE + reader.position();
        if consumed != data.len() {
            return Err(DecodeError::LengthMismatch {
                expected: consumed,
                actual: data.len(),
            });
        }

        let account = Self {
            header,
            sequence_number,
            active_index,
            buffer_size,
            change_logs,
            rightmost_path,
            canopy,
        };
        account.check_state()?;
        debug!(
            depth = account.header.max_depth,
            buffer = account.header.max_buffer_size,
            seq = account.sequence_number,
            canopy_depth,
            "decoded tree account"
        );
        Ok(account)
    }

    /// A freshly initialized tree: sequence 0, one change log holding the
    /// empty root, and an empty rightmost path.
    pub fn new_empty(
        max_depth: u32,
        max_buffer_size: u32,
        authority: AccountId,
        creation_slot: Slot,
        canopy_depth: u32,
    ) -> DecodeResult<Self> {
        let header = TreeHeader {
            max_buffer_size,
            max_depth,
            authority,
            creation_slot,
        };
        check_header(&header)?;
        if canopy_depth > max_depth {
            return Err(DecodeError::InvalidHeader(format!(
                "canopy depth {canopy_depth} exceeds max depth {max_depth}"
            )));
        }
        expected_size(&header, canopy_depth)?;

        let empty_path: Vec<Digest> = (0..max_depth).map(empty_node).collect();
        let blank = ChangeLog {
            root: Digest::zero(),
            path: vec![Digest::zero(); max_depth as usize],
            index: 0,
        };
        let mut change_logs = vec![blank; max_buffer_size as usize];
        change_logs[0] = ChangeLog {
            root: empty_node(max_depth),
            path: empty_path.clone(),
            index: 0,
        };

        Ok(Self {
            header,
            sequence_number: 0,
            active_index: 0,
            buffer_size: 1,
            change_logs,
            rightmost_path: RightmostPath {
                leaf: Digest::zero(),
                proof: empty_path,
                index: 0,
            },
            canopy: vec![Digest::zero(); layout::canopy_size(canopy_depth) / 32],
        })
    }

    /// Serialize back into the exact on-ledger layout.
    pub fn encode(&self) -> Vec<u8> {
        let depth = self.header.max_depth;
        let capacity = layout::account_size(depth, self.header.max_buffer_size, self.canopy_depth())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(capacity);

        out.extend_from_slice(&self.header.max_buffer_size.to_le_bytes());
        out.extend_from_slice(&self.header.max_depth.to_le_bytes());
        out.extend_from_slice(self.header.authority.as_bytes());
        out.extend_from_slice(&self.header.creation_slot.to_le_bytes());

        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.extend_from_slice(&self.active_index.to_le_bytes());
        out.extend_from_slice(&self.buffer_size.to_le_bytes());

        for log in &self.change_logs {
            out.extend_from_slice(log.root.as_bytes());
            for digest in &log.path {
                out.extend_from_slice(digest.as_bytes());
            }
            out.extend_from_slice(&log.index.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
        }

        out.extend_from_slice(self.rightmost_path.leaf.as_bytes());
        for digest in &self.rightmost_path.proof {
            out.extend_from_slice(digest.as_bytes());
        }
        out.extend_from_slice(&self.rightmost_path.index.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        for digest in &self.canopy {
            out.extend_from_slice(digest.as_bytes());
        }
        out
    }

    pub fn max_depth(&self) -> u32 {
        self.header.max_depth
    }

    pub fn sequence_number(&self) -> Seq {
        self.sequence_number
    }

    pub fn canopy_depth(&self) -> u32 {
        let nodes = self.canopy.len() + 2;
        // nodes == 2^(c+1)
        nodes.trailing_zeros().saturating_sub(1)
    }

    /// Root of the most recent mutation.
    pub fn current_root(&self) -> Digest {
        self.change_logs[self.active_index as usize].root
    }

    /// Canopy digest cached for `node_index`, if the canopy covers it.
    pub fn canopy_node(&self, node_index: NodeIndex) -> Option<Digest> {
        let offset = node_index.checked_sub(2)?;
        self.canopy.get(offset as usize).copied()
    }

    /// Retained change logs, newest first, with their sequence numbers.
    ///
    /// Walks back `buffer_size` slots from `active_index` around the ring.
    pub fn change_log_entries(&self) -> Vec<ChangeLogEntry> {
        let capacity = self.header.max_buffer_size as u64;
        (0..self.buffer_size)
            .map_while(|back| {
                let seq = self.sequence_number.checked_sub(back)?;
                let slot = (self.active_index + capacity - back % capacity) % capacity;
                let log = &self.change_logs[slot as usize];
                Some(ChangeLogEntry {
                    seq,
                    root: log.root,
                    path: log.path.clone(),
                    index: log.index,
                })
            })
            .collect()
    }

    /// Every node touched by each retained change log, keyed by
    /// complete-tree index: path level `l` of leaf `i` is node
    /// `2^(depth - l) + (i >> l)`, and the slot's root is node 1.
    pub fn change_logs_by_node_index(&self) -> Vec<ChangeLogNodes> {
        let depth = self.header.max_depth;
        self.change_log_entries()
            .into_iter()
            .map(|entry| {
                let mut nodes: Vec<PathNodeRow> = entry
                    .path
                    .iter()
                    .enumerate()
                    .map(|(level, digest)| PathNodeRow {
                        node_index: node::path_node_index(depth, level as u32, entry.index),
                        level: level as u32,
                        digest: *digest,
                    })
                    .collect();
                nodes.push(PathNodeRow {
                    node_index: ROOT,
                    level: depth,
                    digest: entry.root,
                });
                ChangeLogNodes {
                    seq: entry.seq,
                    leaf_index: entry.index,
                    nodes,
                }
            })
            .collect()
    }

    /// Advance the ring buffer with a new mutation result and return its
    /// sequence number. Canopy nodes on the path are refreshed.
    pub fn push_change_log(&mut self, root: Digest, path: Vec<Digest>, index: u32) -> DecodeResult<Seq> {
        let depth = self.header.max_depth;
        if path.len() != depth as usize {
            return Err(DecodeError::PathLength {
                expected: depth as usize,
                actual: path.len(),
            });
        }
        let capacity = self.header.max_buffer_size as u64;

        for (level, digest) in path.iter().enumerate() {
            let node_index = node::path_node_index(depth, level as u32, index);
            if let Some(slot) = node_index
                .checked_sub(2)
                .and_then(|offset| self.canopy.get_mut(offset as usize))
            {
                *slot = *digest;
            }
        }

        self.active_index = (self.active_index + 1) % capacity;
        self.change_logs[self.active_index as usize] = ChangeLog { root, path, index };
        self.sequence_number += 1;
        self.buffer_size = (self.buffer_size + 1).min(capacity);
        Ok(self.sequence_number)
    }

    /// Replace the rightmost path after an append.
    pub fn set_rightmost_path(&mut self, path: RightmostPath) -> DecodeResult<()> {
        if path.proof.len() != self.header.max_depth as usize {
            return Err(DecodeError::PathLength {
                expected: self.header.max_depth as usize,
                actual: path.proof.len(),
            });
        }
        self.rightmost_path = path;
        Ok(())
    }

    fn check_state(&self) -> DecodeResult<()> {
        let capacity = self.header.max_buffer_size as u64;
        if self.active_index >= capacity {
            return Err(DecodeError::InvalidState(format!(
                "active index {} outside buffer of {capacity}",
                self.active_index
            )));
        }
        if self.buffer_size > capacity {
            return Err(DecodeError::InvalidState(format!(
                "buffer size {} exceeds capacity {capacity}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

fn decode_header(data: &[u8]) -> DecodeResult<TreeHeader> {
    if data.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }
    let mut reader = ByteReader::new(&data[..HEADER_SIZE]);
    let header = TreeHeader {
        max_buffer_size: reader.read_u32()?,
        max_depth: reader.read_u32()?,
        authority: reader.read_account()?,
        creation_slot: reader.read_u64()?,
    };
    check_header(&header)?;
    Ok(header)
}

fn check_header(header: &TreeHeader) -> DecodeResult<()> {
    if header.max_depth == 0 || header.max_depth > MAX_DEPTH {
        return Err(DecodeError::InvalidHeader(format!(
            "max depth {} outside 1..={MAX_DEPTH}",
            header.max_depth
        )));
    }
    if header.max_buffer_size == 0 {
        return Err(DecodeError::InvalidHeader("max buffer size is zero".into()));
    }
    Ok(())
}

fn expected_size(header: &TreeHeader, canopy_depth: u32) -> DecodeResult<usize> {
    layout::account_size(header.max_depth, header.max_buffer_size, canopy_depth).ok_or_else(|| {
        DecodeError::InvalidHeader(format!(
            "account size overflows for depth {} buffer {}",
            header.max_depth, header.max_buffer_size
        ))
    })
}
