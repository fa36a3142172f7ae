use cmt_types::{AccountId, Digest};

use crate::error::{DecodeError, DecodeResult};

/// max_buffer_size (4) + max_depth (4) + authority (32) + creation_slot (8).
pub const HEADER_SIZE: usize = 48;
/// sequence_number (8) + active_index (8) + buffer_size (8).
pub const TREE_STATE_SIZE: usize = 24;

const DIGEST_SIZE: usize = 32;

/// Bytes of one ring-buffer entry, also the size of the rightmost path.
pub fn change_log_size(max_depth: u32) -> usize {
    DIGEST_SIZE + DIGEST_SIZE * max_depth as usize + 4 + 4
}

/// Bytes of a canopy caching the top `canopy_depth` levels below the root.
pub fn canopy_size(canopy_depth: u32) -> usize {
    ((1usize << (canopy_depth + 1)) - 2) * DIGEST_SIZE
}

/// Exact account length for the given shape, `None` on overflow.
pub fn account_size(max_depth: u32, max_buffer_size: u32, canopy_depth: u32) -> Option<usize> {
    let entry = change_log_size(max_depth);
    let ring = entry.checked_mul(max_buffer_size as usize)?;
    HEADER_SIZE
        .checked_add(TREE_STATE_SIZE)?
        .checked_add(ring)?
        .checked_add(entry)?
        .checked_add(canopy_size(canopy_depth))
}

/// Canopy depth whose size is exactly `trailing` bytes.
pub(crate) fn canopy_depth_for(trailing: usize, max_depth: u32) -> Option<u32> {
    (0..=max_depth).find(|c| canopy_size(*c) == trailing)
}

/// Forward-only little-endian reader over a borrowed buffer.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let offset = self.pos;
        self.take(N)?
            .try_into()
            .map_err(|_| DecodeError::Truncated { offset })
    }

    pub(crate) fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub(crate) fn read_digest(&mut self) -> DecodeResult<Digest> {
        Ok(Digest::from_hash(self.take_array()?))
    }

    pub(crate) fn read_account(&mut self) -> DecodeResult<AccountId> {
        Ok(AccountId::new(self.take_array()?))
    }

    pub(crate) fn read_digests(&mut self, count: usize) -> DecodeResult<Vec<Digest>> {
        (0..count).map(|_| self.read_digest()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_for_depth_three() {
        assert_eq!(change_log_size(3), 32 + 96 + 8);
        assert_eq!(canopy_size(0), 0);
        assert_eq!(canopy_size(1), 64);
        assert_eq!(canopy_size(2), 192);
        assert_eq!(
            account_size(3, 8, 0),
            Some(HEADER_SIZE + TREE_STATE_SIZE + 8 * 136 + 136)
        );
    }

    #[test]
    fn canopy_depth_inference() {
        assert_eq!(canopy_depth_for(0, 3), Some(0));
        assert_eq!(canopy_depth_for(192, 3), Some(2));
        assert_eq!(canopy_depth_for(100, 3), None);
        // Deeper than the tree is never a canopy.
        assert_eq!(canopy_depth_for(canopy_size(4), 3), None);
    }

    #[test]
    fn reader_stops_at_end() {
        let data = [1u8, 0, 0, 0, 2];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.position(), 4);
        assert_eq!(r.read_u32(), Err(DecodeError::Truncated { offset: 4 }));
    }
}
