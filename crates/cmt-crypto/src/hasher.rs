use std::sync::OnceLock;

use cmt_types::Digest;

/// Deepest tree the mirror supports. Leaf indices must fit in a `u32` and the
/// ledger program rejects deeper trees.
pub const MAX_DEPTH: u32 = 30;

/// Levels held by the empty-subtree table (one past the deepest root, with
/// headroom for callers that ask for a level above the root).
const EMPTY_LEVELS: usize = 33;

static EMPTY_NODES: OnceLock<[Digest; EMPTY_LEVELS]> = OnceLock::new();

/// Hash two child digests into their parent: `BLAKE3(left || right)`.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_hash(*hasher.finalize().as_bytes())
}

/// Digest of an all-empty subtree whose root sits at `level`.
///
/// Level 0 is the zero leaf; level `i + 1` is `hash_pair(e_i, e_i)`. The
/// table is computed once per process.
///
/// # Panics
///
/// Panics if `level` exceeds 32.
pub fn empty_node(level: u32) -> Digest {
    empty_table()[level as usize]
}

fn empty_table() -> &'static [Digest; EMPTY_LEVELS] {
    EMPTY_NODES.get_or_init(|| {
        let mut table = [Digest::zero(); EMPTY_LEVELS];
        for level in 1..EMPTY_LEVELS {
            table[level] = hash_pair(&table[level - 1], &table[level - 1]);
        }
        table
    })
}
