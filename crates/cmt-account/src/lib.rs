//! On-ledger concurrent merkle tree account layout.
//!
//! The ledger stores a tree as one fixed-width account with no
//! self-describing framing:
//!
//! ```text
//! [header      48 B] max_buffer_size u32 | max_depth u32 | authority 32 B | creation_slot u64
//! [tree state  24 B] sequence_number u64 | active_index u64 | buffer_size u64
//! [ring buffer     ] max_buffer_size x { root 32 B | path max_depth x 32 B | index u32 | pad u32 }
//! [rightmost path  ] leaf 32 B | proof max_depth x 32 B | index u32 | pad u32
//! [canopy (opt.)   ] (2^(c+1) - 2) x 32 B
//! ```
//!
//! All integers are little-endian. Decoding consumes exactly the expected
//! number of bytes or fails; a buffer is never partially interpreted.

pub mod account;
pub mod error;
pub mod layout;

pub use account::{ChangeLog, ChangeLogEntry, ChangeLogNodes, PathNodeRow, RightmostPath, TreeAccount, TreeHeader};
pub use error::{DecodeError, DecodeResult};
pub use layout::{account_size, canopy_size, change_log_size, HEADER_SIZE, TREE_STATE_SIZE};
