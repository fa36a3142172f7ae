/// Errors from authenticated tree operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree depth {depth} outside supported range 1..={max}")]
    DepthOutOfRange { depth: u32, max: u32 },

    #[error("leaf index {index} out of range for capacity {capacity}")]
    LeafIndexOutOfRange { index: u64, capacity: u64 },

    #[error("{count} leaves exceed tree capacity {capacity}")]
    TooManyLeaves { count: u64, capacity: u64 },

    #[error("cannot truncate {truncate} levels from a depth-{depth} proof")]
    TruncateBeyondDepth { truncate: u32, depth: u32 },
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
