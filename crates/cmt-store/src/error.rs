use cmt_types::{AccountId, NodeIndex};

/// Errors from node store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No tree record has been registered for this account.
    #[error("unknown tree {0}")]
    UnknownTree(AccountId),

    /// The node index is not a leaf of the tree.
    #[error("node {node_index} is not a leaf of a depth-{depth} tree")]
    NotALeaf { node_index: NodeIndex, depth: u32 },

    /// The node index lies outside the tree.
    #[error("node {node_index} is outside a depth-{depth} tree")]
    NodeOutOfRange { node_index: NodeIndex, depth: u32 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the journal file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
