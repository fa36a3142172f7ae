use thiserror::Error;

/// Errors from decoding (or building) a tree account buffer.
///
/// Every variant is fatal for the buffer at hand.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("account buffer too short: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("account length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("trailing {trailing} bytes do not form a canopy for depth {max_depth}")]
    CanopyMismatch { trailing: usize, max_depth: u32 },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid tree state: {0}")]
    InvalidState(String),

    #[error("read past end of buffer at offset {offset}")]
    Truncated { offset: usize },

    #[error("path length mismatch: expected {expected}, got {actual}")]
    PathLength { expected: usize, actual: usize },
}

pub type DecodeResult<T> = Result<T, DecodeError>;
