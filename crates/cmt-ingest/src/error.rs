use cmt_store::StoreError;

/// Structural problems in a transaction's log lines.
///
/// Fatal for the transaction being parsed, never for the caller's scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogParseError {
    /// A success/failed marker with no frame open.
    #[error("line {line}: program {program} closed with no open frame")]
    UnexpectedClose { line: usize, program: String },

    /// A success/failed marker naming a different program than the open frame.
    #[error("line {line}: expected {expected} to close, found {found}")]
    MismatchedClose {
        line: usize,
        expected: String,
        found: String,
    },

    /// An invoke marker whose depth is not one below its parent.
    #[error("line {line}: invoke depth {found}, expected {expected}")]
    DepthMismatch { line: usize, expected: u32, found: u32 },

    /// An invoke marker nested deeper than the parser follows.
    #[error("line {line}: invoke depth {depth} exceeds limit {max}")]
    TooDeep { line: usize, depth: u32, max: u32 },

    /// Log lines ended with a frame still open.
    #[error("program {program} at depth {depth} never closed")]
    Unclosed { program: String, depth: u32 },

    /// A marker line that does not parse.
    #[error("line {line}: malformed marker: {text}")]
    Malformed { line: usize, text: String },
}

/// Errors from the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("log parse error: {0}")]
    LogParse(#[from] LogParseError),

    /// An event decoded but is internally inconsistent.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The ingest worker's channel is closed.
    #[error("ingest worker stopped")]
    WorkerStopped,
}

/// Result alias for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;
