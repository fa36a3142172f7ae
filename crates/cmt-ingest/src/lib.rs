//! Event ingestion for the concurrent merkle tree mirror.
//!
//! Turns confirmed ledger transactions into node-store rows:
//!
//! 1. [`log`] rebuilds the program call tree from flat log lines
//! 2. [`event`] decodes the tagged change-log and leaf-schema payloads
//! 3. [`dispatch`] routes each recognized instruction to a handler that
//!    derives rows, honouring an optional replay window
//! 4. [`IngestPipeline`] writes each transaction's rows in one upsert
//!
//! [`IngestWorker`] runs a pipeline behind a bounded channel for live
//! ingestion; backfill calls the pipeline directly.

pub mod dispatch;
pub mod error;
pub mod event;
pub mod log;
pub mod pipeline;
pub mod worker;

pub use dispatch::{dispatch, Dispatched, Instruction, InstructionEvents, ParsedInstruction};
pub use error::{IngestError, IngestResult, LogParseError};
pub use event::{
    event_discriminator, extract_event, instruction_discriminator, ChangeLogEvent, Discriminator, EventSchema,
    LeafSchemaEvent, PathNode, DISCRIMINATOR_LEN,
};
pub use log::{parse_transaction_log, FrameOutcome, LogEntry, ProgramFrame, MAX_INVOKE_DEPTH};
pub use pipeline::{IngestPipeline, IngestReport, ProgramIds};
pub use worker::{IngestHandle, IngestStats, IngestWorker};
