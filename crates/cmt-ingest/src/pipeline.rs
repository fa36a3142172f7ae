use std::sync::Arc;

use cmt_store::{NodeStore, SeqWindow, WriteBatch};
use cmt_types::{AccountId, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::{dispatch, Instruction, InstructionEvents, ParsedInstruction};
use crate::error::IngestResult;
use crate::log::{parse_transaction_log, ProgramFrame};

/// Program ids the pipeline listens to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramIds {
    /// Owns the tree accounts and emits change logs.
    pub tree_program: AccountId,
    /// Issues asset instructions and emits leaf schemas.
    pub asset_program: AccountId,
    /// Carries events as inner-instruction data.
    pub log_wrapper: AccountId,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            tree_program: AccountId::new([0xc1; 32]),
            asset_program: AccountId::new([0xa5; 32]),
            log_wrapper: AccountId::new([0x10; 32]),
        }
    }
}

impl ProgramIds {
    fn is_tracked(&self, program: &AccountId) -> bool {
        *program == self.tree_program || *program == self.asset_program
    }
}

/// What one transaction contributed to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub instructions: usize,
    pub rows_inserted: usize,
    pub rows_duplicate: usize,
    pub assets_updated: usize,
    /// Change logs outside the replay window.
    pub skipped: usize,
}

/// Turns ledger transactions into store rows.
///
/// Accepts either the log representation or the compiled-instruction
/// representation of a transaction; both feed the same dispatch. Everything
/// one transaction produces goes to the store in a single upsert.
pub struct IngestPipeline {
    store: Arc<dyn NodeStore>,
    programs: ProgramIds,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn NodeStore>, programs: ProgramIds) -> Self {
        Self { store, programs }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn programs(&self) -> &ProgramIds {
        &self.programs
    }

    /// Ingest through whichever representation the transaction carries,
    /// preferring logs.
    ///
    /// Failed transactions contribute nothing.
    pub fn ingest_transaction(&self, tx: &Transaction, window: Option<SeqWindow>) -> IngestResult<IngestReport> {
        if !tx.is_success() {
            debug!(signature = %tx.signature, "failed transaction ignored");
            return Ok(IngestReport::default());
        }
        if tx.log_messages.is_empty() {
            self.ingest_instructions(tx, window)
        } else {
            self.ingest_logs(tx, window)
        }
    }

    pub fn ingest_logs(&self, tx: &Transaction, window: Option<SeqWindow>) -> IngestResult<IngestReport> {
        let parsed = self.parse_logs(tx)?;
        self.commit(tx, &parsed, window)
    }

    pub fn ingest_instructions(&self, tx: &Transaction, window: Option<SeqWindow>) -> IngestResult<IngestReport> {
        let parsed = self.parse_instructions(tx);
        self.commit(tx, &parsed, window)
    }

    /// Instructions of tracked programs found in the transaction's logs.
    ///
    /// A tracked frame owns the events of every frame nested inside it.
    pub fn parse_logs(&self, tx: &Transaction) -> IngestResult<Vec<ParsedInstruction>> {
        let frames = parse_transaction_log(&tx.log_messages)?;
        let mut out = Vec::new();
        for frame in &frames {
            self.visit_frame(frame, &mut out);
        }
        Ok(out)
    }

    fn visit_frame(&self, frame: &ProgramFrame, out: &mut Vec<ParsedInstruction>) {
        let tracked = frame.program_id().is_some_and(|id| self.programs.is_tracked(&id));
        if !tracked {
            for child in frame.children() {
                self.visit_frame(child, out);
            }
            return;
        }
        if !frame.is_success() {
            debug!(program = %frame.program, "failed frame ignored");
            return;
        }

        let instruction = frame.instruction_name().and_then(Instruction::from_name);
        let mut events = InstructionEvents::default();
        for payload in frame.data_payloads() {
            if !events.push_line(payload) {
                debug!(program = %frame.program, "unrecognized data line skipped");
            }
        }
        if instruction.is_some() || !events.is_empty() {
            out.push(ParsedInstruction { instruction, events });
        }
    }

    /// Top-level instructions of tracked programs, with events taken from
    /// their log-wrapper inner instructions.
    pub fn parse_instructions(&self, tx: &Transaction) -> Vec<ParsedInstruction> {
        let mut out = Vec::new();
        for (position, ix) in tx.instructions.iter().enumerate() {
            let Some(program) = tx.program_id(ix) else {
                continue;
            };
            if !self.programs.is_tracked(&program) {
                continue;
            }
            let instruction = Instruction::from_data(&ix.data);
            let mut events = InstructionEvents::default();
            for inner in tx.inner_for(position) {
                if tx.program_id(inner) != Some(self.programs.log_wrapper) {
                    continue;
                }
                if !events.push_payload(&inner.data) {
                    debug!(signature = %tx.signature, position, "unrecognized wrapper payload skipped");
                }
            }
            if instruction.is_some() || !events.is_empty() {
                out.push(ParsedInstruction { instruction, events });
            }
        }
        out
    }

    fn commit(&self, tx: &Transaction, parsed: &[ParsedInstruction], window: Option<SeqWindow>) -> IngestResult<IngestReport> {
        let mut batch = WriteBatch::default();
        let mut report = IngestReport {
            instructions: parsed.len(),
            ..Default::default()
        };
        for instruction in parsed {
            let dispatched = dispatch(instruction, tx.slot, window)?;
            report.skipped += dispatched.skipped;
            batch.extend(dispatched.batch);
        }
        if batch.is_empty() {
            return Ok(report);
        }

        let stats = self.store.upsert(&batch)?;
        report.rows_inserted = stats.nodes_inserted;
        report.rows_duplicate = stats.nodes_duplicate;
        report.assets_updated = stats.assets_updated;
        debug!(
            signature = %tx.signature,
            slot = tx.slot,
            inserted = stats.nodes_inserted,
            duplicate = stats.nodes_duplicate,
            "transaction ingested"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("programs", &self.programs)
            .finish_non_exhaustive()
    }
}
