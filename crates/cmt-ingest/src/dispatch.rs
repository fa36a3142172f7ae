use cmt_store::{AssetStatus, SeqWindow, TreeRecord, WriteBatch};
use cmt_types::{AccountId, Seq, Slot};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IngestResult;
use crate::event::{
    extract_event, instruction_discriminator, ChangeLogEvent, Discriminator, EventSchema, LeafSchemaEvent,
    DISCRIMINATOR_LEN,
};

/// Asset program instructions that mutate a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    CreateTree,
    Mint,
    Transfer,
    Delegate,
    Burn,
    Redeem,
    CancelRedeem,
}

impl Instruction {
    pub const ALL: [Instruction; 7] = [
        Instruction::CreateTree,
        Instruction::Mint,
        Instruction::Transfer,
        Instruction::Delegate,
        Instruction::Burn,
        Instruction::Redeem,
        Instruction::CancelRedeem,
    ];

    /// Name as it appears in `Instruction: <Name>` log lines.
    pub fn name(self) -> &'static str {
        match self {
            Instruction::CreateTree => "CreateTree",
            Instruction::Mint => "Mint",
            Instruction::Transfer => "Transfer",
            Instruction::Delegate => "Delegate",
            Instruction::Burn => "Burn",
            Instruction::Redeem => "Redeem",
            Instruction::CancelRedeem => "CancelRedeem",
        }
    }

    pub fn snake_name(self) -> &'static str {
        match self {
            Instruction::CreateTree => "create_tree",
            Instruction::Mint => "mint",
            Instruction::Transfer => "transfer",
            Instruction::Delegate => "delegate",
            Instruction::Burn => "burn",
            Instruction::Redeem => "redeem",
            Instruction::CancelRedeem => "cancel_redeem",
        }
    }

    pub fn discriminator(self) -> Discriminator {
        instruction_discriminator(self.snake_name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ix| ix.name() == name)
    }

    /// Match the leading tag of raw instruction data.
    pub fn from_data(data: &[u8]) -> Option<Self> {
        let tag = data.get(..DISCRIMINATOR_LEN)?;
        Self::ALL.into_iter().find(|ix| ix.discriminator() == tag)
    }

    /// State the asset is left in, `None` for instructions with no asset.
    fn asset_status(self) -> Option<AssetStatus> {
        match self {
            Instruction::CreateTree => None,
            Instruction::Mint | Instruction::Transfer | Instruction::Delegate | Instruction::CancelRedeem => {
                Some(AssetStatus::Active)
            }
            Instruction::Burn => Some(AssetStatus::Burnt),
            Instruction::Redeem => Some(AssetStatus::Redeemed),
        }
    }
}

/// Events emitted while one instruction executed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionEvents {
    pub change_logs: Vec<ChangeLogEvent>,
    pub leaves: Vec<LeafSchemaEvent>,
}

impl InstructionEvents {
    /// Sort a tagged payload into the matching event list. Returns `false`
    /// for payloads of no known schema.
    pub fn push_payload(&mut self, bytes: &[u8]) -> bool {
        if let Some(event) = ChangeLogEvent::from_payload(bytes) {
            self.change_logs.push(event);
            true
        } else if let Some(event) = LeafSchemaEvent::from_payload(bytes) {
            self.leaves.push(event);
            true
        } else {
            false
        }
    }

    /// Same as [`push_payload`](Self::push_payload) for a `Program data:`
    /// log line.
    pub fn push_line(&mut self, line: &str) -> bool {
        if let Some(event) = extract_event::<ChangeLogEvent>(line) {
            self.change_logs.push(event);
            true
        } else if let Some(event) = extract_event::<LeafSchemaEvent>(line) {
            self.leaves.push(event);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.change_logs.is_empty() && self.leaves.is_empty()
    }
}

/// An instruction recovered from a transaction, with its events.
///
/// `instruction` is `None` for a direct tree-program mutation that no asset
/// instruction wraps; those still produce node rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub instruction: Option<Instruction>,
    pub events: InstructionEvents,
}

/// Rows derived from one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub batch: WriteBatch,
    /// Change logs left out because their seq fell outside the window.
    pub skipped: usize,
}

/// Route a parsed instruction to its handler and derive the rows to write.
///
/// Change logs whose seq lies outside `window` are skipped without error, so
/// replaying an overlapping range twice writes nothing new.
pub fn dispatch(parsed: &ParsedInstruction, slot: Slot, window: Option<SeqWindow>) -> IngestResult<Dispatched> {
    let mut out = Dispatched::default();
    let created_slot = match parsed.instruction {
        Some(Instruction::CreateTree) => slot,
        _ => 0,
    };
    let applied = apply_change_logs(&parsed.events.change_logs, slot, created_slot, window, &mut out)?;

    if let Some(status) = parsed.instruction.and_then(Instruction::asset_status) {
        handle_assets(&parsed.events.leaves, &applied, status, &mut out.batch);
    }

    debug!(
        instruction = parsed.instruction.map_or("tree-mutation", Instruction::name),
        slot,
        rows = out.batch.nodes.len(),
        skipped = out.skipped,
        "instruction dispatched"
    );
    Ok(out)
}

/// Node rows and tree shapes for each in-window change log; returns the
/// `(tree, seq)` of every log applied.
fn apply_change_logs(
    logs: &[ChangeLogEvent],
    slot: Slot,
    created_slot: Slot,
    window: Option<SeqWindow>,
    out: &mut Dispatched,
) -> IngestResult<Vec<(AccountId, Seq)>> {
    let mut applied = Vec::with_capacity(logs.len());
    for log in logs {
        log.validate()?;
        if window.is_some_and(|w| !w.contains(log.seq)) {
            debug!(tree = %log.tree, seq = log.seq, "outside replay window; skipping");
            out.skipped += 1;
            continue;
        }
        out.batch.nodes.extend(log.to_rows(slot));
        if !out.batch.trees.iter().any(|t| t.tree == log.tree) {
            out.batch.trees.push(TreeRecord {
                tree: log.tree,
                max_depth: log.depth(),
                max_buffer_size: 0,
                canopy_depth: 0,
                created_slot,
            });
        }
        applied.push((log.tree, log.seq));
    }
    Ok(applied)
}

/// Asset rows for leaves whose tree had an applied change log. The asset
/// takes the newest applied seq of its tree.
fn handle_assets(
    leaves: &[LeafSchemaEvent],
    applied: &[(AccountId, Seq)],
    status: AssetStatus,
    batch: &mut WriteBatch,
) {
    for leaf in leaves {
        let seq = applied
            .iter()
            .filter(|(tree, _)| *tree == leaf.tree)
            .map(|(_, seq)| *seq)
            .max();
        match seq {
            Some(seq) => batch.assets.push(leaf.to_asset(seq, status)),
            None => debug!(tree = %leaf.tree, nonce = leaf.nonce, "leaf without applied change log"),
        }
    }
}
