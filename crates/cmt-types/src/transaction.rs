use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::node::Slot;

/// One instruction of a transaction, with accounts referenced by position in
/// [`Transaction::account_keys`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub program_index: usize,
    pub accounts: Vec<usize>,
    pub data: Vec<u8>,
}

/// Instructions invoked from within top-level instruction `index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerInstructions {
    pub index: usize,
    pub instructions: Vec<CompiledInstruction>,
}

/// A confirmed ledger transaction as delivered by the chain data source.
///
/// Carries both representations the ingestion pipeline accepts: the ordered
/// log lines and the compiled instruction lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub signature: String,
    pub slot: Slot,
    /// `Some` when the transaction failed on the ledger.
    pub error: Option<String>,
    pub account_keys: Vec<AccountId>,
    pub log_messages: Vec<String>,
    pub instructions: Vec<CompiledInstruction>,
    pub inner_instructions: Vec<InnerInstructions>,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Resolve an instruction's program id through the account key table.
    pub fn program_id(&self, ix: &CompiledInstruction) -> Option<AccountId> {
        self.account_keys.get(ix.program_index).copied()
    }

    /// Resolve an instruction's account list through the account key table.
    pub fn instruction_accounts(&self, ix: &CompiledInstruction) -> Vec<AccountId> {
        ix.accounts
            .iter()
            .filter_map(|i| self.account_keys.get(*i).copied())
            .collect()
    }

    /// `true` if `account` appears anywhere in the account key table.
    pub fn touches(&self, account: &AccountId) -> bool {
        self.account_keys.contains(account)
    }

    /// Inner instructions recorded for top-level instruction `index`.
    pub fn inner_for(&self, index: usize) -> &[CompiledInstruction] {
        self.inner_instructions
            .iter()
            .find(|inner| inner.index == index)
            .map(|inner| inner.instructions.as_slice())
            .unwrap_or(&[])
    }
}

/// A confirmed block: every transaction landed at `slot`, in ledger order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub slot: Slot,
    pub transactions: Vec<Transaction>,
}
