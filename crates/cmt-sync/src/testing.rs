//! A simulated ledger that mutates one tree and records every mutation as a
//! block on an [`InMemoryChain`].

use std::sync::Arc;

use cmt_account::TreeAccount;
use cmt_crypto::AuthenticatedTree;
use cmt_ingest::{ChangeLogEvent, EventSchema, Instruction, LeafSchemaEvent, ProgramIds};
use cmt_types::{AccountId, Block, Digest, Slot, Transaction};

use crate::source::InMemoryChain;

pub(crate) const CREATION_SLOT: Slot = 10;

pub(crate) struct SimLedger {
    pub tree_id: AccountId,
    pub programs: ProgramIds,
    pub tree: AuthenticatedTree,
    pub account: TreeAccount,
    pub chain: Arc<InMemoryChain>,
    pub transactions: Vec<Transaction>,
    slot: Slot,
    next_nonce: u64,
}

impl SimLedger {
    /// A ledger holding one freshly created tree.
    pub fn new(depth: u32, buffer: u32) -> Self {
        let tree_id = AccountId::new([0x3e; 32]);
        let account = TreeAccount::new_empty(depth, buffer, AccountId::new([0xad; 32]), CREATION_SLOT, 0).unwrap();
        let tree = AuthenticatedTree::empty(depth).unwrap();
        let mut ledger = Self {
            tree_id,
            programs: ProgramIds::default(),
            tree,
            account,
            chain: Arc::new(InMemoryChain::new()),
            transactions: Vec::new(),
            slot: CREATION_SLOT,
            next_nonce: 0,
        };
        let path = ledger.tree.path_nodes(0).unwrap();
        let create = ChangeLogEvent::from_path(tree_id, 0, 0, ledger.tree.root(), &path);
        ledger.record(Instruction::CreateTree, &create, None);
        ledger
    }

    pub fn owner() -> AccountId {
        AccountId::new([0x0a; 32])
    }

    /// Append a new asset leaf.
    pub fn mint(&mut self) -> Transaction {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        let leaf = LeafSchemaEvent::new(
            self.tree_id,
            nonce,
            Self::owner(),
            Self::owner(),
            Digest::from_hash([nonce as u8 + 1; 32]),
        );
        self.mutate(Instruction::Mint, nonce as u32, leaf)
    }

    /// Move asset `nonce` to `new_owner`.
    pub fn transfer(&mut self, nonce: u64, new_owner: AccountId) -> Transaction {
        let data_hash = Digest::from_hash([nonce as u8 + 1; 32]);
        let leaf = LeafSchemaEvent::new(self.tree_id, nonce, new_owner, new_owner, data_hash);
        self.mutate(Instruction::Transfer, nonce as u32, leaf)
    }

    fn mutate(&mut self, instruction: Instruction, index: u32, leaf: LeafSchemaEvent) -> Transaction {
        self.tree.update(index, leaf.leaf_hash).unwrap();
        let (root, path, index) = self.tree.change_log(index).unwrap();
        let seq = self.account.push_change_log(root, path.clone(), index).unwrap();
        let event = ChangeLogEvent::from_path(self.tree_id, seq, index, root, &path);
        self.record(instruction, &event, Some(&leaf))
    }

    fn record(&mut self, instruction: Instruction, event: &ChangeLogEvent, leaf: Option<&LeafSchemaEvent>) -> Transaction {
        self.slot += 1;
        let asset = self.programs.asset_program.to_hex();
        let tree_program = self.programs.tree_program.to_hex();
        let mut log_messages = vec![
            format!("Program {asset} invoke [1]"),
            format!("Program log: Instruction: {}", instruction.name()),
            format!("Program {tree_program} invoke [2]"),
            event.to_log_line().unwrap(),
            format!("Program {tree_program} success"),
        ];
        if let Some(leaf) = leaf {
            log_messages.push(leaf.to_log_line().unwrap());
        }
        log_messages.push(format!("Program {asset} success"));

        let tx = Transaction {
            signature: format!("sig-{}", self.slot),
            slot: self.slot,
            error: None,
            account_keys: vec![self.programs.asset_program, self.programs.tree_program, self.tree_id],
            log_messages,
            instructions: vec![],
            inner_instructions: vec![],
        };
        self.chain.push_block(Block {
            slot: self.slot,
            transactions: vec![tx.clone()],
        });
        self.chain.set_account(self.tree_id, self.account.encode());
        self.transactions.push(tx.clone());
        tx
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}
