use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use cmt_types::{AccountId, Block, Slot, Transaction};

use crate::error::{SyncError, SyncResult};

/// Read access to the ledger.
///
/// Every call may suspend on the network. Implementations return
/// `Ok(None)` from [`block`](Self::block) for a slot that produced no block
/// and [`SyncError::SlotUnavailable`] for a slot pruned from history.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    async fn account_bytes(&self, account: &AccountId) -> SyncResult<Vec<u8>>;

    async fn block(&self, slot: Slot) -> SyncResult<Option<Block>>;

    async fn current_slot(&self) -> SyncResult<Slot>;

    async fn transaction(&self, signature: &str) -> SyncResult<Option<Transaction>>;
}

#[derive(Default)]
struct ChainState {
    slot: Slot,
    accounts: HashMap<AccountId, Vec<u8>>,
    blocks: BTreeMap<Slot, Block>,
    /// Slots below this have been pruned.
    retained_from: Slot,
}

/// A ledger held in memory, for tests and local simulation.
pub struct InMemoryChain {
    state: RwLock<ChainState>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
        }
    }

    /// Overwrite an account's bytes.
    pub fn set_account(&self, account: AccountId, bytes: Vec<u8>) {
        let mut state = self.state.write().expect("lock poisoned");
        state.accounts.insert(account, bytes);
    }

    /// Append a block and move the current slot up to it.
    pub fn push_block(&self, block: Block) {
        let mut state = self.state.write().expect("lock poisoned");
        state.slot = state.slot.max(block.slot);
        state.blocks.insert(block.slot, block);
    }

    /// Move the current slot forward without producing blocks.
    pub fn advance_to(&self, slot: Slot) {
        let mut state = self.state.write().expect("lock poisoned");
        state.slot = state.slot.max(slot);
    }

    /// Drop every block below `slot`.
    pub fn prune_before(&self, slot: Slot) {
        let mut state = self.state.write().expect("lock poisoned");
        state.retained_from = state.retained_from.max(slot);
        state.blocks = state.blocks.split_off(&slot);
    }

    pub fn block_count(&self) -> usize {
        self.state.read().expect("lock poisoned").blocks.len()
    }
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryChain")
            .field("slot", &state.slot)
            .field("accounts", &state.accounts.len())
            .field("blocks", &state.blocks.len())
            .finish()
    }
}

#[async_trait]
impl ChainDataSource for InMemoryChain {
    async fn account_bytes(&self, account: &AccountId) -> SyncResult<Vec<u8>> {
        let state = self.state.read().expect("lock poisoned");
        state
            .accounts
            .get(account)
            .cloned()
            .ok_or(SyncError::AccountNotFound(*account))
    }

    async fn block(&self, slot: Slot) -> SyncResult<Option<Block>> {
        let state = self.state.read().expect("lock poisoned");
        if slot < state.retained_from {
            return Err(SyncError::SlotUnavailable { slot });
        }
        Ok(state.blocks.get(&slot).cloned())
    }

    async fn current_slot(&self) -> SyncResult<Slot> {
        Ok(self.state.read().expect("lock poisoned").slot)
    }

    async fn transaction(&self, signature: &str) -> SyncResult<Option<Transaction>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .blocks
            .values()
            .flat_map(|block| block.transactions.iter())
            .find(|tx| tx.signature == signature)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(signature: &str, slot: Slot) -> Transaction {
        Transaction {
            signature: signature.into(),
            slot,
            error: None,
            account_keys: vec![],
            log_messages: vec![],
            instructions: vec![],
            inner_instructions: vec![],
        }
    }

    #[tokio::test]
    async fn blocks_skips_and_pruning() {
        let chain = InMemoryChain::new();
        chain.push_block(Block {
            slot: 3,
            transactions: vec![tx("a", 3)],
        });
        chain.push_block(Block {
            slot: 5,
            transactions: vec![tx("b", 5)],
        });
        assert_eq!(chain.current_slot().await.unwrap(), 5);
        assert!(chain.block(4).await.unwrap().is_none());
        assert_eq!(chain.transaction("b").await.unwrap().unwrap().slot, 5);

        chain.prune_before(4);
        assert!(matches!(chain.block(3).await, Err(SyncError::SlotUnavailable { slot: 3 })));
        assert!(chain.block(5).await.unwrap().is_some());
        assert!(chain.transaction("a").await.unwrap().is_none());
        assert_eq!(chain.block_count(), 1);

        chain.advance_to(9);
        assert_eq!(chain.current_slot().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn missing_account_is_an_error() {
        let chain = InMemoryChain::new();
        let id = AccountId::new([1; 32]);
        assert!(matches!(chain.account_bytes(&id).await, Err(SyncError::AccountNotFound(_))));
        chain.set_account(id, vec![1, 2, 3]);
        assert_eq!(chain.account_bytes(&id).await.unwrap(), vec![1, 2, 3]);
    }
}
