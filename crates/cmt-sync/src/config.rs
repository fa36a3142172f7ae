use std::time::Duration;

use cmt_types::AccountId;
use serde::{Deserialize, Serialize};

/// Reconciliation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tree accounts to mirror.
    pub trees: Vec<AccountId>,
    pub poll_interval_ms: u64,
    /// Validation attempts after a repair before the tree is marked
    /// inconsistent.
    pub validation_retries: u32,
    /// Wait before the first re-check; attempt `n` waits `n` times this.
    pub retry_backoff_ms: u64,
    /// Seed an empty store from the account's change-log buffer.
    pub seed_from_account: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trees: Vec::new(),
            poll_interval_ms: 5_000,
            validation_retries: 3,
            retry_backoff_ms: 500,
            seed_from_account: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Wait before validation attempt `attempt` (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }
}
