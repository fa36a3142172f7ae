use cmt_account::TreeAccount;
use cmt_store::{gaps_between, GapKind, GapRecord, NodeStore};
use cmt_types::{AccountId, Slot};
use tracing::debug;

use crate::error::SyncResult;

/// Finds the sequence ranges a tree's stored history is missing, measured
/// against a ledger snapshot of the tree account.
pub struct GapDetector;

impl GapDetector {
    /// Every gap in `tree`'s history, oldest first.
    ///
    /// - **Leading**: sequences below the first stored one, bracketed by the
    ///   tree's creation slot. An empty store is one leading gap covering the
    ///   whole ledger history.
    /// - **Internal**: adjacent stored sequences more than one apart.
    /// - **Forward**: the ledger's counter is ahead of the newest stored
    ///   sequence; bracketed by that sequence's slot and `current_slot`.
    pub fn detect<S: NodeStore + ?Sized>(
        store: &S,
        tree: &AccountId,
        account: &TreeAccount,
        current_slot: Slot,
    ) -> SyncResult<Vec<GapRecord>> {
        let ledger_seq = account.sequence_number();
        let creation_slot = account.header.creation_slot;
        let sequences = store.sequences(tree)?;

        let (Some(first), Some(last)) = (sequences.first(), sequences.last()) else {
            debug!(tree = %tree, ledger_seq, "no stored history");
            return Ok(vec![GapRecord {
                prev_seq: 0,
                curr_seq: ledger_seq + 1,
                prev_slot: creation_slot,
                curr_slot: current_slot,
                kind: GapKind::Leading,
            }]);
        };

        let mut gaps = Vec::new();
        if first.seq > 0 {
            gaps.push(GapRecord {
                prev_seq: 0,
                curr_seq: first.seq,
                prev_slot: creation_slot,
                curr_slot: first.slot,
                kind: GapKind::Leading,
            });
        }
        gaps.extend(gaps_between(&sequences));
        if ledger_seq > last.seq {
            gaps.push(GapRecord {
                prev_seq: last.seq,
                curr_seq: ledger_seq,
                prev_slot: last.slot,
                curr_slot: current_slot,
                kind: GapKind::Forward,
            });
        } else if ledger_seq < last.seq {
            debug!(tree = %tree, ledger_seq, stored = last.seq, "snapshot older than stored history");
        }

        if !gaps.is_empty() {
            debug!(tree = %tree, gaps = gaps.len(), ledger_seq, "gaps detected");
        }
        Ok(gaps)
    }
}
