//! The ledger's in-memory entities: the stored balance and the append-only
//! transaction rows it must always sum to.
//!
//! [`Balance`] keeps the amount it was loaded with next to any updates made
//! to it, which lets the UPDATE be made conditional on the loaded value. A
//! write only succeeds if nobody else changed the balance between our read
//! and our write; a lost race surfaces as a conflict and the whole operation
//! is retried against fresh state. That compare-and-swap is what makes
//! check-then-debit atomic as a unit, even across service instances.

use crate::btc;
use crate::ln::PaymentHash;
use crate::user;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("insufficient balance")]
pub struct InsufficientBalance;

#[derive(Debug, Clone, Default)]
pub struct Balance {
    user_id: user::Id,
    original_amount: btc::Sats,
    amount: btc::Sats,
}

impl Balance {
    pub fn new(user_id: user::Id, amount: btc::Sats) -> Self {
        Self {
            user_id,
            original_amount: amount,
            amount,
        }
    }

    pub fn user_id(&self) -> user::Id {
        self.user_id
    }

    pub fn original_amount(&self) -> btc::Sats {
        self.original_amount
    }

    pub fn amount(&self) -> btc::Sats {
        self.amount
    }

    pub fn changed(&self) -> bool {
        self.original_amount != self.amount
    }

    pub fn credit(&mut self, amount: btc::Sats) {
        self.amount += amount;
    }

    /// Checks and debits as one step, so there is no window between the
    /// balance check and the deduction.
    pub fn debit(&mut self, amount: btc::Sats) -> Result<(), InsufficientBalance> {
        if amount > self.amount {
            return Err(InsufficientBalance);
        }
        self.amount -= amount;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Id(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// What applying a settlement observation did. `AlreadyApplied` is the
/// normal answer for every observer after the first; it must be treated as
/// success and must not credit again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Applied,
    AlreadyApplied,
}

/// One row of the transaction log. Completed rows are immutable; the only
/// transitions are pending -> completed and pending -> failed.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: Id,
    pub user_id: user::Id,
    pub kind: EntryKind,
    pub amount: btc::Sats,
    pub status: EntryStatus,
    pub payment_hash: Option<PaymentHash>,
    pub memo: Option<String>,
    pub peer_username: Option<String>,
    pub created: DateTime<Utc>,
    pub settled: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub(crate) fn completed(
        user_id: user::Id,
        kind: EntryKind,
        amount: btc::Sats,
        payment_hash: Option<PaymentHash>,
        memo: Option<String>,
        peer_username: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Id(Uuid::new_v4()),
            user_id,
            kind,
            amount,
            status: EntryStatus::Completed,
            payment_hash,
            memo,
            peer_username,
            created: now,
            settled: Some(now),
        }
    }

    pub(crate) fn pending(
        user_id: user::Id,
        kind: EntryKind,
        amount: btc::Sats,
        payment_hash: Option<PaymentHash>,
        memo: Option<String>,
    ) -> Self {
        Self {
            id: Id(Uuid::new_v4()),
            user_id,
            kind,
            amount,
            status: EntryStatus::Pending,
            payment_hash,
            memo,
            peer_username: None,
            created: Utc::now(),
            settled: None,
        }
    }

    /// Net effect on the owning user's balance. Deposits and internal
    /// credits add, withdrawals subtract; rows that never completed
    /// contribute nothing.
    pub fn signed_amount(&self) -> i64 {
        if self.status != EntryStatus::Completed {
            return 0;
        }
        match self.kind {
            EntryKind::Deposit | EntryKind::Internal => self.amount.0,
            EntryKind::Withdrawal => -self.amount.0,
        }
    }

    /// The pending -> completed transition. Completing a completed row is a
    /// no-op reported back to the observer, never a second application.
    pub(crate) fn complete(&mut self, amount: btc::Sats, now: DateTime<Utc>) -> SettleOutcome {
        match self.status {
            EntryStatus::Pending => {
                self.amount = amount;
                self.status = EntryStatus::Completed;
                self.settled = Some(now);
                SettleOutcome::Applied
            }
            EntryStatus::Completed => SettleOutcome::AlreadyApplied,
            EntryStatus::Failed => {
                panic!("entry {:?} already failed, cannot complete", self.id)
            }
        }
    }

    /// The pending -> failed transition.
    pub(crate) fn fail(&mut self, now: DateTime<Utc>) {
        if self.status != EntryStatus::Pending {
            panic!("entry {:?} is not pending, cannot fail", self.id);
        }
        self.status = EntryStatus::Failed;
        self.settled = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> user::Id {
        user::Id(Uuid::from_u128(1))
    }

    #[test]
    fn debit_checks_and_deducts_atomically() {
        let mut balance = Balance::new(user(), btc::Sats(1000));
        balance.debit(btc::Sats(700)).unwrap();
        assert_eq!(balance.amount(), btc::Sats(300));
        // The second 700 passed the check against the stale read in the
        // buggy version of this; here it must fail.
        assert!(balance.debit(btc::Sats(700)).is_err());
        assert_eq!(balance.amount(), btc::Sats(300));
        assert!(balance.changed());
        assert_eq!(balance.original_amount(), btc::Sats(1000));
    }

    #[test]
    fn unchanged_balance_skips_the_write() {
        let mut balance = Balance::new(user(), btc::Sats(42));
        assert!(!balance.changed());
        balance.credit(btc::Sats(0));
        assert!(!balance.changed());
    }

    #[test]
    fn stored_balance_equals_sum_of_completed_entries() {
        let entries = vec![
            LedgerEntry::completed(user(), EntryKind::Deposit, btc::Sats(500), None, None, None),
            LedgerEntry::completed(user(), EntryKind::Deposit, btc::Sats(400), None, None, None),
            LedgerEntry::completed(
                user(),
                EntryKind::Internal,
                btc::Sats(250),
                None,
                None,
                Some("bob".to_owned()),
            ),
            LedgerEntry::completed(
                user(),
                EntryKind::Withdrawal,
                btc::Sats(150),
                None,
                None,
                None,
            ),
            // Pending and failed rows must not count.
            LedgerEntry::pending(user(), EntryKind::Withdrawal, btc::Sats(999), None, None),
        ];
        let computed: i64 = entries.iter().map(LedgerEntry::signed_amount).sum();
        assert_eq!(computed, 500 + 400 + 250 - 150);
    }

    #[test]
    fn completion_is_applied_at_most_once() {
        let now = Utc::now();
        let mut entry =
            LedgerEntry::pending(user(), EntryKind::Withdrawal, btc::Sats(100), None, None);
        assert_eq!(entry.complete(btc::Sats(100), now), SettleOutcome::Applied);
        assert_eq!(entry.status, EntryStatus::Completed);
        // A racing second observer detects the applied settlement and no-ops.
        assert_eq!(
            entry.complete(btc::Sats(100), now),
            SettleOutcome::AlreadyApplied
        );
        assert_eq!(entry.signed_amount(), -100);
    }

    #[test]
    fn failed_entries_carry_no_weight() {
        let now = Utc::now();
        let mut entry =
            LedgerEntry::pending(user(), EntryKind::Withdrawal, btc::Sats(100), None, None);
        entry.fail(now);
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.signed_amount(), 0);
    }
}
