//! Storage access for the ledger: the stored balance column and the
//! append-only transaction log.
//!
//! The mutating queries are crate-private on purpose. Every code path that
//! moves satoshis goes through the transfer orchestrator, which is the sole
//! caller; nothing else in the system may write `balance_sats` or transition
//! a ledger row.

use crate::database::{self, Database};
use crate::user;
use crate::{concurrency, QueryRange};
use chrono::{DateTime, Utc};

mod entities;

pub use entities::{
    Balance, EntryKind, EntryStatus, Id, InsufficientBalance, LedgerEntry, SettleOutcome,
};

pub(crate) async fn balance(data_tx: &mut database::Transaction, user_id: user::Id) -> Balance {
    queries::balance(data_tx, user_id).await
}

/// Conditional write of the stored balance: succeeds only if the row still
/// holds the amount the [`Balance`] was loaded with.
pub(crate) async fn update_balance(
    data_tx: &mut database::Transaction,
    balance: &Balance,
) -> Result<(), concurrency::ConflictError> {
    queries::update_balance(data_tx, balance).await
}

pub(crate) async fn insert_entry(data_tx: &mut database::Transaction, entry: &LedgerEntry) {
    queries::insert(data_tx, entry).await;
}

/// Inserts an entry unless one already exists for the same payment hash and
/// direction. Returns whether this call inserted the row; `false` means
/// another observer applied the same settlement first.
pub(crate) async fn insert_entry_once(
    data_tx: &mut database::Transaction,
    entry: &LedgerEntry,
) -> bool {
    queries::insert_once(data_tx, entry).await
}

/// The pending -> completed transition, conditional on the row still being
/// pending. Returns whether this call made the transition.
pub(crate) async fn complete_entry(
    data_tx: &mut database::Transaction,
    id: Id,
    now: DateTime<Utc>,
) -> bool {
    queries::transition(data_tx, id, EntryStatus::Completed, now).await
}

/// The pending -> failed transition, same conditional discipline.
pub(crate) async fn fail_entry(
    data_tx: &mut database::Transaction,
    id: Id,
    now: DateTime<Utc>,
) -> bool {
    queries::transition(data_tx, id, EntryStatus::Failed, now).await
}

pub async fn list_for_user(db: &Database, user_id: user::Id, range: QueryRange) -> Vec<LedgerEntry> {
    queries::list_for_user(db, user_id, range).await
}

pub(crate) async fn list_pending_withdrawals(db: &Database) -> Vec<LedgerEntry> {
    queries::list_pending_withdrawals(db).await
}

pub(crate) async fn daily_withdrawal_total(db: &Database, user_id: user::Id) -> crate::btc::Sats {
    queries::daily_withdrawal_total(db, user_id).await
}

mod queries {
    use super::{Balance, EntryKind, EntryStatus, Id, LedgerEntry};
    use crate::btc;
    use crate::concurrency;
    use crate::database::{self, Database, SumRow};
    use crate::ln::PaymentHash;
    use crate::user;
    use crate::QueryRange;
    use chrono::{DateTime, Duration, Utc};
    use const_format::formatcp;
    use uuid::Uuid;

    const COLUMNS: &str =
        "id, user_id, kind, amount_sats, status, payment_hash, memo, peer_username, created, settled";

    pub(super) async fn balance(
        data_tx: &mut database::Transaction,
        user_id: user::Id,
    ) -> Balance {
        let row = sqlx::query_as::<_, BalanceRow>(
            "SELECT id AS user_id, balance_sats FROM users WHERE id = $1",
        )
        .bind(user_id.0)
        .fetch_one(data_tx)
        .await
        .unwrap();
        Balance::new(user::Id(row.user_id), btc::Sats(row.balance_sats))
    }

    pub(super) async fn update_balance(
        data_tx: &mut database::Transaction,
        balance: &Balance,
    ) -> Result<(), concurrency::ConflictError> {
        if balance.changed() {
            sqlx::query(
                "UPDATE users SET balance_sats = $1 WHERE id = $2 AND balance_sats = $3 RETURNING id",
            )
            .bind(balance.amount().0)
            .bind(balance.user_id().0)
            .bind(balance.original_amount().0)
            .fetch_optional(data_tx)
            .await
            .unwrap()
            .ok_or(concurrency::ConflictError)?;
        }
        Ok(())
    }

    pub(super) async fn insert(data_tx: &mut database::Transaction, entry: &LedgerEntry) {
        sqlx::query(formatcp!(
            "INSERT INTO ledger_entries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            COLUMNS
        ))
        .bind(entry.id.0)
        .bind(entry.user_id.0)
        .bind(kind_to_i32(entry.kind))
        .bind(entry.amount.0)
        .bind(status_to_i32(entry.status))
        .bind(entry.payment_hash.as_ref().map(|hash| hash.as_str().to_owned()))
        .bind(entry.memo.clone())
        .bind(entry.peer_username.clone())
        .bind(entry.created)
        .bind(entry.settled)
        .execute(data_tx)
        .await
        .unwrap();
    }

    pub(super) async fn insert_once(
        data_tx: &mut database::Transaction,
        entry: &LedgerEntry,
    ) -> bool {
        sqlx::query(formatcp!(
            r#"INSERT INTO ledger_entries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (kind, payment_hash) WHERE payment_hash IS NOT NULL DO NOTHING
                RETURNING id"#,
            COLUMNS
        ))
        .bind(entry.id.0)
        .bind(entry.user_id.0)
        .bind(kind_to_i32(entry.kind))
        .bind(entry.amount.0)
        .bind(status_to_i32(entry.status))
        .bind(entry.payment_hash.as_ref().map(|hash| hash.as_str().to_owned()))
        .bind(entry.memo.clone())
        .bind(entry.peer_username.clone())
        .bind(entry.created)
        .bind(entry.settled)
        .fetch_optional(data_tx)
        .await
        .unwrap()
        .is_some()
    }

    pub(super) async fn transition(
        data_tx: &mut database::Transaction,
        id: Id,
        to: EntryStatus,
        now: DateTime<Utc>,
    ) -> bool {
        sqlx::query(
            "UPDATE ledger_entries SET status = $2, settled = $3 WHERE id = $1 AND status = $4 RETURNING id",
        )
        .bind(id.0)
        .bind(status_to_i32(to))
        .bind(now)
        .bind(status_to_i32(EntryStatus::Pending))
        .fetch_optional(data_tx)
        .await
        .unwrap()
        .is_some()
    }

    pub(super) async fn list_for_user(
        db: &Database,
        user_id: user::Id,
        range: QueryRange,
    ) -> Vec<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntryRow>(formatcp!(
            "SELECT {} FROM ledger_entries WHERE user_id = $1 ORDER BY created DESC LIMIT $2 OFFSET $3",
            COLUMNS
        ))
        .bind(user_id.0)
        .bind(range.limit)
        .bind(range.offset)
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_entity())
        .collect()
    }

    pub(super) async fn list_pending_withdrawals(db: &Database) -> Vec<LedgerEntry> {
        sqlx::query_as::<_, LedgerEntryRow>(formatcp!(
            r#"SELECT {} FROM ledger_entries
                WHERE status = 0 AND kind = 1 AND payment_hash IS NOT NULL"#,
            COLUMNS
        ))
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_entity())
        .collect()
    }

    pub(super) async fn daily_withdrawal_total(db: &Database, user_id: user::Id) -> btc::Sats {
        sqlx::query_as::<_, SumRow<Option<i64>>>(
            r#"SELECT CAST(COALESCE(SUM(amount_sats), 0) AS BIGINT) AS sum FROM ledger_entries
                WHERE user_id = $1 AND kind = 1 AND status IN (0, 1) AND created > $2"#,
        )
        .bind(user_id.0)
        .bind(Utc::now() - Duration::days(1))
        .fetch_one(db)
        .await
        .unwrap()
        .sum
        .map(btc::Sats)
        .unwrap_or_default()
    }

    pub(super) fn kind_to_i32(kind: EntryKind) -> i32 {
        match kind {
            EntryKind::Deposit => 0,
            EntryKind::Withdrawal => 1,
            EntryKind::Internal => 2,
        }
    }

    pub(super) fn status_to_i32(status: EntryStatus) -> i32 {
        match status {
            EntryStatus::Pending => 0,
            EntryStatus::Completed => 1,
            EntryStatus::Failed => 2,
        }
    }

    #[derive(sqlx::FromRow, Debug)]
    struct BalanceRow {
        user_id: Uuid,
        balance_sats: i64,
    }

    #[derive(sqlx::FromRow, Debug)]
    struct LedgerEntryRow {
        id: Uuid,
        user_id: Uuid,
        kind: i32,
        amount_sats: i64,
        status: i32,
        payment_hash: Option<String>,
        memo: Option<String>,
        peer_username: Option<String>,
        created: DateTime<Utc>,
        settled: Option<DateTime<Utc>>,
    }

    impl LedgerEntryRow {
        fn into_entity(self) -> LedgerEntry {
            LedgerEntry {
                id: Id(self.id),
                user_id: user::Id(self.user_id),
                kind: match self.kind {
                    0 => EntryKind::Deposit,
                    1 => EntryKind::Withdrawal,
                    2 => EntryKind::Internal,
                    other => unreachable!("unknown entry kind {:?}", other),
                },
                amount: btc::Sats(self.amount_sats),
                status: match self.status {
                    0 => EntryStatus::Pending,
                    1 => EntryStatus::Completed,
                    2 => EntryStatus::Failed,
                    other => unreachable!("unknown entry status {:?}", other),
                },
                payment_hash: self
                    .payment_hash
                    .as_deref()
                    .map(|hash| PaymentHash::parse(hash).unwrap()),
                memo: self.memo,
                peer_username: self.peer_username,
                created: self.created,
                settled: self.settled,
            }
        }
    }
}
