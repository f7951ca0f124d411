use super::{Range, RangeError};
use crate::{access, error::JsonResult, state::RocketState};
use app::ledger;
use chrono::{DateTime, Utc};
use rocket::{get, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize, JsonSchema)]
struct TransactionModel {
    /// Unique transaction identifier.
    id: Uuid,
    /// Transaction kind.
    kind: KindModel,
    /// Amount in satoshis, always positive; the kind carries the direction.
    amount_sats: i64,
    /// Transaction status.
    status: StatusModel,
    /// Note attached to the transaction.
    memo: Option<String>,
    /// The other side of an internal transfer.
    peer_username: Option<String>,
    /// Payment hash for Lightning-funded rows.
    payment_hash: Option<String>,
    /// When the transaction was created.
    created_at: DateTime<Utc>,
    /// When the transaction reached its terminal state.
    settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum KindModel {
    /// Funds received over Lightning.
    Deposit,
    /// Funds sent out, over Lightning or to another user.
    Withdrawal,
    /// Funds received from another user.
    Internal,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatusModel {
    Pending,
    Completed,
    Failed,
}

impl TransactionModel {
    fn from_entity(entry: &ledger::LedgerEntry) -> Self {
        Self {
            id: entry.id.0,
            kind: match entry.kind {
                ledger::EntryKind::Deposit => KindModel::Deposit,
                ledger::EntryKind::Withdrawal => KindModel::Withdrawal,
                ledger::EntryKind::Internal => KindModel::Internal,
            },
            amount_sats: entry.amount.0,
            status: match entry.status {
                ledger::EntryStatus::Pending => StatusModel::Pending,
                ledger::EntryStatus::Completed => StatusModel::Completed,
                ledger::EntryStatus::Failed => StatusModel::Failed,
            },
            memo: entry.memo.clone(),
            peer_username: entry.peer_username.clone(),
            payment_hash: entry
                .payment_hash
                .as_ref()
                .map(|hash| hash.as_str().to_owned()),
            created_at: entry.created,
            settled_at: entry.settled,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct TransactionsResponse {
    transactions: Vec<TransactionModel>,
}

/// List your transaction history, most recent first.
#[openapi(tag = "Transactions")]
#[get("/transactions?<range..>")]
pub(super) async fn list(
    state: &State<RocketState>,
    guard: access::ReadGuard,
    range: Range,
) -> JsonResult<TransactionsResponse, RangeError> {
    Ok(Json(TransactionsResponse {
        transactions: ledger::list_for_user(
            &state.db,
            guard.grant().user_id,
            range.query_range()?,
        )
        .await
        .iter()
        .map(TransactionModel::from_entity)
        .collect(),
    }))
}
