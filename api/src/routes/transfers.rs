use crate::{access, error::JsonResult, state::RocketState};
use app::{btc, transfer};
use chrono::{DateTime, Utc};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::withdrawals;

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct TransferRequest {
    /// Username of the receiving wallet user.
    to_username: String,
    /// Amount in satoshis.
    amount_sats: u64,
    /// Optional note shown to both sides in their history.
    memo: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct TransferResponse {
    success: bool,
    /// Unique identifier of the sender's ledger row.
    id: Uuid,
    /// Display name of the receiver.
    receiver_name: String,
    /// When the transfer was applied.
    created_at: DateTime<Utc>,
}

/// Move satoshis to another wallet user. Applies to both balances at once:
/// either the transfer happens on both sides or not at all.
#[openapi(tag = "Transfers")]
#[post("/transfer", data = "<req>")]
pub(super) async fn post(
    state: &State<RocketState>,
    req: Json<TransferRequest>,
    guard: access::SpendGuard,
) -> JsonResult<TransferResponse, withdrawals::Error> {
    transfer::internal_transfer(
        guard.grant(),
        &state.db,
        &req.to_username,
        btc::Sats(req.amount_sats.try_into().unwrap()),
        req.memo.clone(),
    )
    .await
    .map(|transfer| {
        Json(TransferResponse {
            success: true,
            id: transfer.id.0,
            receiver_name: transfer.receiver_name,
            created_at: transfer.created,
        })
    })
    .map_err(withdrawals::map_error)
}
