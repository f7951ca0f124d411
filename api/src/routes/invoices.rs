use super::{Range, RangeError};
use crate::{
    access,
    error::{self, JsonResult},
    state::RocketState,
};
use app::{btc, cash_limits, invoice, seconds::Seconds};
use chrono::{DateTime, Utc};
use rocket::{get, post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct InvoiceRequest {
    /// Invoice description.
    memo: Option<String>,
    /// Amount to pay with this invoice, in satoshis. Omit for an any-amount
    /// invoice, where the payer chooses what to pay.
    amount_sats: Option<u64>,
    /// Invoice expiry time. An invoice cannot be paid after it's expired.
    expiry_secs: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct InvoiceResponse {
    invoice: InvoiceModel,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct InvoicesResponse {
    invoices: Vec<InvoiceModel>,
}

#[derive(Debug, Serialize, JsonSchema)]
struct InvoiceModel {
    /// Unique invoice identifier.
    id: Uuid,
    /// The invoice, aka payment request.
    invoice: String,
    /// Shortened payment request for display.
    display: String,
    /// Payment hash identifying this invoice on the network.
    payment_hash: String,
    /// Amount to pay, in satoshis. Absent for any-amount invoices.
    amount_sats: Option<i64>,
    /// Invoice description.
    memo: Option<String>,
    /// Invoice creation time.
    created_at: DateTime<Utc>,
    /// Invoice expiry time.
    expires_at: DateTime<Utc>,
    /// Invoice settle time, if the invoice has been paid.
    settled_at: Option<DateTime<Utc>>,
    /// The amount that was paid, in satoshis.
    amount_paid_sats: Option<i64>,
    /// True if the invoice has been paid.
    is_settled: bool,
    /// True if the invoice has expired.
    is_expired: bool,
}

impl InvoiceModel {
    fn from_entity(invoice: &invoice::Invoice) -> Self {
        Self {
            id: invoice.id.0,
            invoice: invoice.raw.0.clone(),
            display: invoice.raw.truncated(),
            payment_hash: invoice.payment_hash.as_str().to_owned(),
            amount_sats: invoice.amount.map(|amount| amount.sats_floor().0),
            memo: invoice.memo.clone(),
            created_at: invoice.created,
            expires_at: invoice.expiration,
            settled_at: invoice
                .settlement
                .as_ref()
                .map(|settlement| settlement.timestamp),
            amount_paid_sats: invoice
                .settlement
                .as_ref()
                .map(|settlement| settlement.amount.0),
            is_settled: invoice.is_settled(),
            is_expired: invoice.is_expired(),
        }
    }
}

/// Error during invoice creation.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// Amount too low.
    AmountTooLow,
    /// Amount too high.
    AmountTooHigh,
    /// Daily amount exceeded.
    DailyLimitExceeded,
    /// Invoice amount must be positive.
    AmountNotPositive,
    /// Expiry time must be positive.
    InvalidExpiry,
    /// Memo was too long.
    InvalidMemo,
    /// The Lightning node could not be reached.
    GatewayUnavailable,
}

/// Create an invoice to receive satoshis into your balance.
#[openapi(tag = "Invoices")]
#[post("/invoices", data = "<req>")]
pub(super) async fn post(
    state: &State<RocketState>,
    req: Json<InvoiceRequest>,
    guard: access::ReceiveGuard,
) -> JsonResult<InvoiceResponse, Error> {
    let mut node = state.lightning.create_node().await;
    invoice::create(
        guard.grant(),
        &state.db,
        &mut node,
        req.amount_sats
            .map(|amount| btc::Sats(amount.try_into().unwrap()).msats()),
        req.memo.clone(),
        req.expiry_secs.map(Seconds).unwrap_or_else(Seconds::one_hour),
        &state.cash_limits.invoice_limits,
    )
    .await
    .map(|invoice| {
        Json(InvoiceResponse {
            invoice: InvoiceModel::from_entity(&invoice),
        })
    })
    .map_err(|e| match e {
        invoice::Error::LimitsViolated(cash_limits::Error::AmountTooLow) => {
            error::bad_request(Error::AmountTooLow, "invoice amount too low".to_owned())
        }
        invoice::Error::LimitsViolated(cash_limits::Error::AmountTooHigh) => {
            error::bad_request(Error::AmountTooHigh, "invoice amount too high".to_owned())
        }
        invoice::Error::LimitsViolated(cash_limits::Error::DailyLimitExceeded) => {
            error::bad_request(
                Error::DailyLimitExceeded,
                "daily invoice total exceeded".to_owned(),
            )
        }
        invoice::Error::AmountNotPositive => error::bad_request(
            Error::AmountNotPositive,
            "invoice amount must be positive".to_owned(),
        ),
        invoice::Error::InvalidExpiry(inner) => {
            error::bad_request(Error::InvalidExpiry, inner.to_owned())
        }
        invoice::Error::InvalidMemo(inner) => {
            error::bad_request(Error::InvalidMemo, inner.to_owned())
        }
        invoice::Error::Gateway(inner) => {
            log::error!("invoice creation failed at the gateway: {}", inner);
            error::bad_gateway(
                Error::GatewayUnavailable,
                "could not reach the Lightning node, please try again".to_owned(),
            )
        }
    })
}

/// List all invoices created for your account.
#[openapi(tag = "Invoices")]
#[get("/invoices?<range..>")]
pub(super) async fn list(
    state: &State<RocketState>,
    guard: access::ReadGuard,
    range: Range,
) -> JsonResult<InvoicesResponse, RangeError> {
    Ok(Json(InvoicesResponse {
        invoices: invoice::list(guard.grant(), &state.db, range.query_range()?)
            .await
            .iter()
            .map(InvoiceModel::from_entity)
            .collect(),
    }))
}

/// Get invoice details. An unsettled invoice is checked against the node on
/// the spot, so settlement shows up here without waiting for the sweep.
#[openapi(tag = "Invoices")]
#[get("/invoices/<invoice_id>")]
pub(super) async fn get(
    state: &State<RocketState>,
    guard: access::ReadGuard,
    invoice_id: String,
) -> Option<Json<InvoiceResponse>> {
    let invoice_id = match Uuid::from_str(&invoice_id) {
        Ok(invoice_id) => invoice::Id(invoice_id),
        Err(_) => return None,
    };
    let mut node = state.lightning.create_node().await;
    invoice::check(guard.grant(), &state.db, &mut node, invoice_id)
        .await
        .map(|invoice| {
            Json(InvoiceResponse {
                invoice: InvoiceModel::from_entity(&invoice),
            })
        })
}
