use crate::{
    access,
    error::{self, JsonResult},
    state::RocketState,
};
use app::{btc, cash_limits, concurrency, ledger, ln, transfer};
use rocket::{post, serde::json::Json, State};
use rocket_okapi::openapi;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub(super) struct WithdrawRequest {
    /// A BOLT11 payment request, or the username of another wallet user.
    /// Classified server-side; invoices pay out over Lightning, usernames
    /// become internal transfers.
    recipient: String,
    /// Amount in satoshis. Required for usernames and any-amount invoices;
    /// must be omitted when the invoice fixes the amount.
    amount_sats: Option<u64>,
    /// Which wallet pays an invoice. Defaults to the custodial balance.
    route: Option<RouteModel>,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum RouteModel {
    /// Pay from the custodial balance through our node.
    Custodial,
    /// Pay from the linked external wallet.
    Linked,
}

#[derive(Debug, Serialize, JsonSchema)]
pub(super) struct WithdrawResponse {
    success: bool,
    /// Terminal or pending state of the withdrawal.
    status: StatusModel,
    /// Set when the recipient was a username.
    receiver_name: Option<String>,
    /// Payment hash, set when the recipient was an invoice.
    payment_hash: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum StatusModel {
    /// The payment settled end-to-end.
    Settled,
    /// The outcome is not yet known; the debit stands and a later poll
    /// resolves the payment.
    Pending,
    /// Handed to the linked external wallet.
    Delegated,
    /// Internal transfer applied to both balances.
    Transferred,
}

/// Error during withdrawal.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum Error {
    /// Unexpected error, please contact support.
    Unknown,
    /// Amount must be positive.
    InvalidAmount,
    /// No user with that username.
    RecipientNotFound,
    /// Insufficient balance to complete the withdrawal.
    InsufficientBalance,
    /// The payment request could not be decoded.
    MalformedInvoice,
    /// Amount was specified both in the invoice and in the request.
    AmountSpecifiedTwice,
    /// Amount was specified neither in the invoice nor the request.
    AmountNotSpecified,
    /// Amount too low.
    AmountTooLow,
    /// Amount too high.
    AmountTooHigh,
    /// Daily amount exceeded.
    DailyLimitExceeded,
    /// The node reported a definitive payment failure; nothing was charged.
    PaymentFailed,
    /// No external wallet is linked to this account.
    NoLinkedWallet,
    /// The linked wallet refused or could not be reached.
    LinkedWalletFailed,
}

/// Send satoshis out of your balance: to a Lightning invoice or to another
/// user by username.
#[openapi(tag = "Withdrawals")]
#[post("/withdraw", data = "<req>")]
pub(super) async fn post(
    state: &State<RocketState>,
    req: Json<WithdrawRequest>,
    guard: access::SpendGuard,
) -> JsonResult<WithdrawResponse, Error> {
    let amount = req
        .amount_sats
        .map(|amount| btc::Sats(amount.try_into().unwrap()));
    match ln::classify(&req.recipient) {
        ln::Recipient::Invoice(invoice) => {
            let route = match req.route {
                Some(RouteModel::Linked) => transfer::WithdrawalRoute::Linked,
                _ => transfer::WithdrawalRoute::Custodial,
            };
            transfer::lightning_withdrawal(
                guard.grant(),
                &state.db,
                state.lightning.create_node().await,
                invoice,
                amount,
                route,
                &state.cash_limits.withdrawal_limits,
            )
            .await
            .map(|withdrawal| {
                Json(WithdrawResponse {
                    success: true,
                    status: match withdrawal.status {
                        transfer::WithdrawalStatus::Settled { .. } => StatusModel::Settled,
                        transfer::WithdrawalStatus::Pending => StatusModel::Pending,
                        transfer::WithdrawalStatus::Delegated => StatusModel::Delegated,
                    },
                    receiver_name: None,
                    payment_hash: Some(withdrawal.payment_hash.as_str().to_owned()),
                })
            })
            .map_err(map_error)
        }
        ln::Recipient::Username(username) => {
            let amount = match amount {
                Some(amount) => amount,
                None => {
                    return Err(error::bad_request(
                        Error::AmountNotSpecified,
                        "amount is required when sending to a username".to_owned(),
                    ))
                }
            };
            transfer::internal_transfer(guard.grant(), &state.db, &username, amount, None)
                .await
                .map(|transfer| {
                    Json(WithdrawResponse {
                        success: true,
                        status: StatusModel::Transferred,
                        receiver_name: Some(transfer.receiver_name),
                        payment_hash: None,
                    })
                })
                .map_err(map_error)
        }
    }
}

pub(super) fn map_error(e: transfer::Error) -> crate::error::JsonError<Error> {
    match e {
        transfer::Error::InvalidAmount => {
            error::bad_request(Error::InvalidAmount, "amount must be positive".to_owned())
        }
        transfer::Error::RecipientNotFound => {
            error::bad_request(Error::RecipientNotFound, "recipient not found".to_owned())
        }
        transfer::Error::InsufficientBalance(ledger::InsufficientBalance) => {
            error::bad_request(Error::InsufficientBalance, "insufficient balance".to_owned())
        }
        transfer::Error::MalformedInvoice(inner) => {
            error::bad_request(Error::MalformedInvoice, inner.to_string())
        }
        transfer::Error::AmountSpecifiedTwice => error::bad_request(
            Error::AmountSpecifiedTwice,
            "amount already specified in the invoice".to_owned(),
        ),
        transfer::Error::AmountNotSpecified => {
            error::bad_request(Error::AmountNotSpecified, "amount not specified".to_owned())
        }
        transfer::Error::LimitsViolated(cash_limits::Error::AmountTooLow) => {
            error::bad_request(Error::AmountTooLow, "withdrawal amount too low".to_owned())
        }
        transfer::Error::LimitsViolated(cash_limits::Error::AmountTooHigh) => {
            error::bad_request(Error::AmountTooHigh, "withdrawal amount too high".to_owned())
        }
        transfer::Error::LimitsViolated(cash_limits::Error::DailyLimitExceeded) => {
            error::bad_request(
                Error::DailyLimitExceeded,
                "daily withdrawal total exceeded".to_owned(),
            )
        }
        transfer::Error::PaymentFailed(inner) => {
            log::info!("payment failed: {}", inner);
            error::bad_request(Error::PaymentFailed, "the payment failed".to_owned())
        }
        transfer::Error::NoLinkedWallet => error::bad_request(
            Error::NoLinkedWallet,
            "no external wallet is linked to this account".to_owned(),
        ),
        transfer::Error::LinkedWallet(inner) => {
            log::warn!("linked wallet payment failed: {}", inner);
            error::bad_gateway(
                Error::LinkedWalletFailed,
                "the linked wallet could not complete the payment".to_owned(),
            )
        }
        transfer::Error::Gateway(inner) => {
            // Unreachable gateways surface before any debit as a transient
            // failure; post-debit unknown outcomes return a pending receipt
            // instead of an error, so this only covers the former.
            log::error!("gateway error during withdrawal: {}", inner);
            error::bad_gateway(
                Error::Unknown,
                "could not reach the Lightning node, please try again".to_owned(),
            )
        }
        transfer::Error::Conflict(concurrency::ConflictError) => {
            log::warn!("transfer hit unresolved write conflicts");
            error::transient(Error::Unknown)
        }
    }
}
