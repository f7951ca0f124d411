//! Entities and pure validation for the transfer orchestrator.

use crate::btc;
use crate::cash_limits;
use crate::concurrency;
use crate::ledger;
use crate::linked_wallet;
use crate::ln;
use crate::user;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("{0:?}")]
    InsufficientBalance(#[from] ledger::InsufficientBalance),
    #[error("invalid invoice: {0}")]
    MalformedInvoice(#[from] ln::MalformedInvoice),
    #[error("amount specified both in the invoice and in the request")]
    AmountSpecifiedTwice,
    #[error("amount not specified")]
    AmountNotSpecified,
    #[error("{0:?}")]
    LimitsViolated(#[from] cash_limits::Error),
    #[error("{0:?}")]
    Gateway(#[from] ln::GatewayError),
    #[error("payment failed: {0}")]
    PaymentFailed(ln::PaymentError),
    #[error("no linked wallet")]
    NoLinkedWallet,
    #[error("{0:?}")]
    LinkedWallet(#[from] linked_wallet::Error),
    #[error("{0:?}")]
    Conflict(#[from] concurrency::ConflictError),
}

/// Which balance pays an outgoing Lightning withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalRoute {
    /// Paid from the custodial stored balance through our node.
    Custodial,
    /// Paid from the user-linked external wallet; the ledger is untouched.
    Linked,
}

/// Receipt for a completed internal transfer.
#[derive(Debug)]
pub struct Transfer {
    pub id: ledger::Id,
    pub from_user: user::Id,
    pub receiver_name: String,
    pub amount: btc::Sats,
    pub memo: Option<String>,
    pub created: DateTime<Utc>,
}

/// Receipt for a Lightning withdrawal.
#[derive(Debug)]
pub struct Withdrawal {
    pub payment_hash: ln::PaymentHash,
    pub amount: btc::Sats,
    pub status: WithdrawalStatus,
}

#[derive(Debug)]
pub enum WithdrawalStatus {
    /// The node confirmed end-to-end settlement.
    Settled { preimage: String },
    /// The gateway could not confirm an outcome. The debit stands, the
    /// ledger row stays pending, and the settlement sweep resolves it.
    Pending,
    /// Handed to the linked external wallet; no custodial funds moved.
    Delegated,
}

/// Resolves the withdrawal amount from the invoice and the request. An
/// invoice with a fixed amount locks the field: the request must not repeat
/// it. An any-amount invoice requires it.
pub(crate) fn resolve_amount(
    invoice_amount: ln::InvoiceAmount,
    requested: Option<btc::Sats>,
) -> Result<btc::MilliSats, Error> {
    match (invoice_amount, requested) {
        (ln::InvoiceAmount::Fixed(_), Some(_)) => Err(Error::AmountSpecifiedTwice),
        (ln::InvoiceAmount::Fixed(msats), None) => Ok(msats),
        (ln::InvoiceAmount::Any, Some(sats)) if sats > btc::Sats(0) => Ok(sats.msats()),
        (ln::InvoiceAmount::Any, Some(_)) => Err(Error::InvalidAmount),
        (ln::InvoiceAmount::Any, None) => Err(Error::AmountNotSpecified),
    }
}

/// Routing fee allowance: one percent, floored at one satoshi. Fees are paid
/// from the operator margin, not debited from the user.
pub(crate) fn fee_limit(amount: btc::MilliSats) -> btc::MilliSats {
    btc::MilliSats((amount.0 / 100).max(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::{MilliSats, Sats};
    use crate::ln::InvoiceAmount;

    #[test]
    fn amount_resolution_matrix() {
        let fixed = InvoiceAmount::Fixed(MilliSats(250_000_000));
        assert_eq!(resolve_amount(fixed, None).unwrap(), MilliSats(250_000_000));
        assert!(matches!(
            resolve_amount(fixed, Some(Sats(250_000))),
            Err(Error::AmountSpecifiedTwice)
        ));
        assert_eq!(
            resolve_amount(InvoiceAmount::Any, Some(Sats(42))).unwrap(),
            MilliSats(42_000)
        );
        assert!(matches!(
            resolve_amount(InvoiceAmount::Any, None),
            Err(Error::AmountNotSpecified)
        ));
        assert!(matches!(
            resolve_amount(InvoiceAmount::Any, Some(Sats(0))),
            Err(Error::InvalidAmount)
        ));
        assert!(matches!(
            resolve_amount(InvoiceAmount::Any, Some(Sats(-5))),
            Err(Error::InvalidAmount)
        ));
    }

    #[test]
    fn fee_allowance_has_a_floor() {
        assert_eq!(fee_limit(MilliSats(50_000)), MilliSats(1_000));
        assert_eq!(fee_limit(MilliSats(10_000_000)), MilliSats(100_000));
    }
}
