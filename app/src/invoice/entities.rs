//! Inbound Lightning invoices. An invoice is created against our node via
//! [`Invoice::create`]; once the state machine observes settlement, the
//! credit is applied through the transfer orchestrator and the record is
//! marked settled.

use crate::{auth, btc, cash_limits, ledger, ln, seconds::Seconds, user, CashLimits};
use chrono::{DateTime, Utc};
use const_format::formatcp;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0:?}")]
    LimitsViolated(#[from] cash_limits::Error),
    #[error("amount not positive")]
    AmountNotPositive,
    #[error("invalid expiry: {0}")]
    InvalidExpiry(&'static str),
    #[error("invalid memo: {0}")]
    InvalidMemo(&'static str),
    #[error("{0:?}")]
    Gateway(#[from] ln::GatewayError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Id(pub Uuid);

#[derive(Debug)]
pub struct Invoice {
    pub id: Id,
    pub user_id: user::Id,
    pub payment_hash: ln::PaymentHash,
    /// `None` is an any-amount invoice: the payer chooses what to pay.
    pub amount: Option<btc::MilliSats>,
    pub memo: Option<String>,
    pub raw: ln::RawInvoice,
    pub created: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub settlement: Option<Settlement>,
}

#[derive(Debug)]
pub struct Settlement {
    /// What was actually paid, in whole satoshis as credited to the ledger.
    pub amount: btc::Sats,
    pub timestamp: DateTime<Utc>,
}

const MAX_MEMO_BYTES: usize = 639;
const MAX_EXPIRY_SECONDS: i64 = 31536000;

impl Invoice {
    /// Creates a new invoice. A `None` amount lets the payer specify any
    /// amount they'd like to pay.
    pub(crate) async fn create(
        grant: &auth::ReceiveGrant,
        node: &mut ln::Node,
        amount: Option<btc::MilliSats>,
        memo: Option<String>,
        expiry: Seconds,
        limits: &CashLimits,
        daily_total: btc::Sats,
    ) -> Result<Self, Error> {
        if let Some(amount) = amount {
            if amount <= btc::MilliSats(0) {
                return Err(Error::AmountNotPositive);
            }
            limits.check(cash_limits::Amounts {
                amount: amount.sats_ceil(),
                daily_total,
            })?;
        }
        if let Some(ref memo) = memo {
            if memo.as_bytes().len() > MAX_MEMO_BYTES {
                return Err(Error::InvalidMemo(formatcp!(
                    "memo can be up to {} bytes long",
                    MAX_MEMO_BYTES
                )));
            }
        }
        if expiry.0 <= 0 {
            return Err(Error::InvalidExpiry("expiry must be positive"));
        }
        if expiry.0 > MAX_EXPIRY_SECONDS {
            return Err(Error::InvalidExpiry(formatcp!(
                "expiry can't be more than {} seconds",
                MAX_EXPIRY_SECONDS
            )));
        }
        let created = node.create_invoice(amount, memo.clone(), expiry).await?;
        let expiration = Utc::now() + chrono::Duration::seconds(expiry.0);
        Ok(Self {
            id: Id(Uuid::new_v4()),
            user_id: grant.user_id,
            payment_hash: created.payment_hash,
            amount,
            memo,
            raw: created.raw,
            created: Utc::now(),
            expiration,
            settlement: None,
        })
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiration
    }

    /// Records the observed settlement on the entity. A second observation
    /// is detected and reported, never applied again.
    pub(crate) fn settle(&mut self, amount: btc::Sats, now: DateTime<Utc>) -> ledger::SettleOutcome {
        if self.is_settled() {
            return ledger::SettleOutcome::AlreadyApplied;
        }
        self.settlement = Some(Settlement {
            amount,
            timestamp: now,
        });
        ledger::SettleOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ln::PaymentHash;

    fn unsettled_invoice() -> Invoice {
        Invoice {
            id: Id(Uuid::from_u128(7)),
            user_id: user::Id(Uuid::from_u128(1)),
            payment_hash: PaymentHash::parse(
                "0001020304050607080900010203040506070809000102030405060708090102",
            )
            .unwrap(),
            amount: Some(btc::MilliSats(50_000_000)),
            memo: None,
            raw: ln::RawInvoice("lnbc...".to_owned()),
            created: Utc::now(),
            expiration: Utc::now() + chrono::Duration::seconds(3600),
            settlement: None,
        }
    }

    #[test]
    fn settlement_applies_at_most_once() {
        let now = Utc::now();
        let mut invoice = unsettled_invoice();
        assert_eq!(
            invoice.settle(btc::Sats(50_000), now),
            ledger::SettleOutcome::Applied
        );
        assert!(invoice.is_settled());
        assert_eq!(invoice.settlement.as_ref().unwrap().amount, btc::Sats(50_000));
        // The racing second observer must see the applied settlement and
        // leave the amount untouched.
        assert_eq!(
            invoice.settle(btc::Sats(50_000), now),
            ledger::SettleOutcome::AlreadyApplied
        );
        assert_eq!(invoice.settlement.as_ref().unwrap().amount, btc::Sats(50_000));
    }
}
