//! Lightning-facing types: the BOLT11 invoice codec, payment hashes in their
//! canonical encoding, and the payment lifecycle state machine. Everything in
//! this file is pure; network I/O against our node lives in [`node`].

use crate::btc;
use crate::hex::Hex;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;

mod node;

pub(crate) use lightning_invoice::Invoice as ParsedInvoice;
pub use node::{
    Config, CreatedInvoice, GatewayError, InvoiceLookup, Lightning, LookupState, Node,
    NodeBalance, PaymentError, PaymentLookup, PaymentOutcome,
};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct MalformedInvoice(pub String);

/// An unparsed BOLT11 invoice. These are also commonly referred to as
/// "payment requests".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInvoice(pub String);

impl RawInvoice {
    pub(crate) fn parse(&self) -> Result<ParsedInvoice, MalformedInvoice> {
        ParsedInvoice::from_str(self.0.trim()).map_err(|e| MalformedInvoice(e.to_string()))
    }

    /// Decodes the payment request against the configured network. Pure; the
    /// result says nothing about whether the invoice has been paid.
    pub fn decode(&self) -> Result<Decoded, MalformedInvoice> {
        self.decode_for(btc::CURRENCY)
    }

    fn decode_for(
        &self,
        currency: lightning_invoice::Currency,
    ) -> Result<Decoded, MalformedInvoice> {
        let parsed = self.parse()?;
        if parsed.currency() != currency {
            return Err(MalformedInvoice(format!(
                "invoice is for another network ({:?})",
                parsed.currency()
            )));
        }
        let amount = match parsed.amount_milli_satoshis() {
            // An explicit zero means the payer chooses the amount, same as no
            // amount field at all. Distinct from a malformed amount, which
            // already failed in parse().
            None | Some(0) => InvoiceAmount::Any,
            Some(msats) => InvoiceAmount::Fixed(btc::MilliSats(
                msats
                    .try_into()
                    .map_err(|_| MalformedInvoice("amount out of range".to_owned()))?,
            )),
        };
        let description = match parsed.description() {
            lightning_invoice::InvoiceDescription::Direct(d) => {
                let d = d.clone().into_inner();
                if d.is_empty() {
                    None
                } else {
                    Some(d)
                }
            }
            lightning_invoice::InvoiceDescription::Hash(_) => None,
        };
        let created = DateTime::<Utc>::from(parsed.timestamp());
        let expires_at = created
            + chrono::Duration::from_std(parsed.expiry_time())
                .map_err(|_| MalformedInvoice("expiry out of range".to_owned()))?;
        Ok(Decoded {
            amount,
            description,
            payment_hash: PaymentHash(Hex::encode(&parsed.payment_hash()[..])),
            expires_at,
        })
    }

    const DISPLAY_HEAD: usize = 24;
    const DISPLAY_TAIL: usize = 8;

    /// Shortened display form. Pure formatting; carries no correctness
    /// obligation beyond being stable for the same payment request.
    pub fn truncated(&self) -> String {
        let s = self.0.trim();
        if s.len() <= Self::DISPLAY_HEAD + Self::DISPLAY_TAIL + 1 {
            return s.to_owned();
        }
        format!(
            "{}...{}",
            &s[..Self::DISPLAY_HEAD],
            &s[s.len() - Self::DISPLAY_TAIL..]
        )
    }
}

/// The result of decoding a payment request.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub amount: InvoiceAmount,
    pub description: Option<String>,
    pub payment_hash: PaymentHash,
    pub expires_at: DateTime<Utc>,
}

/// Whether the payer chooses the amount. A fixed amount locks the amount
/// field downstream; modeling this as a sum type keeps that handling
/// exhaustive instead of hanging off a nullable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceAmount {
    Fixed(btc::MilliSats),
    Any,
}

#[derive(Debug, Error)]
#[error("not a payment hash")]
pub struct MalformedPaymentHash;

/// A payment hash in its canonical form: 32 bytes as lowercase hex. The
/// node's REST gateway emits hashes base64-encoded in response bodies and
/// takes them hex-encoded in paths, so both encodings are accepted on input
/// and normalized here, before any lookup or uniqueness check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentHash(Hex);

impl PaymentHash {
    pub fn parse(s: &str) -> Result<Self, MalformedPaymentHash> {
        if let Ok(hex) = Hex::parse(s) {
            return Self::from_hex(hex);
        }
        if let Ok(bytes) = BASE64.decode(s) {
            return Self::from_hex(Hex::encode(&bytes));
        }
        Err(MalformedPaymentHash)
    }

    fn from_hex(hex: Hex) -> Result<Self, MalformedPaymentHash> {
        if hex.as_str().len() != 64 {
            return Err(MalformedPaymentHash);
        }
        Ok(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// The two things a "send to" input can be. Classified once, up front, so
/// callers branch on a variant instead of re-sniffing string prefixes at
/// every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Invoice(RawInvoice),
    Username(String),
}

pub fn classify(input: &str) -> Recipient {
    let candidate = RawInvoice(input.trim().to_owned());
    if candidate.parse().is_ok() {
        Recipient::Invoice(candidate)
    } else {
        Recipient::Username(input.trim().to_owned())
    }
}

/// Lifecycle of a payment attempt as observed through the gateway.
///
/// States are observed, never pushed: polling maps each lookup onto this
/// enum, and only `Settled` may affect the ledger - at most once per payment
/// hash, which the ledger's uniqueness constraint enforces, not this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentState {
    Open,
    Accepted,
    Settled {
        amount_paid: btc::MilliSats,
        preimage: Option<String>,
    },
    Canceled,
    Expired,
}

impl PaymentState {
    /// Maps a gateway lookup onto the state machine. Expiry is inferred: the
    /// gateway keeps reporting `OPEN` for an unpaid invoice that is already
    /// past its expiry, so the comparison against the clock happens here.
    /// `now` is a parameter so tests can drive transitions without waiting.
    pub fn observe(
        lookup: &InvoiceLookup,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        match lookup.state {
            LookupState::Settled => Self::Settled {
                amount_paid: lookup.amount_paid.unwrap_or_default(),
                preimage: lookup.preimage.clone(),
            },
            LookupState::Canceled => Self::Canceled,
            LookupState::Accepted => Self::Accepted,
            LookupState::Open if now >= expires_at => Self::Expired,
            LookupState::Open => Self::Open,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled { .. } | Self::Canceled | Self::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lightning_invoice::Currency;

    // BOLT11 test vectors: a donation invoice without an amount and a fixed
    // 2500 uBTC invoice with a 60 second expiry.
    const ANY_AMOUNT_INVOICE: &str = "lnbc1pvjluezpp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdpl2pkx2ctnv5sxxmmwwd5kgetjypeh2ursdae8g6twvus8g6rfwvs8qun0dfjkxaq8rkx3yf5tcsyz3d73gafnh3cax9rn449d9p5uxz9ezhhypd0elx87sjle52x86fux2ypatgddc6k63n7erqz25le42c4u4ecky03ylcqca784w";
    const FIXED_AMOUNT_INVOICE: &str = "lnbc2500u1pvjluezpp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdq5xysxxatsyp3k7enxv4jsxqzpuaztrnwngzn3kdzw5hydlzf03qdgm2hdq27cqv3agm2awhz5se903vruatfhq77w3ls4evs3ch9zw97j25emudupq63nyw24cg27h2rspfj9srp";
    const VECTOR_PAYMENT_HASH: &str =
        "0001020304050607080900010203040506070809000102030405060708090102";
    const VECTOR_TIMESTAMP: i64 = 1496314658;

    #[test]
    fn decodes_fixed_amount_invoice() {
        let decoded = RawInvoice(FIXED_AMOUNT_INVOICE.to_owned())
            .decode_for(Currency::Bitcoin)
            .unwrap();
        assert_eq!(
            decoded.amount,
            InvoiceAmount::Fixed(crate::btc::MilliSats(250_000_000))
        );
        assert_eq!(decoded.description.as_deref(), Some("1 cappuccino"));
        assert_eq!(decoded.payment_hash.as_str(), VECTOR_PAYMENT_HASH);
        assert_eq!(decoded.expires_at.timestamp(), VECTOR_TIMESTAMP + 60);
    }

    #[test]
    fn decodes_any_amount_invoice() {
        let decoded = RawInvoice(ANY_AMOUNT_INVOICE.to_owned())
            .decode_for(Currency::Bitcoin)
            .unwrap();
        assert_eq!(decoded.amount, InvoiceAmount::Any);
        assert_eq!(decoded.payment_hash.as_str(), VECTOR_PAYMENT_HASH);
        assert_eq!(decoded.expires_at.timestamp(), VECTOR_TIMESTAMP + 3600);
    }

    #[test]
    fn rejects_malformed_and_wrong_network() {
        assert!(RawInvoice("lnbc1notaninvoice".to_owned())
            .decode_for(Currency::Bitcoin)
            .is_err());
        assert!(RawInvoice(FIXED_AMOUNT_INVOICE.to_owned())
            .decode_for(Currency::BitcoinTestnet)
            .is_err());
    }

    #[test]
    fn truncation_is_stable_and_does_not_consume_decoding() {
        let raw = RawInvoice(format!("  {}\n", FIXED_AMOUNT_INVOICE));
        raw.decode_for(Currency::Bitcoin).unwrap();
        assert_eq!(
            raw.truncated(),
            RawInvoice(FIXED_AMOUNT_INVOICE.to_owned()).truncated()
        );
        assert_eq!(RawInvoice("short".to_owned()).truncated(), "short");
    }

    #[test]
    fn classifies_invoice_and_username() {
        assert!(matches!(
            classify(FIXED_AMOUNT_INVOICE),
            Recipient::Invoice(_)
        ));
        assert_eq!(
            classify(" satoshi "),
            Recipient::Username("satoshi".to_owned())
        );
        // A username that merely starts with "ln" is not an invoice.
        assert_eq!(
            classify("lnwallet_fan"),
            Recipient::Username("lnwallet_fan".to_owned())
        );
    }

    #[test]
    fn payment_hash_encodings_normalize_to_one_form() {
        let bytes: Vec<u8> = (0u8..32).collect();
        let from_hex = PaymentHash::parse(&hex::encode_upper(&bytes)).unwrap();
        let from_base64 = PaymentHash::parse(&BASE64.encode(&bytes)).unwrap();
        assert_eq!(from_hex, from_base64);
        assert_eq!(from_hex.as_str(), hex::encode(&bytes));
        assert!(PaymentHash::parse("abcdef").is_err());
    }

    fn lookup(state: LookupState) -> InvoiceLookup {
        InvoiceLookup {
            state,
            amount_paid: None,
            preimage: None,
        }
    }

    #[test]
    fn observes_gateway_states() {
        let expiry = Utc.timestamp(2_000_000_000, 0);
        let before = Utc.timestamp(1_999_999_999, 0);
        let after = Utc.timestamp(2_000_000_001, 0);

        assert_eq!(
            PaymentState::observe(&lookup(LookupState::Open), expiry, before),
            PaymentState::Open
        );
        assert_eq!(
            PaymentState::observe(&lookup(LookupState::Accepted), expiry, before),
            PaymentState::Accepted
        );
        assert_eq!(
            PaymentState::observe(&lookup(LookupState::Canceled), expiry, before),
            PaymentState::Canceled
        );
        // Expiry is inferred from the clock, not signaled by the gateway.
        assert_eq!(
            PaymentState::observe(&lookup(LookupState::Open), expiry, after),
            PaymentState::Expired
        );

        let settled = InvoiceLookup {
            state: LookupState::Settled,
            amount_paid: Some(crate::btc::MilliSats(50_000_000)),
            preimage: Some("00ff".to_owned()),
        };
        // A settled invoice stays settled even when observed past expiry.
        let state = PaymentState::observe(&settled, expiry, after);
        assert_eq!(
            state,
            PaymentState::Settled {
                amount_paid: crate::btc::MilliSats(50_000_000),
                preimage: Some("00ff".to_owned()),
            }
        );
        assert!(state.is_terminal());
        assert!(!PaymentState::Accepted.is_terminal());
    }
}
