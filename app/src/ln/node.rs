use crate::btc;
use crate::hex::Hex;
use crate::seconds::Seconds;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{PaymentHash, RawInvoice};

/// Outcomes the node reports for an outbound payment it has finished with.
/// Distinct from [`GatewayError`]: these are definitive, a gateway error is
/// not.
#[derive(Debug, Error, Clone)]
pub enum PaymentError {
    #[error("invoice has expired")]
    InvoiceExpired,
    #[error("invoice has already been paid")]
    InvoiceAlreadyPaid,
    #[error("payment could not be routed")]
    NoRouteFound,
    #[error("insufficient node liquidity")]
    InsufficientLiquidity,
    #[error("payment rejected: {0}")]
    Rejected(String),
}

/// The gateway could not be reached or did not speak the protocol we expect.
/// Neither case says anything about the underlying payment, so callers must
/// leave payment state as it was and poll again later.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("lightning gateway unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected lightning gateway response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}

pub struct Config {
    pub endpoint: Url,
    pub macaroon_path: String,
    pub cert_path: String,
}

/// Represents a gateway into the Lightning network.
#[derive(Debug, Clone)]
pub struct Lightning {
    endpoint: Url,
    cert: Vec<u8>,
    macaroon: Hex,
}

impl Lightning {
    pub async fn new(config: Config) -> Self {
        let macaroon = fs::read(config.macaroon_path).unwrap();
        let cert = fs::read(config.cert_path).unwrap();
        Self {
            endpoint: config.endpoint,
            cert,
            macaroon: Hex::encode(&macaroon),
        }
    }

    /// Opens a new client against our node.
    pub async fn create_node(&self) -> Node {
        Node::connect(&self.endpoint, self.macaroon.clone(), &self.cert)
    }
}

/// Client for our Lightning node. We run LND, so this is implemented against
/// LND's REST gateway (v1 endpoints, macaroon auth, TLS pinned to the node's
/// self-signed certificate).
pub struct Node {
    http: reqwest::Client,
    endpoint: Url,
    macaroon: Hex,
}

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

impl Node {
    const DEFAULT_TIMEOUT_SECS: u64 = 20;

    pub(super) fn connect(endpoint: &Url, macaroon: Hex, cert: &[u8]) -> Self {
        let cert = reqwest::Certificate::from_pem(cert).unwrap();
        let http = reqwest::Client::builder()
            .add_root_certificate(cert)
            .timeout(Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap();
        Node {
            http,
            endpoint: endpoint.clone(),
            macaroon,
        }
    }

    /// Asks the node for a fresh invoice. A `None` amount produces an
    /// any-amount invoice, where the payer specifies what to pay.
    pub async fn create_invoice(
        &mut self,
        amount: Option<btc::MilliSats>,
        memo: Option<String>,
        expiry: Seconds,
    ) -> Result<CreatedInvoice, GatewayError> {
        let mut body = serde_json::json!({
            "memo": memo.unwrap_or_default(),
            "expiry": expiry.0.to_string(),
            "private": true,
        });
        if let Some(amount) = amount {
            body["value_msat"] = serde_json::Value::String(amount.0.to_string());
        }
        let resp: AddInvoiceResponse = self.post("/v1/invoices", body).await?;
        let payment_hash = PaymentHash::parse(&resp.r_hash)
            .map_err(|_| GatewayError::Malformed(format!("bad r_hash {:?}", resp.r_hash)))?;
        Ok(CreatedInvoice {
            raw: RawInvoice(resp.payment_request),
            payment_hash,
        })
    }

    /// Looks up an invoice by payment hash and reports what the node knows
    /// about it. This is the poll half of the settlement state machine.
    pub async fn lookup_invoice(
        &mut self,
        payment_hash: &PaymentHash,
    ) -> Result<InvoiceLookup, GatewayError> {
        let resp: LookupInvoiceResponse = self
            .get(&format!("/v1/invoice/{}", payment_hash.as_str()))
            .await?;
        let state = match resp.state.as_str() {
            // The settled flag predates the state field; trust whichever
            // says the invoice is paid.
            _ if resp.settled => LookupState::Settled,
            "SETTLED" => LookupState::Settled,
            "CANCELED" => LookupState::Canceled,
            "ACCEPTED" => LookupState::Accepted,
            "OPEN" | "" => LookupState::Open,
            other => {
                return Err(GatewayError::Malformed(format!(
                    "unknown invoice state {:?}",
                    other
                )))
            }
        };
        let amount_paid = match parse_number(&resp.amt_paid_msat)? {
            0 => None,
            msats => Some(btc::MilliSats(msats)),
        };
        Ok(InvoiceLookup {
            state,
            amount_paid,
            preimage: decode_preimage(&resp.r_preimage)?,
        })
    }

    /// Attempts to route a payment for an invoice. If the invoice specifies
    /// an amount, the amount parameter must be `None`.
    pub async fn pay_invoice(
        &mut self,
        invoice: &RawInvoice,
        amount: Option<btc::MilliSats>,
        fee_limit: btc::MilliSats,
    ) -> Result<PaymentOutcome, GatewayError> {
        let mut body = serde_json::json!({
            "payment_request": invoice.0,
            "fee_limit": { "fixed_msat": fee_limit.0.to_string() },
            "allow_self_payment": true,
        });
        if let Some(amount) = amount {
            body["amt_msat"] = serde_json::Value::String(amount.0.to_string());
        }
        let resp: SendPaymentResponse = self.post("/v1/channels/transactions", body).await?;
        if resp.payment_error.is_empty() {
            let preimage = decode_preimage(&resp.payment_preimage)?.ok_or_else(|| {
                GatewayError::Malformed("settled payment without preimage".to_owned())
            })?;
            return Ok(PaymentOutcome::Settled { preimage });
        }
        Ok(PaymentOutcome::Failed(payment_error(&resp.payment_error)))
    }

    /// Reports the node's view of an outbound payment. Used by the sweep
    /// that reconciles withdrawals whose initial submission ended with an
    /// unknown outcome.
    pub async fn lookup_payment(
        &mut self,
        payment_hash: &PaymentHash,
    ) -> Result<PaymentLookup, GatewayError> {
        let resp: ListPaymentsResponse = self
            .get("/v1/payments?include_incomplete=true&reversed=true&max_payments=250")
            .await?;
        let record = resp
            .payments
            .into_iter()
            .find(|p| p.payment_hash == payment_hash.as_str());
        let record = match record {
            Some(record) => record,
            None => return Ok(PaymentLookup::NotFound),
        };
        match record.status.as_str() {
            "SUCCEEDED" => Ok(PaymentLookup::Succeeded {
                preimage: record.payment_preimage,
            }),
            "FAILED" => Ok(PaymentLookup::Failed {
                reason: record.failure_reason,
            }),
            "IN_FLIGHT" | "UNKNOWN" | "" => Ok(PaymentLookup::InFlight),
            other => Err(GatewayError::Malformed(format!(
                "unknown payment status {:?}",
                other
            ))),
        }
    }

    /// The node's aggregate balance: channel liquidity, pending channel
    /// openings, and on-chain funds.
    pub async fn get_node_balance(&mut self) -> Result<NodeBalance, GatewayError> {
        let channels: ChannelBalanceResponse = self.get("/v1/balance/channels").await?;
        let chain: BlockchainBalanceResponse = self.get("/v1/balance/blockchain").await?;
        Ok(NodeBalance {
            channel: btc::Sats(parse_number(&channels.balance)?),
            pending: btc::Sats(parse_number(&channels.pending_open_balance)?),
            onchain: btc::Sats(parse_number(&chain.total_balance)?),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let resp = self
            .http
            .get(self.url(path))
            .header(MACAROON_HEADER, self.macaroon.as_str())
            .send()
            .await?;
        Self::decode_response(resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let resp = self
            .http
            .post(self.url(path))
            .header(MACAROON_HEADER, self.macaroon.as_str())
            .json(&body)
            .send()
            .await?;
        Self::decode_response(resp).await
    }

    async fn decode_response<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Malformed(format!(
                "status {}: {}",
                status, body
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.as_str().trim_end_matches('/'), path)
    }
}

/// The gateway serializes int64 fields as decimal strings.
fn parse_number(s: &str) -> Result<i64, GatewayError> {
    if s.is_empty() {
        return Ok(0);
    }
    s.parse()
        .map_err(|_| GatewayError::Malformed(format!("expected a number, got {:?}", s)))
}

/// Byte fields arrive base64-encoded; an all-zero or empty preimage means
/// there is none yet.
fn decode_preimage(s: &str) -> Result<Option<String>, GatewayError> {
    if s.is_empty() {
        return Ok(None);
    }
    let bytes = BASE64
        .decode(s)
        .map_err(|_| GatewayError::Malformed(format!("bad preimage {:?}", s)))?;
    if bytes.iter().all(|b| *b == 0) {
        return Ok(None);
    }
    Ok(Some(Hex::encode(&bytes).as_str().to_owned()))
}

fn payment_error(message: &str) -> PaymentError {
    let msg = message.to_lowercase();
    if msg.contains("invoice is already paid") {
        PaymentError::InvoiceAlreadyPaid
    } else if msg.contains("invoice expired") {
        PaymentError::InvoiceExpired
    } else if msg.contains("unable to find a path") || msg.contains("no_route") {
        PaymentError::NoRouteFound
    } else if msg.contains("insufficient_balance") || msg.contains("insufficient local balance") {
        PaymentError::InsufficientLiquidity
    } else {
        PaymentError::Rejected(message.to_owned())
    }
}

#[derive(Debug)]
pub struct CreatedInvoice {
    pub raw: RawInvoice,
    pub payment_hash: PaymentHash,
}

/// What the node reports for an invoice lookup.
#[derive(Debug, Clone)]
pub struct InvoiceLookup {
    pub state: LookupState,
    pub amount_paid: Option<btc::MilliSats>,
    pub preimage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Open,
    Accepted,
    Settled,
    Canceled,
}

#[derive(Debug)]
pub enum PaymentOutcome {
    Settled { preimage: String },
    Failed(PaymentError),
}

#[derive(Debug)]
pub enum PaymentLookup {
    Succeeded { preimage: String },
    Failed { reason: String },
    InFlight,
    NotFound,
}

/// Aggregate node balance, one figure per bucket.
#[derive(Debug, Clone, Copy)]
pub struct NodeBalance {
    pub channel: btc::Sats,
    pub pending: btc::Sats,
    pub onchain: btc::Sats,
}

impl NodeBalance {
    pub fn total(&self) -> btc::Sats {
        self.channel + self.pending + self.onchain
    }
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    #[serde(default)]
    r_hash: String,
    #[serde(default)]
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LookupInvoiceResponse {
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    state: String,
    #[serde(default)]
    amt_paid_msat: String,
    #[serde(default)]
    r_preimage: String,
}

#[derive(Debug, Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_preimage: String,
}

#[derive(Debug, Deserialize)]
struct ChannelBalanceResponse {
    #[serde(default)]
    balance: String,
    #[serde(default)]
    pending_open_balance: String,
}

#[derive(Debug, Deserialize)]
struct BlockchainBalanceResponse {
    #[serde(default)]
    total_balance: String,
}

#[derive(Debug, Deserialize)]
struct ListPaymentsResponse {
    #[serde(default)]
    payments: Vec<PaymentRecord>,
}

#[derive(Debug, Deserialize)]
struct PaymentRecord {
    #[serde(default)]
    payment_hash: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    payment_preimage: String,
    #[serde(default)]
    failure_reason: String,
}
