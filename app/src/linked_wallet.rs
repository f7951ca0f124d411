//! Client for a user-linked external wallet (LNDHub-compatible API). A
//! withdrawal routed here is paid from the linked wallet's own balance; the
//! custodial ledger is never touched, which is why this module has no access
//! to the ledger at all.

use crate::btc;
use crate::ln;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error("linked wallet unreachable: {0}")]
    Unreachable(String),
    #[error("linked wallet rejected the payment: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}

const TIMEOUT_SECS: u64 = 30;

/// Submits an invoice to the linked wallet for payment. The access URL
/// carries the wallet's bearer token, stored when the user linked it.
pub async fn pay_invoice(
    access_url: &Url,
    invoice: &ln::RawInvoice,
    amount: btc::MilliSats,
) -> Result<(), Error> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(TIMEOUT_SECS))
        .build()
        .unwrap();
    let resp = http
        .post(format!(
            "{}/payinvoice",
            access_url.as_str().trim_end_matches('/')
        ))
        .json(&serde_json::json!({
            "invoice": invoice.0,
            "amount": amount.sats_floor().0,
        }))
        .send()
        .await?;
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Rejected(body));
    }
    let body: PayResponse = resp.json().await.map_err(Error::from)?;
    if let Some(message) = body.payment_error.filter(|message| !message.is_empty()) {
        return Err(Error::Rejected(message));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PayResponse {
    #[serde(default)]
    payment_error: Option<String>,
}
