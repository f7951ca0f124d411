//! Mail relay client, the notification channel for audit reports. Delivery
//! is fire-and-forget from the audit engine's point of view: a failure here
//! is reported as a degraded dependency, never as an audit failure.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error("mail relay unreachable: {0}")]
    Unreachable(String),
    #[error("mail relay rejected the message: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct MessageId(pub String);

pub struct Config {
    pub endpoint: Url,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    sender: String,
}

const TIMEOUT_SECS: u64 = 10;

impl Mailer {
    pub fn new(config: Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap();
        Self {
            http,
            endpoint: config.endpoint,
            api_key: config.api_key,
            sender: config.sender,
        }
    }

    pub async fn send_report(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, Error> {
        let resp = self
            .http
            .post(format!(
                "{}/messages",
                self.endpoint.as_str().trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.sender,
                "to": recipient,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Rejected(format!("status {}: {}", status, body)));
        }
        let body: SendResponse = resp.json().await.map_err(Error::from)?;
        Ok(MessageId(body.id))
    }

    /// Reachability probe for the audit's dependency health section.
    pub(crate) async fn probe(&self) -> Result<(), Error> {
        self.http
            .get(self.endpoint.as_str())
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: String,
}
