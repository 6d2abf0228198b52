use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::RentCastConfig;
use crate::core::constants;

/// A completed HTTP exchange, reduced to what classification needs.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: String,
}

/// Failures that never produced a status code.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Seam between the retry state machine and the wire.
///
/// Resolved at construction time: production wires `HttpTransport`, tests
/// wire scripted implementations.
#[async_trait]
pub trait PropertyTransport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<TransportReply, TransportError>;
}

/// Production transport over reqwest with the RentCast API-key header.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &RentCastConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("X-Api-Key", HeaderValue::from_str(&config.api_key)?);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(constants::USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PropertyTransport for HttpTransport {
    async fn execute(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        Ok(TransportReply {
            status,
            retry_after,
            body,
        })
    }
}
