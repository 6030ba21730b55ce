//! HTTP ingest transport.
//!
//! Sends each batch as `POST {endpoint}/v1/ingest` with a JSON body of the
//! form `{"events": [...]}` and a bearer API key. Failed attempts are
//! retried according to the [`RetryPolicy`]; once it is exhausted the batch
//! is dropped.

use std::time::Duration;

use async_trait::async_trait;
use invokelens_config::SdkConfig;
use invokelens_core::{Batch, DeliveryError, DeliveryOutcome, Transport};
use tracing::{debug, error, warn};

use crate::retry::RetryPolicy;

/// Path appended to the endpoint base URL.
pub const INGEST_PATH: &str = "/v1/ingest";

/// Longest response body kept in a [`DeliveryError::Http`].
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Batched HTTP delivery with retry.
pub struct HttpTransport {
    url: String,
    api_key: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport posting to `{endpoint_url}/v1/ingest`.
    pub fn new(
        endpoint_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> invokelens_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("invokelens-sdk-rust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| invokelens_core::Error::Config {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            url: format!("{}{INGEST_PATH}", endpoint_url.trim_end_matches('/')),
            api_key: api_key.into(),
            client,
            policy,
        })
    }

    /// Create a transport from the SDK configuration.
    pub fn from_config(config: &SdkConfig) -> invokelens_core::Result<Self> {
        Self::new(
            &config.endpoint_url,
            config.api_key.clone(),
            config.request_timeout(),
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One POST, no retry.
    async fn post_once(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(e.to_string())
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Http {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, batch: &Batch) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::Delivered { attempts: 0 };
        }

        let body = match serde_json::to_vec(batch) {
            Ok(body) => body,
            Err(e) => {
                error!(events = batch.len(), error = %e, "Failed to serialize batch, dropping it");
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    error: DeliveryError::Serialization(e.to_string()),
                };
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(body.clone()).await {
                Ok(()) => {
                    debug!(events = batch.len(), attempt, "Batch delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) if self.policy.should_retry(&e, attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        events = batch.len(),
                        attempts = attempt,
                        error = %e,
                        "Batch delivery failed, dropping events"
                    );
                    return DeliveryOutcome::Failed {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("policy", &self.policy)
            .finish()
    }
}
