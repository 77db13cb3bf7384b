//! Webhook delivery over HTTP.

use agentflow_workflow::error::WebhookError;
use agentflow_workflow::{WebhookDelivery, WebhookPayload, WebhookTarget};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Header naming the delivered event.
pub const EVENT_HEADER: &str = "x-agentflow-event";

/// Settings for outgoing webhook requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl WebhookSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Posts webhook payloads as JSON.
pub struct HttpWebhookDelivery {
    http: Client,
}

impl HttpWebhookDelivery {
    /// Creates a delivery client with the given settings.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Request` if the HTTP client cannot be built.
    pub fn new(settings: WebhookSettings) -> Result<Self, WebhookError> {
        Self::with_timeout(settings.timeout())
    }

    /// Creates a delivery client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Request` if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, WebhookError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebhookError::Request {
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

fn classify(err: &reqwest::Error) -> WebhookError {
    if err.is_timeout() {
        WebhookError::Timeout
    } else {
        WebhookError::Request {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl WebhookDelivery for HttpWebhookDelivery {
    #[instrument(skip_all, fields(trigger_id = %target.trigger_id, event = %target.event))]
    async fn deliver(
        &self,
        target: &WebhookTarget,
        payload: WebhookPayload,
    ) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(&target.url)
            .header(EVENT_HEADER, &target.event)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status {
                status: status.as_u16(),
            });
        }
        debug!(status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}
