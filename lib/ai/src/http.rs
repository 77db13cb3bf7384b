//! HTTP gateway backend.
//!
//! Posts the provider-neutral [`LlmRequest`] as JSON to `{base_url}/v1/generate`
//! and expects an [`LlmResponse`] back. Provider-specific translation happens
//! behind the gateway.

use crate::backend::{LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Path of the generate endpoint, relative to the base URL.
const GENERATE_PATH: &str = "/v1/generate";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    options: &'a HashMap<String, JsonValue>,
}

impl<'a> GenerateBody<'a> {
    fn new(
        model: &'a str,
        request: &'a LlmRequest,
        options: &'a HashMap<String, JsonValue>,
    ) -> Self {
        Self {
            model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            metadata: &request.metadata,
            options,
        }
    }
}

/// An [`LlmBackend`] that talks to an HTTP inference gateway.
pub struct HttpLlmBackend {
    http: Client,
    config: LlmBackendConfig,
    endpoint: String,
}

impl HttpLlmBackend {
    /// Creates a backend with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL is empty or the HTTP client
    /// cannot be built.
    pub fn new(config: LlmBackendConfig) -> Result<Self, LlmError> {
        Self::with_timeout(config, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a backend with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL is empty or the HTTP client
    /// cannot be built.
    pub fn with_timeout(config: LlmBackendConfig, timeout: Duration) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "base_url must not be empty".to_string(),
            });
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let endpoint = endpoint_url(&config.base_url);
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    fn classify_send_error(&self, err: &reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::ProviderUnavailable {
                provider: self.config.provider.to_string(),
                reason: err.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                reason: err.to_string(),
            }
        }
    }
}

fn endpoint_url(base_url: &str) -> String {
    format!("{}{GENERATE_PATH}", base_url.trim_end_matches('/'))
}

/// Maps a non-success status to an error.
fn status_error(
    provider: LlmProvider,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    if status.is_server_error() {
        return LlmError::ProviderUnavailable {
            provider: provider.to_string(),
            reason: format!("status {status}"),
        };
    }
    LlmError::RequestFailed {
        reason: format!("status {status}: {}", body.trim()),
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    #[instrument(skip_all, fields(provider = %self.config.provider, model))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.config.model);
        tracing::Span::current().record("model", model);

        let body = GenerateBody::new(model, request, &self.config.options);
        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(self.config.provider, status, retry_after, &text));
        }

        let mut parsed: LlmResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::ResponseParseFailed {
                    reason: e.to_string(),
                })?;
        if parsed.model.is_empty() {
            parsed.model = model.to_string();
        }
        debug!(tokens = parsed.usage.total(), "generation finished");
        Ok(parsed)
    }

    fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(
            endpoint_url("http://gateway:8080/"),
            "http://gateway:8080/v1/generate"
        );
        assert_eq!(
            endpoint_url("http://gateway:8080"),
            "http://gateway:8080/v1/generate"
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let err = HttpLlmBackend::new(LlmBackendConfig::gateway(" ", "m"))
            .err()
            .expect("must reject");
        assert!(matches!(err, LlmError::InvalidConfig { .. }));
    }

    #[test]
    fn body_carries_request_fields_and_model() {
        let request = LlmRequest::new("hello")
            .with_model("ignored-here")
            .with_temperature(0.5);
        let mut options = HashMap::new();
        options.insert("top_p".to_string(), json!(0.9));
        let body = GenerateBody::new("default", &request, &options);
        assert_eq!(
            serde_json::to_value(&body).expect("serialize"),
            json!({
                "model": "default",
                "prompt": "hello",
                "temperature": 0.5,
                "options": {"top_p": 0.9}
            })
        );
    }

    #[test]
    fn status_codes_map_to_errors() {
        assert_eq!(
            status_error(
                LlmProvider::Gateway,
                StatusCode::TOO_MANY_REQUESTS,
                Some(7),
                ""
            ),
            LlmError::RateLimited {
                retry_after_secs: Some(7)
            }
        );
        assert!(
            status_error(LlmProvider::Gateway, StatusCode::BAD_GATEWAY, None, "").is_transient()
        );
        assert_eq!(
            status_error(LlmProvider::Gateway, StatusCode::BAD_REQUEST, None, "no prompt\n"),
            LlmError::RequestFailed {
                reason: "status 400 Bad Request: no prompt".to_string()
            }
        );
    }
}
