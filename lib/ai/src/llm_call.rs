//! LLM Call primitive.
//!
//! A single-shot inference against a backend: build the request from an
//! agent's configuration, send it, and keep what came back together with
//! timing and usage.

use crate::backend::{LlmBackend, LlmRequest, LlmResponse, TokenUsage};
use crate::error::LlmError;
use agentflow_workflow::AgentConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;
use ulid::Ulid;

/// Unique identifier for an LLM invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LlmInvocationId(Ulid);

impl LlmInvocationId {
    /// Creates a new invocation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LlmInvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LlmInvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "llm_{}", self.0)
    }
}

/// The result of an LLM Call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallResult {
    /// Unique identifier for this invocation.
    pub id: LlmInvocationId,
    /// The response as a JSON value.
    pub output: JsonValue,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

impl LlmCallResult {
    /// Creates a result from an LLM response.
    #[must_use]
    pub fn from_response(response: LlmResponse, latency_ms: u64) -> Self {
        let usage = response.usage;
        let model = response.model.clone();
        Self {
            id: LlmInvocationId::new(),
            output: response.into_value(),
            usage,
            model,
            timestamp: Utc::now(),
            latency_ms,
        }
    }
}

/// A prepared LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCall {
    request: LlmRequest,
}

impl LlmCall {
    /// Creates a call with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request: LlmRequest::new(prompt),
        }
    }

    /// Creates a call for an agent: its model and temperature apply and its
    /// id travels as metadata.
    #[must_use]
    pub fn for_agent(agent: &AgentConfig, prompt: impl Into<String>) -> Self {
        let mut request = LlmRequest::new(prompt).with_metadata("agent_id", agent.id.clone());
        if let Some(model) = &agent.model {
            request = request.with_model(model.clone());
        }
        if let Some(temperature) = agent.temperature {
            request = request.with_temperature(temperature);
        }
        Self { request }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.request.system = Some(system.into());
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    /// Returns the request this call sends.
    #[must_use]
    pub fn request(&self) -> &LlmRequest {
        &self.request
    }

    /// Sends the call.
    ///
    /// # Errors
    ///
    /// Returns the backend's error unchanged.
    pub async fn invoke(&self, backend: &dyn LlmBackend) -> Result<LlmCallResult, LlmError> {
        let started = Instant::now();
        let response = backend.generate(&self.request).await?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(LlmCallResult::from_response(response, latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_settings_shape_the_request() {
        let agent = AgentConfig::new("summarizer", "You summarize.")
            .with_model("large")
            .with_temperature(0.3);
        let call = LlmCall::for_agent(&agent, "Summarize X").with_max_tokens(256);

        let request = call.request();
        assert_eq!(request.prompt, "Summarize X");
        assert_eq!(request.model.as_deref(), Some("large"));
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.metadata["agent_id"], "summarizer");
    }

    #[test]
    fn agent_without_overrides_uses_backend_defaults() {
        let call = LlmCall::for_agent(&AgentConfig::new("a", "role"), "p");
        assert!(call.request().model.is_none());
        assert!(call.request().temperature.is_none());
    }

    #[test]
    fn result_keeps_usage_and_value() {
        let response = LlmResponse {
            content: "done".to_string(),
            structured_output: None,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "small".to_string(),
        };
        let result = LlmCallResult::from_response(response, 42);
        assert_eq!(result.output, json!("done"));
        assert_eq!(result.usage.total(), 15);
        assert_eq!(result.latency_ms, 42);
        assert!(result.id.to_string().starts_with("llm_"));
    }
}
