//! [`AgentExecutor`] backed by an [`LlmBackend`].

use crate::backend::LlmBackend;
use crate::llm_call::LlmCall;
use agentflow_workflow::{AgentConfig, AgentError, AgentExecutor};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, instrument};

/// Runs agent prompts as single LLM calls.
pub struct LlmAgentExecutor {
    backend: Arc<dyn LlmBackend>,
    max_tokens: Option<u32>,
}

impl LlmAgentExecutor {
    /// Creates an executor over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            max_tokens: None,
        }
    }

    /// Caps the tokens generated per call.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl AgentExecutor for LlmAgentExecutor {
    #[instrument(skip_all, fields(agent_id = %agent.id, provider = %self.backend.provider()))]
    async fn execute(&self, agent: &AgentConfig, prompt: &str) -> Result<JsonValue, AgentError> {
        let mut call = LlmCall::for_agent(agent, prompt);
        if let Some(max_tokens) = self.max_tokens {
            call = call.with_max_tokens(max_tokens);
        }

        let result = call.invoke(self.backend.as_ref()).await?;
        info!(
            invocation_id = %result.id,
            model = %result.model,
            latency_ms = result.latency_ms,
            tokens = result.usage.total(),
            "agent call finished"
        );
        Ok(result.output)
    }
}
