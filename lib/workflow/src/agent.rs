//! The agent invocation collaborator.

use crate::error::AgentError;
use crate::node::AgentConfig;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Runs a prompt against an AI agent.
///
/// Implementations own transport, retries and provider selection. The engine
/// only sees the agent configuration, the composed prompt and the raw result.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executes `prompt` with the given agent and returns its result.
    async fn execute(&self, agent: &AgentConfig, prompt: &str) -> Result<JsonValue, AgentError>;
}
