//! LLM-backed agents for agentflow.
//!
//! The workflow engine invokes agents through
//! [`agentflow_workflow::AgentExecutor`]. This crate supplies the
//! implementation that talks to a model:
//!
//! - **LLM Call**: single-shot inference against an [`LlmBackend`]
//! - **HTTP backend**: [`HttpLlmBackend`], a JSON client for an inference gateway
//! - **Executor**: [`LlmAgentExecutor`], an agent executor over any backend
//! - **Retry**: [`RetryingAgentExecutor`], exponential backoff on transient failures

pub mod backend;
pub mod error;
pub mod executor;
pub mod http;
pub mod llm_call;
pub mod retry;

pub use backend::{
    LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse, TokenUsage,
};
pub use error::LlmError;
pub use executor::LlmAgentExecutor;
pub use http::HttpLlmBackend;
pub use llm_call::{LlmCall, LlmCallResult, LlmInvocationId};
pub use retry::{RetryPolicy, RetryingAgentExecutor};
