//! Workflow execution engine for agentflow.
//!
//! This crate provides the engine that runs user-authored workflows:
//!
//! - **Graph Model**: typed nodes and edges, validation, and a petgraph-backed
//!   traversal view
//! - **Expressions**: a sandboxed expression language for condition and
//!   transform nodes, plus `{{path}}` templates
//! - **Node Handlers**: one behavior per node kind behind [`NodeExecutor`]
//! - **Coordinator**: the [`Engine`] state machine that walks a graph,
//!   persists progress and reports terminal status
//! - **Persistence**: the [`ExecutionPersistence`] adapter over a durable
//!   execution store and a TTL-bound state cache
//!
//! Collaborators (stores, agents, webhooks) are traits; in-memory versions
//! live in [`memory`] and a NATS key-value state cache in [`nats`].

pub mod agent;
pub mod coordinator;
pub mod definition;
pub mod edge;
pub mod error;
pub mod execution;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod memory;
pub mod nats;
pub mod node;
pub mod persistence;
pub mod store;
pub mod template;
pub mod webhook;

pub use agent::AgentExecutor;
pub use coordinator::{Engine, EngineConfig, ExecutionView};
pub use definition::{Workflow, WorkflowMetadata, WorkflowSummary};
pub use edge::Edge;
pub use error::{
    AgentError, EngineError, GraphViolation, InvalidGraph, NodeError, PersistenceError,
    StoreError, WebhookError,
};
pub use execution::{Execution, ExecutionState, ExecutionStatus, ExecutionWarning, NodeResult};
pub use expression::{Expression, ExpressionError};
pub use graph::{ValidationResult, WorkflowGraph, validate};
pub use handler::{NodeContext, NodeExecutor, NodeHandlers, NodeOutcome};
pub use node::{AgentConfig, Node, NodeConfig, NodeId, NodeKind, OutputFormat};
pub use persistence::{ExecutionPersistence, StatusUpdate};
pub use store::{ExecutionStore, StateCache, WorkflowStore};
pub use webhook::{WebhookDelivery, WebhookPayload, WebhookTarget};
