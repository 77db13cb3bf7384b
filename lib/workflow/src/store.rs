//! Storage collaborators used by the engine.
//!
//! The engine never talks to a database directly. It reads workflow
//! definitions through a [`WorkflowStore`], keeps the system of record in an
//! [`ExecutionStore`] and mirrors progress into a TTL-bound [`StateCache`].
//! Implementations live next to their backing service: Postgres in the server
//! binary, NATS key-value in [`crate::nats`], and in-memory doubles in
//! [`crate::memory`].

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::Execution;
use agentflow_core::{ExecutionId, Result, WorkflowId};
use async_trait::async_trait;
use std::time::Duration;

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow by id.
    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;
}

/// Durable storage for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a new execution.
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Overwrites an existing execution.
    ///
    /// Returns `false` if no execution with this id exists.
    async fn update(&self, execution: &Execution) -> Result<bool, StoreError>;

    /// Loads an execution by id.
    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Lists executions of a workflow, most recently started first.
    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;
}

/// Ephemeral key-value storage with expiry.
#[async_trait]
pub trait StateCache: Send + Sync {
    /// Stores a value, replacing any previous one, for at most `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Loads a value; expired values are absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes a value.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
