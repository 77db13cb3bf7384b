//! In-memory collaborators.
//!
//! These implement every collaborator trait without external services. They
//! back the engine's tests and let the server run without Postgres or NATS
//! for local experiments.

use crate::agent::AgentExecutor;
use crate::definition::{Workflow, WorkflowSummary};
use crate::error::{AgentError, StoreError, WebhookError};
use crate::execution::Execution;
use crate::node::AgentConfig;
use crate::store::{ExecutionStore, StateCache, WorkflowStore};
use crate::webhook::{WebhookDelivery, WebhookPayload, WebhookTarget};
use agentflow_core::{ExecutionId, Result, UserId, WorkflowId};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Workflow definitions held in memory.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a workflow.
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    /// Summaries of the workflows a user owns, most recently updated first.
    pub async fn list_by_owner(&self, owner: UserId) -> Vec<WorkflowSummary> {
        let workflows = self.workflows.read().await;
        let mut summaries: Vec<WorkflowSummary> = workflows
            .values()
            .filter(|workflow| workflow.owner == owner)
            .map(WorkflowSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }
}

/// Execution records held in memory.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    writes: AtomicUsize,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inserts and updates performed so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Returns true if no execution is stored.
    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|execution| execution.workflow_id == workflow_id)
            .cloned()
            .collect();
        // Most recently started first; never-started runs last, newest first.
        matching.sort_by(|a, b| {
            b.started_at
                .is_some()
                .cmp(&a.started_at.is_some())
                .then(b.started_at.cmp(&a.started_at))
                .then(b.created_at.cmp(&a.created_at))
        });
        matching.truncate(limit);
        Ok(matching)
    }
}

/// A key-value cache held in memory, honoring per-key TTLs.
#[derive(Default)]
pub struct InMemoryStateCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    max_value_bytes: Option<usize>,
}

impl InMemoryStateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes larger than `max` bytes, like a server payload limit.
    #[must_use]
    pub fn with_max_value_bytes(mut self, max: usize) -> Self {
        self.max_value_bytes = Some(max);
        self
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        if let Some(max) = self.max_value_bytes.filter(|max| value.len() > *max) {
            return Err(StoreError::Operation {
                message: format!("{key} is {} bytes, the limit is {max}", value.len()),
            }
            .into());
        }
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// An agent executor that answers from a script.
///
/// Scripted answers are consumed in order; once exhausted, the fallback
/// answer is returned for every call. Every prompt is recorded.
pub struct ScriptedAgentExecutor {
    script: Mutex<VecDeque<std::result::Result<JsonValue, AgentError>>>,
    fallback: std::result::Result<JsonValue, AgentError>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgentExecutor {
    /// Creates an executor that always answers `reply`.
    #[must_use]
    pub fn replying(reply: JsonValue) -> Self {
        Self::with_fallback(Ok(reply))
    }

    /// Creates an executor that always fails with `error`.
    #[must_use]
    pub fn failing(error: AgentError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: std::result::Result<JsonValue, AgentError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues an answer to return before the fallback.
    #[must_use]
    pub fn then(mut self, answer: std::result::Result<JsonValue, AgentError>) -> Self {
        self.script.get_mut().push_back(answer);
        self
    }

    /// Waits this long before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgentExecutor {
    async fn execute(
        &self,
        _agent: &AgentConfig,
        prompt: &str,
    ) -> std::result::Result<JsonValue, AgentError> {
        self.prompts.lock().await.push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().await.pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// A webhook delivery that records payloads instead of sending them.
#[derive(Default)]
pub struct RecordingWebhookDelivery {
    deliveries: Mutex<Vec<(WebhookTarget, WebhookPayload)>>,
    failure: Option<WebhookError>,
}

impl RecordingWebhookDelivery {
    /// Creates a delivery that records and succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delivery that records and then fails with `error`.
    #[must_use]
    pub fn failing(error: WebhookError) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    /// Returns the deliveries attempted so far.
    pub async fn deliveries(&self) -> Vec<(WebhookTarget, WebhookPayload)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl WebhookDelivery for RecordingWebhookDelivery {
    async fn deliver(
        &self,
        target: &WebhookTarget,
        payload: WebhookPayload,
    ) -> std::result::Result<(), WebhookError> {
        self.deliveries.lock().await.push((target.clone(), payload));
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
