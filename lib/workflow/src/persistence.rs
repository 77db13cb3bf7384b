//! Execution state persistence.
//!
//! [`ExecutionPersistence`] is the only component that writes execution data.
//! It enforces the status state machine on top of a durable
//! [`ExecutionStore`] and mirrors progress snapshots into a TTL-bound
//! [`StateCache`].
//!
//! Snapshots are capped in size. When one would grow past the cap, the
//! outputs of the oldest node results are replaced by an elision marker
//! (`{"elided": true, "bytes": n}`) until it fits. The final result always
//! lives in the durable record.

use crate::error::PersistenceError;
use crate::execution::{Execution, ExecutionState, ExecutionStatus, ExecutionWarning, state_key};
use crate::store::{ExecutionStore, StateCache};
use agentflow_core::{ExecutionId, UserId, WorkflowId};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Default retention of execution state snapshots.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(3600);

/// Default ceiling on an encoded state snapshot. NATS rejects payloads over
/// 1 MiB unless the server raises `max_payload`.
pub const DEFAULT_MAX_SNAPSHOT_BYTES: usize = 512 * 1024;

/// Fields applied together with a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// Final output, used when completing.
    pub result: Option<JsonValue>,
    /// Error message, used when failing.
    pub error: Option<String>,
    /// Replaces the recorded warnings when present.
    pub warnings: Option<Vec<ExecutionWarning>>,
}

impl StatusUpdate {
    /// An update carrying a final result.
    #[must_use]
    pub fn result(result: JsonValue) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// An update carrying an error message.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Also replaces the recorded warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<ExecutionWarning>) -> Self {
        self.warnings = Some(warnings);
        self
    }
}

/// Reads and writes executions and their state snapshots.
pub struct ExecutionPersistence {
    executions: Arc<dyn ExecutionStore>,
    states: Arc<dyn StateCache>,
    state_ttl: Duration,
    max_snapshot_bytes: usize,
    locks: Mutex<HashMap<ExecutionId, Arc<Mutex<()>>>>,
}

impl ExecutionPersistence {
    /// Creates the adapter over its two stores.
    #[must_use]
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        states: Arc<dyn StateCache>,
        state_ttl: Duration,
    ) -> Self {
        Self {
            executions,
            states,
            state_ttl,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the ceiling on an encoded state snapshot.
    #[must_use]
    pub fn with_max_snapshot_bytes(mut self, max: usize) -> Self {
        self.max_snapshot_bytes = max;
        self
    }

    /// Returns how long state snapshots are retained.
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    /// Creates and stores a new pending execution.
    #[instrument(skip_all, fields(workflow_id = %workflow_id, user_id = %user_id))]
    pub async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        input: JsonValue,
    ) -> Result<Execution, PersistenceError> {
        let execution = Execution::new(workflow_id, user_id, input);
        self.executions.insert(&execution).await?;
        debug!(execution_id = %execution.id, "execution created");
        Ok(execution)
    }

    /// Moves an execution to `status`, applying `update`.
    ///
    /// Repeating the current terminal status returns the stored record without
    /// writing. Any other change out of a terminal status, or a change the
    /// state machine does not allow, is rejected.
    #[instrument(skip_all, fields(execution_id = %id, status = %status))]
    pub async fn update_execution_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        update: StatusUpdate,
    ) -> Result<Execution, PersistenceError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut execution = self
            .executions
            .find_by_id(id)
            .await?
            .ok_or(PersistenceError::NotFound { execution_id: id })?;

        if execution.status.is_terminal() && execution.status == status {
            debug!("execution already in requested terminal status");
            return Ok(execution);
        }
        if !execution.status.can_transition_to(status) {
            return Err(PersistenceError::InvalidTransition {
                execution_id: id,
                from: execution.status,
                to: status,
            });
        }

        match status {
            ExecutionStatus::Pending => {}
            ExecutionStatus::Running => execution.start(),
            ExecutionStatus::Completed => {
                execution.complete(update.result.unwrap_or(JsonValue::Null));
            }
            ExecutionStatus::Failed => {
                execution.fail(
                    update
                        .error
                        .unwrap_or_else(|| "execution failed".to_string()),
                );
            }
        }
        if let Some(warnings) = update.warnings {
            execution.warnings = warnings;
        }

        if !self.executions.update(&execution).await? {
            return Err(PersistenceError::NotFound { execution_id: id });
        }
        if status.is_terminal() {
            self.locks.lock().await.remove(&id);
        }
        Ok(execution)
    }

    /// Loads an execution.
    pub async fn get_execution(&self, id: ExecutionId) -> Result<Execution, PersistenceError> {
        self.executions
            .find_by_id(id)
            .await?
            .ok_or(PersistenceError::NotFound { execution_id: id })
    }

    /// Lists executions of a workflow, most recently started first.
    pub async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, PersistenceError> {
        Ok(self
            .executions
            .list_by_workflow(workflow_id, limit)
            .await?)
    }

    /// Writes a state snapshot, replacing the previous one.
    ///
    /// Old node outputs are elided when the snapshot would exceed the size
    /// cap. If it still does not fit, the previous snapshot is kept.
    pub async fn save_state(&self, state: &ExecutionState) -> Result<(), PersistenceError> {
        let mut bytes = encode(state)?;
        if bytes.len() > self.max_snapshot_bytes {
            let Some(compacted) = self.compact(state, bytes.len())? else {
                warn!(
                    execution_id = %state.execution_id,
                    bytes = bytes.len(),
                    limit = self.max_snapshot_bytes,
                    "state snapshot too large, keeping the previous one"
                );
                return Ok(());
            };
            bytes = compacted;
        }
        self.states.set(&state.key(), bytes, self.state_ttl).await?;
        Ok(())
    }

    /// Elides node outputs, oldest first, until the encoded snapshot fits.
    fn compact(
        &self,
        state: &ExecutionState,
        encoded_len: usize,
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        let mut compacted = state.clone();
        let mut len = encoded_len;
        let mut elided = 0;
        for result in &mut compacted.node_results {
            if len <= self.max_snapshot_bytes {
                break;
            }
            let original = encode(&result.output)?.len();
            let marker = elided_output(original);
            let replacement = encode(&marker)?.len();
            if replacement >= original {
                continue;
            }
            result.output = marker;
            len -= original - replacement;
            elided += 1;
        }
        if len > self.max_snapshot_bytes {
            return Ok(None);
        }
        debug!(elided, bytes = len, "elided node outputs from state snapshot");
        encode(&compacted).map(Some)
    }

    /// Loads the latest state snapshot; absent once expired.
    pub async fn get_execution_state(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionState>, PersistenceError> {
        let Some(bytes) = self.states.get(&state_key(id)).await? else {
            return Ok(None);
        };
        let state = serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Store {
            message: format!("invalid state snapshot for {id}: {e}"),
        })?;
        Ok(Some(state))
    }

    /// Removes the state snapshot of an execution.
    pub async fn clear_state(&self, id: ExecutionId) -> Result<(), PersistenceError> {
        self.states.delete(&state_key(id)).await?;
        Ok(())
    }

    async fn lock_for(&self, id: ExecutionId) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(id).or_default().clone()
    }
}

/// Stands in for a node output dropped from a snapshot.
fn elided_output(bytes: usize) -> JsonValue {
    json!({ "elided": true, "bytes": bytes })
}

fn encode(value: &impl serde::Serialize) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(value).map_err(|e| PersistenceError::Store {
        message: format!("failed to encode state snapshot: {e}"),
    })
}
