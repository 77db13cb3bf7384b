//! Execution records and their status state machine.
//!
//! An [`Execution`] is the durable system-of-record entry for one run of a
//! workflow. An [`ExecutionState`] is the ephemeral, TTL-bound mirror that
//! tracks progress node by node for pollers.
//!
//! Status moves `pending -> running -> completed | failed`. A run that never
//! started may also go straight from `pending` to `failed`. Terminal records
//! are never changed again.

use crate::node::{NodeId, NodeKind};
use agentflow_core::{ExecutionId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// The status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet picked up by its run task.
    Pending,
    /// Nodes are being executed.
    Running,
    /// Reached an output or a node without successors.
    Completed,
    /// Stopped by an error, cancellation or timeout.
    Failed,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if a record in this status may move to `next`.
    ///
    /// Staying in the same non-terminal status is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending | Self::Running | Self::Failed)
                | (Self::Running, Self::Running | Self::Completed | Self::Failed)
        )
    }

    /// Returns the wire name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown execution status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A user-visible warning raised while executing a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWarning {
    /// The node that raised the warning.
    pub node_id: NodeId,
    /// What went wrong.
    pub message: String,
    /// When the warning was raised.
    pub raised_at: DateTime<Utc>,
}

impl ExecutionWarning {
    /// Creates a warning raised now.
    #[must_use]
    pub fn new(node_id: NodeId, message: impl Into<String>) -> Self {
        Self {
            node_id,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// The durable record of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The user who started the execution.
    pub user_id: UserId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Input handed to the trigger node.
    pub input: JsonValue,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the run task started executing nodes.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Final output, present once completed.
    pub result: Option<JsonValue>,
    /// Error message, present iff failed.
    pub error: Option<String>,
    /// Warnings raised by nodes that degraded instead of failing.
    #[serde(default)]
    pub warnings: Vec<ExecutionWarning>,
}

impl Execution {
    /// Creates a new execution in `pending` status.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, user_id: UserId, input: JsonValue) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            input,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Marks the execution as running.
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Marks the execution as completed.
    pub fn complete(&mut self, result: JsonValue) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        self.error = None;
    }

    /// Marks the execution as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Returns true if the execution reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the time from start to completion, if both are known.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// The recorded output of one node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node that ran.
    pub node_id: NodeId,
    /// Its kind.
    pub kind: NodeKind,
    /// What it produced.
    pub output: JsonValue,
    /// When it finished.
    pub finished_at: DateTime<Utc>,
    /// How long the handler took, in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

/// Returns the ephemeral store key for an execution's state.
#[must_use]
pub fn state_key(execution_id: ExecutionId) -> String {
    format!("execution:{execution_id}:state")
}

/// The ephemeral progress mirror of an execution.
///
/// Written whole after every node, so a reader always sees a consistent
/// prefix of the traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// The execution this state belongs to.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: ExecutionStatus,
    /// The node currently executing, or the last one executed.
    pub current_node_id: Option<NodeId>,
    /// One entry per node visit, in traversal order.
    pub node_results: Vec<NodeResult>,
    /// Warnings raised so far.
    #[serde(default)]
    pub warnings: Vec<ExecutionWarning>,
    /// Error message once failed.
    pub error: Option<String>,
    /// When this snapshot was written.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Creates the initial state for an execution.
    #[must_use]
    pub fn new(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            status: execution.status,
            current_node_id: None,
            node_results: Vec::new(),
            warnings: Vec::new(),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Returns the most recent output recorded for a node.
    #[must_use]
    pub fn result_for(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.node_results
            .iter()
            .rev()
            .find(|result| &result.node_id == node_id)
            .map(|result| &result.output)
    }

    /// Returns the ids of visited nodes, in traversal order.
    #[must_use]
    pub fn visited(&self) -> Vec<&NodeId> {
        self.node_results.iter().map(|result| &result.node_id).collect()
    }

    /// Returns the store key for this state.
    #[must_use]
    pub fn key(&self) -> String {
        state_key(self.execution_id)
    }
}
