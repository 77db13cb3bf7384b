//! Error types for the workflow crate.
//!
//! Errors are layered the same way the engine is:
//! - `GraphViolation` / `InvalidGraph`: structural problems in a definition
//! - `NodeError`: a single node handler failed
//! - `AgentError`, `StoreError`, `WebhookError`: collaborator failures,
//!   returned wrapped in a `rootcause::Report` where the collaborator can add context
//! - `PersistenceError`: the execution persistence adapter
//! - `EngineError`: everything the coordinator reports to callers

use crate::execution::ExecutionStatus;
use crate::node::NodeId;
use agentflow_core::ExecutionId;
use rootcause::Report;
use std::fmt;

/// A single structural problem in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphViolation {
    /// The workflow has no trigger node.
    MissingTrigger,
    /// The workflow has more than one trigger node.
    MultipleTriggers { node_ids: Vec<NodeId> },
    /// Two or more nodes share an id.
    DuplicateNodeId { node_id: NodeId },
    /// An edge references a node that does not exist.
    DanglingEdge {
        source: NodeId,
        target: NodeId,
        missing: NodeId,
    },
    /// A node cannot be reached from the trigger.
    UnreachableNode { node_id: NodeId },
    /// A condition node lacks the edge for one of its branches.
    MissingBranch { node_id: NodeId, branch: bool },
    /// A condition node has more than one edge for the same branch.
    DuplicateBranch { node_id: NodeId, branch: bool },
    /// A condition edge is unlabeled or labeled other than true/false.
    UnexpectedBranchLabel {
        node_id: NodeId,
        target: NodeId,
        label: Option<String>,
    },
    /// A non-condition node has more than one outgoing edge.
    AmbiguousSuccessor { node_id: NodeId, count: usize },
}

impl fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrigger => write!(f, "workflow has no trigger node"),
            Self::MultipleTriggers { node_ids } => {
                let ids: Vec<&str> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "workflow has multiple trigger nodes: {}", ids.join(", "))
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id: {node_id}")
            }
            Self::DanglingEdge {
                source,
                target,
                missing,
            } => {
                write!(f, "edge {source} -> {target} references missing node {missing}")
            }
            Self::UnreachableNode { node_id } => {
                write!(f, "node {node_id} is not reachable from the trigger")
            }
            Self::MissingBranch { node_id, branch } => {
                write!(f, "condition node {node_id} has no '{branch}' edge")
            }
            Self::DuplicateBranch { node_id, branch } => {
                write!(f, "condition node {node_id} has more than one '{branch}' edge")
            }
            Self::UnexpectedBranchLabel {
                node_id,
                target,
                label,
            } => match label {
                Some(label) => write!(
                    f,
                    "condition edge {node_id} -> {target} has unexpected label '{label}'"
                ),
                None => write!(f, "condition edge {node_id} -> {target} has no label"),
            },
            Self::AmbiguousSuccessor { node_id, count } => {
                write!(f, "node {node_id} has {count} outgoing edges, expected at most one")
            }
        }
    }
}

/// A workflow definition failed validation.
///
/// Carries every violation found, in a stable order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidGraph {
    /// All violations found.
    pub violations: Vec<GraphViolation>,
}

impl InvalidGraph {
    /// Returns true if a violation equal to `violation` was found.
    #[must_use]
    pub fn contains(&self, violation: &GraphViolation) -> bool {
        self.violations.contains(violation)
    }
}

impl fmt::Display for InvalidGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow graph")?;
        for (i, violation) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidGraph {}

/// Failure of a single node handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The agent executor failed or timed out.
    AgentExecution { reason: String },
    /// The condition expression failed or did not yield a boolean.
    ConditionEvaluation { reason: String },
    /// Any other handler failure.
    Failed { reason: String },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentExecution { reason } => write!(f, "agent execution failed: {reason}"),
            Self::ConditionEvaluation { reason } => {
                write!(f, "condition evaluation failed: {reason}")
            }
            Self::Failed { reason } => write!(f, "node failed: {reason}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Errors reported by an agent executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The agent could not be reached.
    Unavailable { reason: String },
    /// The agent did not answer in time.
    Timeout,
    /// The agent answered with an error.
    Failed { reason: String },
}

impl AgentError {
    /// Returns true if a retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "agent unavailable: {reason}"),
            Self::Timeout => write!(f, "agent timed out"),
            Self::Failed { reason } => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for AgentError {}

/// Errors from durable or ephemeral stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing service could not be reached.
    Unavailable { message: String },
    /// A read or write failed.
    Operation { message: String },
    /// A stored value could not be encoded or decoded.
    Serialization { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "store unavailable: {message}"),
            Self::Operation { message } => write!(f, "store operation failed: {message}"),
            Self::Serialization { message } => write!(f, "serialization failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// The request could not be sent.
    Request { message: String },
    /// The receiver answered with a non-success status.
    Status { status: u16 },
    /// The receiver did not answer in time.
    Timeout,
}

impl fmt::Display for WebhookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { message } => write!(f, "webhook request failed: {message}"),
            Self::Status { status } => write!(f, "webhook receiver returned status {status}"),
            Self::Timeout => write!(f, "webhook request timed out"),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Errors from the execution persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// No execution with this id exists.
    NotFound { execution_id: ExecutionId },
    /// The requested status change is not allowed.
    InvalidTransition {
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// A collaborator store failed.
    Store { message: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { execution_id } => write!(f, "execution not found: {execution_id}"),
            Self::InvalidTransition {
                execution_id,
                from,
                to,
            } => write!(
                f,
                "invalid status transition for {execution_id}: {from} -> {to}"
            ),
            Self::Store { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<Report<StoreError>> for PersistenceError {
    fn from(report: Report<StoreError>) -> Self {
        Self::Store {
            message: report.to_string(),
        }
    }
}

/// Errors reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow definition is structurally invalid.
    InvalidGraph { violations: Vec<GraphViolation> },
    /// An agent node failed.
    AgentExecution { node_id: NodeId, reason: String },
    /// A condition node failed.
    ConditionEvaluation { node_id: NodeId, reason: String },
    /// Another node failure.
    NodeFailed { node_id: NodeId, reason: String },
    /// The run exceeded the step ceiling.
    GraphCycle { max_steps: u32 },
    /// The run was cancelled or timed out.
    Cancelled { reason: String },
    /// A workflow or execution does not exist.
    NotFound { what: String },
    /// The workflow is not active.
    WorkflowInactive,
    /// Persisting execution data failed.
    Persistence { reason: String },
}

impl EngineError {
    /// Attaches the failing node to a handler error.
    #[must_use]
    pub fn from_node(node_id: NodeId, error: NodeError) -> Self {
        match error {
            NodeError::AgentExecution { reason } => Self::AgentExecution { node_id, reason },
            NodeError::ConditionEvaluation { reason } => {
                Self::ConditionEvaluation { node_id, reason }
            }
            NodeError::Failed { reason } => Self::NodeFailed { node_id, reason },
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGraph { violations } => {
                write!(
                    f,
                    "{}",
                    InvalidGraph {
                        violations: violations.clone()
                    }
                )
            }
            Self::AgentExecution { node_id, reason } => {
                write!(f, "agent node {node_id} failed: {reason}")
            }
            Self::ConditionEvaluation { node_id, reason } => {
                write!(f, "condition node {node_id} failed: {reason}")
            }
            Self::NodeFailed { node_id, reason } => {
                write!(f, "node {node_id} failed: {reason}")
            }
            Self::GraphCycle { max_steps } => {
                write!(f, "execution exceeded {max_steps} steps; the graph likely contains a cycle")
            }
            Self::Cancelled { reason } => write!(f, "execution cancelled: {reason}"),
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::WorkflowInactive => write!(f, "workflow is not active"),
            Self::Persistence { reason } => write!(f, "persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidGraph> for EngineError {
    fn from(err: InvalidGraph) -> Self {
        Self::InvalidGraph {
            violations: err.violations,
        }
    }
}

impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound { execution_id } => Self::NotFound {
                what: format!("execution {execution_id}"),
            },
            other => Self::Persistence {
                reason: other.to_string(),
            },
        }
    }
}

impl From<Report<StoreError>> for EngineError {
    fn from(report: Report<StoreError>) -> Self {
        Self::Persistence {
            reason: report.to_string(),
        }
    }
}
