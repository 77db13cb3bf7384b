//! Workflow definition types.
//!
//! A workflow is a user-owned automation that consists of:
//! - Metadata (name, description, active flag, timestamps)
//! - The nodes and edges of its graph, in definition order
//!
//! Definitions are read-only to the engine; validation happens in
//! [`crate::graph::validate`] before anything executes.

use crate::edge::Edge;
use crate::graph::{self, ValidationResult};
use crate::node::{Node, NodeId};
use agentflow_core::{UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether this workflow may be executed.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// The user who owns this workflow.
    pub owner: UserId,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// Nodes, in definition order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges, in definition order.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Creates a new, empty workflow with the given name.
    #[must_use]
    pub fn new(owner: UserId, name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), owner, name)
    }

    /// Creates a workflow with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, owner: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            metadata: WorkflowMetadata::new(name),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns whether the workflow may be executed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.metadata.is_active
    }

    /// Marks the workflow as executable.
    pub fn activate(&mut self) {
        self.metadata.is_active = true;
        self.touch();
    }

    /// Marks the workflow as not executable.
    pub fn deactivate(&mut self) {
        self.metadata.is_active = false;
        self.touch();
    }

    /// Returns the first node with the given id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Validates the workflow graph.
    ///
    /// # Errors
    ///
    /// Returns every structural violation found in the graph.
    pub fn validate(&self) -> ValidationResult {
        graph::validate(self)
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Workflow name.
    pub name: String,
    /// Whether the workflow may be executed.
    pub is_active: bool,
    /// Number of nodes in the graph.
    pub node_count: usize,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.metadata.name.clone(),
            is_active: workflow.metadata.is_active,
            node_count: workflow.nodes.len(),
            updated_at: workflow.metadata.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::OutputFormat;

    #[test]
    fn workflow_creation() {
        let workflow = Workflow::new(UserId::new(), "Test Workflow");
        assert_eq!(workflow.name(), "Test Workflow");
        assert!(workflow.is_active());
        assert!(workflow.nodes.is_empty());
    }

    #[test]
    fn workflow_activate_deactivate() {
        let mut workflow = Workflow::new(UserId::new(), "Test");

        workflow.deactivate();
        assert!(!workflow.is_active());

        workflow.activate();
        assert!(workflow.is_active());
    }

    #[test]
    fn node_lookup_by_id() {
        let workflow = Workflow::new(UserId::new(), "Lookup")
            .with_node(Node::trigger("T"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "O"));

        assert!(workflow.node(&NodeId::new("O")).is_some());
        assert!(workflow.node(&NodeId::new("missing")).is_none());
    }

    #[test]
    fn workflow_summary_from_workflow() {
        let workflow = Workflow::new(UserId::new(), "Summary Test").with_node(Node::trigger("T"));
        let summary = WorkflowSummary::from(&workflow);

        assert_eq!(summary.id, workflow.id);
        assert_eq!(summary.name, "Summary Test");
        assert_eq!(summary.node_count, 1);
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let workflow = Workflow::new(UserId::new(), "Serialization Test")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_edge(Edge::new("T", "X"));
        let json = serde_json::to_string(&workflow).expect("serialize");
        let parsed: Workflow = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(workflow, parsed);
    }
}
