//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node. Edges leaving a condition
//! node carry a `"true"` or `"false"` label naming the branch they belong to.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Label of the edge taken when a condition evaluates to `true`.
pub const TRUE_BRANCH: &str = "true";

/// Label of the edge taken when a condition evaluates to `false`.
pub const FALSE_BRANCH: &str = "false";

/// A directed edge between two nodes of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The node this edge leaves.
    pub source: NodeId,
    /// The node this edge enters.
    pub target: NodeId,
    /// Branch label, used on condition outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Creates an unlabeled edge.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    /// Creates an edge for one branch of a condition node.
    #[must_use]
    pub fn branch(source: impl Into<NodeId>, target: impl Into<NodeId>, branch: bool) -> Self {
        Self::new(source, target).with_label(branch_label(branch))
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the branch this edge belongs to, if its label names one.
    #[must_use]
    pub fn branch_value(&self) -> Option<bool> {
        match self.label.as_deref() {
            Some(TRUE_BRANCH) => Some(true),
            Some(FALSE_BRANCH) => Some(false),
            _ => None,
        }
    }
}

/// Returns the edge label for a branch value.
#[must_use]
pub fn branch_label(branch: bool) -> &'static str {
    if branch { TRUE_BRANCH } else { FALSE_BRANCH }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_edges_carry_labels() {
        let yes = Edge::branch("C", "A", true);
        let no = Edge::branch("C", "B", false);

        assert_eq!(yes.label.as_deref(), Some("true"));
        assert_eq!(yes.branch_value(), Some(true));
        assert_eq!(no.branch_value(), Some(false));
    }

    #[test]
    fn other_labels_are_not_branches() {
        assert_eq!(Edge::new("A", "B").branch_value(), None);
        assert_eq!(Edge::new("A", "B").with_label("yes").branch_value(), None);
    }

    #[test]
    fn unlabeled_edge_omits_label_in_json() {
        let json = serde_json::to_value(Edge::new("A", "B")).expect("serialize");
        assert_eq!(json, serde_json::json!({ "source": "A", "target": "B" }));
    }
}
