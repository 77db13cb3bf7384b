//! Workflow graph validation and traversal.
//!
//! [`validate`] checks a definition and reports every structural violation
//! at once. [`WorkflowGraph`] is the petgraph-backed view the coordinator
//! walks; it can only be built from a definition that passes validation.

use crate::definition::Workflow;
use crate::edge::Edge;
use crate::error::{GraphViolation, InvalidGraph};
use crate::node::{Node, NodeId, NodeKind};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet};

/// Outcome of validating a workflow definition.
pub type ValidationResult = Result<(), InvalidGraph>;

/// Validates a workflow definition, collecting every violation.
///
/// Checks:
/// - Exactly one trigger node
/// - Node ids are unique
/// - Every edge references existing nodes
/// - Every node is reachable from the trigger (only checked with a single trigger)
/// - Condition nodes with outgoing edges have exactly one `true` and one `false` edge
/// - Other nodes have at most one outgoing edge
///
/// Cycles are allowed here; the coordinator bounds them with a step ceiling.
///
/// # Errors
///
/// Returns [`InvalidGraph`] carrying all violations found.
pub fn validate(workflow: &Workflow) -> ValidationResult {
    let mut violations = Vec::new();

    let mut graph: DiGraph<&NodeId, ()> =
        DiGraph::with_capacity(workflow.nodes.len(), workflow.edges.len());
    let mut index: HashMap<&NodeId, NodeIndex> = HashMap::new();
    let mut unique_nodes: Vec<&Node> = Vec::with_capacity(workflow.nodes.len());
    let mut duplicates: HashSet<&NodeId> = HashSet::new();

    for node in &workflow.nodes {
        if index.contains_key(&node.id) {
            if duplicates.insert(&node.id) {
                violations.push(GraphViolation::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
            continue;
        }
        index.insert(&node.id, graph.add_node(&node.id));
        unique_nodes.push(node);
    }

    let triggers: Vec<&Node> = workflow
        .nodes
        .iter()
        .filter(|node| node.kind() == NodeKind::Trigger)
        .collect();
    match triggers.as_slice() {
        [] => violations.push(GraphViolation::MissingTrigger),
        [_] => {}
        many => violations.push(GraphViolation::MultipleTriggers {
            node_ids: many.iter().map(|node| node.id.clone()).collect(),
        }),
    }

    for edge in &workflow.edges {
        let source = index.get(&edge.source).copied();
        let target = index.get(&edge.target).copied();
        for (endpoint, id) in [(source, &edge.source), (target, &edge.target)] {
            if endpoint.is_none() {
                violations.push(GraphViolation::DanglingEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: id.clone(),
                });
            }
        }
        if let (Some(source), Some(target)) = (source, target) {
            graph.add_edge(source, target, ());
        }
    }

    if let [trigger] = triggers.as_slice() {
        if let Some(&start) = index.get(&trigger.id) {
            let mut reached = HashSet::new();
            let mut bfs = Bfs::new(&graph, start);
            while let Some(visited) = bfs.next(&graph) {
                reached.insert(visited);
            }
            for idx in graph.node_indices() {
                if !reached.contains(&idx) {
                    violations.push(GraphViolation::UnreachableNode {
                        node_id: graph[idx].clone(),
                    });
                }
            }
        }
    }

    for node in unique_nodes {
        let outgoing: Vec<&Edge> = workflow
            .edges
            .iter()
            .filter(|edge| edge.source == node.id)
            .collect();

        if node.kind() == NodeKind::Condition {
            check_branches(node, &outgoing, &mut violations);
        } else if outgoing.len() > 1 {
            violations.push(GraphViolation::AmbiguousSuccessor {
                node_id: node.id.clone(),
                count: outgoing.len(),
            });
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(InvalidGraph { violations })
    }
}

fn check_branches(node: &Node, outgoing: &[&Edge], violations: &mut Vec<GraphViolation>) {
    if outgoing.is_empty() {
        return;
    }

    let mut counts = [0usize; 2];
    for edge in outgoing {
        match edge.branch_value() {
            Some(branch) => counts[usize::from(branch)] += 1,
            None => violations.push(GraphViolation::UnexpectedBranchLabel {
                node_id: node.id.clone(),
                target: edge.target.clone(),
                label: edge.label.clone(),
            }),
        }
    }

    for branch in [true, false] {
        match counts[usize::from(branch)] {
            0 => violations.push(GraphViolation::MissingBranch {
                node_id: node.id.clone(),
                branch,
            }),
            1 => {}
            _ => violations.push(GraphViolation::DuplicateBranch {
                node_id: node.id.clone(),
                branch,
            }),
        }
    }
}

/// A validated workflow graph, ready for traversal.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    trigger: NodeIndex,
}

impl WorkflowGraph {
    /// Validates a workflow and builds its graph.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidGraph`] if the workflow fails validation.
    pub fn build(workflow: &Workflow) -> Result<Self, InvalidGraph> {
        validate(workflow)?;

        let mut graph = DiGraph::with_capacity(workflow.nodes.len(), workflow.edges.len());
        let mut node_index_map = HashMap::with_capacity(workflow.nodes.len());
        let mut trigger = None;
        for node in &workflow.nodes {
            let idx = graph.add_node(node.clone());
            if node.kind() == NodeKind::Trigger {
                trigger = Some(idx);
            }
            node_index_map.insert(node.id.clone(), idx);
        }

        for edge in &workflow.edges {
            let (Some(&source), Some(&target)) = (
                node_index_map.get(&edge.source),
                node_index_map.get(&edge.target),
            ) else {
                return Err(InvalidGraph {
                    violations: vec![GraphViolation::DanglingEdge {
                        source: edge.source.clone(),
                        target: edge.target.clone(),
                        missing: edge.target.clone(),
                    }],
                });
            };
            graph.add_edge(source, target, edge.clone());
        }

        let trigger = trigger.ok_or(InvalidGraph {
            violations: vec![GraphViolation::MissingTrigger],
        })?;

        Ok(Self {
            graph,
            node_index_map,
            trigger,
        })
    }

    /// Returns the trigger node.
    #[must_use]
    pub fn trigger(&self) -> &Node {
        &self.graph[self.trigger]
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all edges whose source is `node_id`, in definition order.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self.graph.edges_directed(index, Direction::Outgoing).collect();
        edges.sort_by_key(|edge| edge.id());
        edges.into_iter().map(|edge| edge.weight()).collect()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::OutputFormat;
    use agentflow_core::UserId;

    fn workflow() -> Workflow {
        Workflow::new(UserId::new(), "graph test")
    }

    fn violations(workflow: &Workflow) -> Vec<GraphViolation> {
        validate(workflow).expect_err("should be invalid").violations
    }

    #[test]
    fn linear_chain_is_valid() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "O"));

        assert!(validate(&wf).is_ok());
        let graph = WorkflowGraph::build(&wf).expect("build");
        assert_eq!(graph.trigger().id, NodeId::new("T"));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn zero_triggers_is_rejected() {
        let wf = workflow().with_node(Node::output("O", OutputFormat::Json));
        assert_eq!(violations(&wf), vec![GraphViolation::MissingTrigger]);
    }

    #[test]
    fn two_triggers_are_rejected() {
        let wf = workflow()
            .with_node(Node::trigger("T1"))
            .with_node(Node::trigger("T2"));

        assert_eq!(
            violations(&wf),
            vec![GraphViolation::MultipleTriggers {
                node_ids: vec![NodeId::new("T1"), NodeId::new("T2")]
            }]
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_node(Node::transform("X", "input"))
            .with_node(Node::output("Lonely", OutputFormat::Text))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "Ghost"));

        let found = violations(&wf);
        assert!(found.contains(&GraphViolation::DuplicateNodeId {
            node_id: NodeId::new("X")
        }));
        assert!(found.contains(&GraphViolation::DanglingEdge {
            source: NodeId::new("X"),
            target: NodeId::new("Ghost"),
            missing: NodeId::new("Ghost"),
        }));
        assert!(found.contains(&GraphViolation::UnreachableNode {
            node_id: NodeId::new("Lonely")
        }));
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn condition_needs_both_branches() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::condition("C", "input.ok"))
            .with_node(Node::output("Yes", OutputFormat::Json))
            .with_edge(Edge::new("T", "C"))
            .with_edge(Edge::branch("C", "Yes", true));

        assert_eq!(
            violations(&wf),
            vec![GraphViolation::MissingBranch {
                node_id: NodeId::new("C"),
                branch: false
            }]
        );
    }

    #[test]
    fn condition_edges_must_be_labeled() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::condition("C", "input.ok"))
            .with_node(Node::output("A", OutputFormat::Json))
            .with_node(Node::output("B", OutputFormat::Json))
            .with_edge(Edge::new("T", "C"))
            .with_edge(Edge::branch("C", "A", true))
            .with_edge(Edge::new("C", "B").with_label("maybe"));

        let found = violations(&wf);
        assert!(found.contains(&GraphViolation::UnexpectedBranchLabel {
            node_id: NodeId::new("C"),
            target: NodeId::new("B"),
            label: Some("maybe".to_string()),
        }));
        assert!(found.contains(&GraphViolation::MissingBranch {
            node_id: NodeId::new("C"),
            branch: false
        }));
    }

    #[test]
    fn fan_out_outside_conditions_is_ambiguous() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::output("A", OutputFormat::Json))
            .with_node(Node::output("B", OutputFormat::Json))
            .with_edge(Edge::new("T", "A"))
            .with_edge(Edge::new("T", "B"));

        assert_eq!(
            violations(&wf),
            vec![GraphViolation::AmbiguousSuccessor {
                node_id: NodeId::new("T"),
                count: 2
            }]
        );
    }

    #[test]
    fn cycles_pass_validation() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_node(Node::transform("Y", "input"))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "Y"))
            .with_edge(Edge::new("Y", "X"));

        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn outgoing_edges_keep_definition_order() {
        let wf = workflow()
            .with_node(Node::trigger("T"))
            .with_node(Node::condition("C", "input.ok"))
            .with_node(Node::output("A", OutputFormat::Json))
            .with_node(Node::output("B", OutputFormat::Json))
            .with_edge(Edge::new("T", "C"))
            .with_edge(Edge::branch("C", "A", true))
            .with_edge(Edge::branch("C", "B", false));

        let graph = WorkflowGraph::build(&wf).expect("build");
        let targets: Vec<&str> = graph
            .outgoing_edges(&NodeId::new("C"))
            .iter()
            .map(|edge| edge.target.as_str())
            .collect();
        assert_eq!(targets, vec!["A", "B"]);
        assert!(graph.outgoing_edges(&NodeId::new("A")).is_empty());
        assert!(graph.outgoing_edges(&NodeId::new("missing")).is_empty());
    }

    #[test]
    fn build_rejects_invalid_workflow() {
        let wf = workflow().with_node(Node::transform("X", "input"));
        let err = WorkflowGraph::build(&wf).expect_err("invalid");
        assert!(err.contains(&GraphViolation::MissingTrigger));
    }
}
