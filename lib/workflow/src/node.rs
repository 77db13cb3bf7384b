//! Workflow node types and configurations.
//!
//! A node is one unit of work in a workflow. Its id is chosen by the workflow
//! author and is unique within the workflow. The configuration decides the
//! node kind and carries the kind-specific settings.

use crate::webhook::WebhookTarget;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node, unique within its workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point; hands the execution input to the first step.
    Trigger,
    /// Delegates to an AI agent.
    Agent,
    /// Evaluates a boolean expression and selects a branch.
    Condition,
    /// Reshapes data with an expression.
    Transform,
    /// Formats the final result.
    Output,
}

impl NodeKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Transform => "transform",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The agent an `agent` node talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier of the agent as known to the agent executor.
    pub id: String,
    /// Display name of the agent.
    #[serde(default)]
    pub name: String,
    /// The agent's configured role, sent ahead of the task.
    pub role: String,
    /// Model override, if the agent pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl AgentConfig {
    /// Creates an agent configuration with the given id and role.
    #[must_use]
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role: role.into(),
            model: None,
            temperature: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Pins a model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Configuration for agent nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    /// The agent to invoke.
    pub agent: AgentConfig,
    /// Task description; a template with `{{path}}` placeholders.
    pub task: String,
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionNodeConfig {
    /// Boolean expression evaluated against the node input.
    pub expression: String,
}

/// Configuration for transform nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformNodeConfig {
    /// Expression whose value replaces the node input.
    pub expression: String,
}

/// Rendering format of an output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured JSON.
    #[default]
    Json,
    /// Plain text.
    Text,
    /// HTML with escaped substitutions.
    Html,
}

/// Configuration for output nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputNodeConfig {
    /// Output format.
    #[serde(default)]
    pub format: OutputFormat,
    /// Optional template with `{{path.to.field}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Webhook notified with the formatted output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookTarget>,
}

/// Configuration for a node, varying by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger node; has no settings.
    Trigger,
    /// Agent node configuration.
    Agent(AgentNodeConfig),
    /// Condition node configuration.
    Condition(ConditionNodeConfig),
    /// Transform node configuration.
    Transform(TransformNodeConfig),
    /// Output node configuration.
    Output(OutputNodeConfig),
}

impl NodeConfig {
    /// Returns the kind of this configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger => NodeKind::Trigger,
            Self::Agent(_) => NodeKind::Agent,
            Self::Condition(_) => NodeKind::Condition,
            Self::Transform(_) => NodeKind::Transform,
            Self::Output(_) => NodeKind::Output,
        }
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within the workflow.
    pub id: NodeId,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Node configuration (determines kind and behavior).
    pub config: NodeConfig,
}

impl Node {
    /// Creates a node with the given id and configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            config,
        }
    }

    /// Creates a trigger node.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeConfig::Trigger)
    }

    /// Creates an agent node.
    #[must_use]
    pub fn agent(id: impl Into<NodeId>, agent: AgentConfig, task: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Agent(AgentNodeConfig {
                agent,
                task: task.into(),
            }),
        )
    }

    /// Creates a condition node.
    #[must_use]
    pub fn condition(id: impl Into<NodeId>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Condition(ConditionNodeConfig {
                expression: expression.into(),
            }),
        )
    }

    /// Creates a transform node.
    #[must_use]
    pub fn transform(id: impl Into<NodeId>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Transform(TransformNodeConfig {
                expression: expression.into(),
            }),
        )
    }

    /// Creates an output node with the given format and no template.
    #[must_use]
    pub fn output(id: impl Into<NodeId>, format: OutputFormat) -> Self {
        Self::new(
            id,
            NodeConfig::Output(OutputNodeConfig {
                format,
                template: None,
                webhook: None,
            }),
        )
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the kind of this node.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_config() {
        assert_eq!(Node::trigger("T").kind(), NodeKind::Trigger);
        assert_eq!(Node::condition("C", "true").kind(), NodeKind::Condition);
        assert_eq!(Node::output("O", OutputFormat::Text).kind(), NodeKind::Output);
    }

    #[test]
    fn node_deserializes_from_tagged_json() {
        let node: Node = serde_json::from_value(serde_json::json!({
            "id": "A",
            "config": {
                "kind": "agent",
                "agent": { "id": "researcher", "role": "You research topics." },
                "task": "summarize {{input.topic}}"
            }
        }))
        .expect("deserialize");

        assert_eq!(node.id, NodeId::new("A"));
        match node.config {
            NodeConfig::Agent(config) => {
                assert_eq!(config.agent.id, "researcher");
                assert!(config.agent.name.is_empty());
                assert_eq!(config.task, "summarize {{input.topic}}");
            }
            other => panic!("expected agent config, got {other:?}"),
        }
    }

    #[test]
    fn trigger_serializes_with_kind_only() {
        let json = serde_json::to_value(Node::trigger("T")).expect("serialize");
        assert_eq!(json["config"], serde_json::json!({ "kind": "trigger" }));
    }

    #[test]
    fn output_format_defaults_to_json() {
        let config: OutputNodeConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.template.is_none());
    }
}
