//! Node handlers.
//!
//! Every node kind is handled through the same contract: the node's
//! configuration, the value produced by the previous node, and a small
//! context describing the execution. The coordinator only sees the
//! [`NodeExecutor`] trait; [`NodeHandlers`] is the production implementation.
//!
//! Error policy per kind:
//! - trigger: cannot fail
//! - agent: collaborator errors and timeouts fail the node
//! - condition: evaluation errors and non-boolean results fail the node
//! - transform: evaluation errors pass the input through with a warning
//! - output: cannot fail; JSON templates that do not parse fall back to text

use crate::agent::AgentExecutor;
use crate::error::{AgentError, NodeError};
use crate::expression::{Expression, stringify};
use crate::node::{
    AgentNodeConfig, ConditionNodeConfig, Node, NodeConfig, OutputFormat, OutputNodeConfig,
    TransformNodeConfig,
};
use crate::template::{escape_html, render, render_with};
use agentflow_core::{ExecutionId, WorkflowId};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default time an agent call may take before the node fails.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// What a handler knows about the execution it runs in.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    /// The execution being run.
    pub execution_id: ExecutionId,
    /// The workflow being run.
    pub workflow_id: WorkflowId,
    /// The input the execution was started with.
    pub initial_input: &'a JsonValue,
}

/// The result of running one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// Value recorded as the node's result.
    pub output: JsonValue,
    /// Value handed to the next node.
    pub forward: JsonValue,
    /// Branch selected by a condition node.
    pub branch: Option<bool>,
    /// Set when the node degraded instead of failing.
    pub warning: Option<String>,
}

impl NodeOutcome {
    /// An outcome whose output is also the next node's input.
    #[must_use]
    pub fn value(output: JsonValue) -> Self {
        Self {
            forward: output.clone(),
            output,
            branch: None,
            warning: None,
        }
    }

    /// A condition outcome: records the boolean and forwards the input.
    #[must_use]
    pub fn branch(taken: bool, input: JsonValue) -> Self {
        Self {
            output: JsonValue::Bool(taken),
            forward: input,
            branch: Some(taken),
            warning: None,
        }
    }

    /// An outcome that passes the input through and carries a warning.
    #[must_use]
    pub fn degraded(input: JsonValue, warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::value(input)
        }
    }
}

/// Executes single nodes.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs `node` against `input`.
    async fn execute(
        &self,
        node: &Node,
        input: JsonValue,
        ctx: NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError>;
}

/// The standard handlers for every node kind.
pub struct NodeHandlers {
    agents: Arc<dyn AgentExecutor>,
    agent_timeout: Duration,
}

impl NodeHandlers {
    /// Creates handlers that delegate agent nodes to `agents`.
    #[must_use]
    pub fn new(agents: Arc<dyn AgentExecutor>) -> Self {
        Self {
            agents,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// Sets how long an agent call may take.
    #[must_use]
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    async fn agent(
        &self,
        config: &AgentNodeConfig,
        input: &JsonValue,
    ) -> Result<NodeOutcome, NodeError> {
        let prompt = compose_prompt(config, input);
        let call = self.agents.execute(&config.agent, &prompt);
        let result = match tokio::time::timeout(self.agent_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout),
        };
        result
            .map(NodeOutcome::value)
            .map_err(|e| NodeError::AgentExecution {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl NodeExecutor for NodeHandlers {
    #[instrument(skip(self, node, input, ctx), fields(execution_id = %ctx.execution_id, node_id = %node.id, kind = %node.kind()))]
    async fn execute(
        &self,
        node: &Node,
        input: JsonValue,
        ctx: NodeContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        let outcome = match &node.config {
            NodeConfig::Trigger => Ok(NodeOutcome::value(ctx.initial_input.clone())),
            NodeConfig::Agent(config) => self.agent(config, &input).await,
            NodeConfig::Condition(config) => condition(config, input),
            NodeConfig::Transform(config) => {
                let outcome = transform(config, input);
                if let Some(warning) = &outcome.warning {
                    warn!(warning = %warning, "transform fell back to its input");
                }
                Ok(outcome)
            }
            NodeConfig::Output(config) => Ok(NodeOutcome::value(output(config, &input))),
        }?;
        debug!(branch = ?outcome.branch, "node finished");
        Ok(outcome)
    }
}

/// Builds the prompt sent to an agent: its role, the rendered task and the
/// node input as context.
#[must_use]
pub fn compose_prompt(config: &AgentNodeConfig, input: &JsonValue) -> String {
    let task = render(&config.task, input);
    let context = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    format!("{}\n\nTask: {task}\n\nContext:\n{context}", config.agent.role)
}

/// Evaluates a condition node.
///
/// # Errors
///
/// Fails if the expression does not parse, fails to evaluate, or does not
/// produce a boolean.
pub fn condition(config: &ConditionNodeConfig, input: JsonValue) -> Result<NodeOutcome, NodeError> {
    let taken = Expression::parse(&config.expression)
        .and_then(|expr| expr.evaluate_bool(&input))
        .map_err(|e| NodeError::ConditionEvaluation {
            reason: e.to_string(),
        })?;
    Ok(NodeOutcome::branch(taken, input))
}

/// Evaluates a transform node, falling back to the input on error.
#[must_use]
pub fn transform(config: &TransformNodeConfig, input: JsonValue) -> NodeOutcome {
    match Expression::parse(&config.expression).and_then(|expr| expr.evaluate(&input)) {
        Ok(value) => NodeOutcome::value(value),
        Err(e) => NodeOutcome::degraded(
            input,
            format!("transform expression failed, input passed through: {e}"),
        ),
    }
}

/// Formats the input of an output node.
#[must_use]
pub fn output(config: &OutputNodeConfig, input: &JsonValue) -> JsonValue {
    match (config.format, &config.template) {
        (OutputFormat::Json, None) => input.clone(),
        (OutputFormat::Json, Some(template)) => {
            let rendered = render(template, input);
            serde_json::from_str(&rendered).unwrap_or(JsonValue::String(rendered))
        }
        (OutputFormat::Text, Some(template)) => JsonValue::String(render(template, input)),
        (OutputFormat::Text, None) => JsonValue::String(stringify(input)),
        (OutputFormat::Html, Some(template)) => {
            JsonValue::String(render_with(template, input, escape_html))
        }
        (OutputFormat::Html, None) => {
            let pretty = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
            JsonValue::String(format!("<pre>{}</pre>", escape_html(&pretty)))
        }
    }
}
