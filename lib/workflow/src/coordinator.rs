//! Execution coordinator.
//!
//! The [`Engine`] validates a workflow, creates its execution record and then
//! walks the graph in a spawned task, one node at a time:
//!
//! 1. Mark the execution `running` and write the first state snapshot
//! 2. Run the current node's handler
//! 3. Append the node result, write the snapshot and the durable record
//! 4. Pick the successor: none or an output node completes the run, a
//!    condition follows the edge labeled with its boolean, anything else
//!    follows its single edge
//!
//! Every run is wrapped by a supervisor task. If the run returns an error or
//! panics, the supervisor forces the execution to `failed`, so pollers always
//! observe a terminal status.

use crate::error::{EngineError, GraphViolation, PersistenceError};
use crate::execution::{
    Execution, ExecutionState, ExecutionStatus, ExecutionWarning, NodeResult,
};
use crate::graph::WorkflowGraph;
use crate::handler::{NodeContext, NodeExecutor};
use crate::node::{Node, NodeConfig};
use crate::persistence::{DEFAULT_MAX_SNAPSHOT_BYTES, ExecutionPersistence, StatusUpdate};
use crate::store::WorkflowStore;
use crate::webhook::{WebhookDelivery, WebhookPayload, WebhookTarget};
use agentflow_core::{ExecutionId, UserId, WorkflowId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Default ceiling on node visits per run.
pub const DEFAULT_MAX_STEPS: u32 = 1000;

/// Default retention of state snapshots, in seconds.
pub const DEFAULT_STATE_TTL_SECS: u64 = 3600;

/// Default agent call timeout, in seconds.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 120;

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_state_ttl_secs() -> u64 {
    DEFAULT_STATE_TTL_SECS
}

fn default_agent_timeout_secs() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}

fn default_max_snapshot_bytes() -> usize {
    DEFAULT_MAX_SNAPSHOT_BYTES
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum node visits before a run fails as a cycle.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Hard wall-clock budget per run; unlimited when unset.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// How long state snapshots are retained.
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
    /// How long a single agent call may take.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Ceiling on an encoded state snapshot, in bytes.
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            run_timeout_secs: None,
            state_ttl_secs: DEFAULT_STATE_TTL_SECS,
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

impl EngineConfig {
    /// Sets the step ceiling.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the per-run timeout.
    #[must_use]
    pub fn with_run_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout_secs = Some(secs);
        self
    }

    /// Returns the per-run timeout.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the state snapshot TTL.
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    /// Returns the agent call timeout.
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

/// An execution together with its latest progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionView {
    /// The durable record: status, result, error.
    pub execution: Execution,
    /// The ephemeral progress mirror, absent once expired.
    pub state: Option<ExecutionState>,
}

impl ExecutionView {
    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    /// Returns the ids of visited nodes, in order.
    #[must_use]
    pub fn visited(&self) -> Vec<&str> {
        self.state
            .as_ref()
            .map(|state| state.node_results.iter().map(|r| r.node_id.as_str()).collect())
            .unwrap_or_default()
    }
}

/// How a traversal ended successfully.
struct Completion {
    result: JsonValue,
    webhook: Option<WebhookTarget>,
}

/// The workflow execution engine.
///
/// Cheap to clone; clones share collaborators and the registry of live runs.
#[derive(Clone)]
pub struct Engine {
    workflows: Arc<dyn WorkflowStore>,
    persistence: Arc<ExecutionPersistence>,
    nodes: Arc<dyn NodeExecutor>,
    webhooks: Option<Arc<dyn WebhookDelivery>>,
    config: EngineConfig,
    runs: Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>,
    tasks: TaskTracker,
}

impl Engine {
    /// Creates an engine over its collaborators.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        persistence: Arc<ExecutionPersistence>,
        nodes: Arc<dyn NodeExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            persistence,
            nodes,
            webhooks: None,
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
        }
    }

    /// Enables webhook delivery for output nodes.
    #[must_use]
    pub fn with_webhooks(mut self, webhooks: Arc<dyn WebhookDelivery>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates the workflow, creates a pending execution and starts it.
    ///
    /// Returns as soon as the execution is persisted; the run continues in
    /// the background.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown workflow, `WorkflowInactive`, `InvalidGraph`
    /// (nothing is persisted in these cases) or `Persistence`.
    #[instrument(skip_all, fields(workflow_id = %workflow_id, user_id = %user_id))]
    pub async fn start_execution(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        input: JsonValue,
    ) -> Result<ExecutionId, EngineError> {
        let workflow = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                what: format!("workflow {workflow_id}"),
            })?;
        if !workflow.is_active() {
            return Err(EngineError::WorkflowInactive);
        }
        let graph = WorkflowGraph::build(&workflow)?;

        let execution = self
            .persistence
            .create_execution(workflow_id, user_id, input)
            .await?;
        let execution_id = execution.id;

        let token = CancellationToken::new();
        self.runs.lock().await.insert(execution_id, token.clone());

        let span = info_span!(
            "execution",
            execution_id = %execution_id,
            workflow_id = %workflow_id
        );
        let engine = self.clone();
        self.tasks.spawn(
            async move { engine.supervise(execution, graph, token).await }.instrument(span),
        );

        info!(execution_id = %execution_id, nodes = workflow.nodes.len(), "execution started");
        Ok(execution_id)
    }

    /// Returns an execution and its latest progress snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown execution, or `Persistence`.
    pub async fn get_execution(&self, id: ExecutionId) -> Result<ExecutionView, EngineError> {
        let execution = self.persistence.get_execution(id).await?;
        let state = self.persistence.get_execution_state(id).await?;
        Ok(ExecutionView { execution, state })
    }

    /// Lists executions of a workflow, most recently started first.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the store fails.
    pub async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(self.persistence.list_executions(workflow_id, limit).await?)
    }

    /// Requests cancellation of a live run.
    ///
    /// Traversal stops before the next node; a node already running is
    /// awaited and its result discarded. Returns false if no live run exists.
    #[instrument(skip(self), fields(execution_id = %id))]
    pub async fn cancel_execution(&self, id: ExecutionId) -> bool {
        match self.runs.lock().await.get(&id) {
            Some(token) => {
                token.cancel();
                info!("cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Waits for every spawned run and webhook delivery to finish.
    ///
    /// Short-lived processes call this after an execution turns terminal so
    /// its webhook is not lost on exit.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Number of runs still in progress.
    pub async fn active_runs(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Polls an execution until it reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Engine::get_execution`].
    pub async fn poll_until_terminal(
        &self,
        id: ExecutionId,
        interval: Duration,
    ) -> Result<ExecutionView, EngineError> {
        loop {
            let view = self.get_execution(id).await?;
            if view.execution.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn supervise(self, execution: Execution, graph: WorkflowGraph, token: CancellationToken) {
        let execution_id = execution.id;
        let run = {
            let engine = self.clone();
            tokio::spawn(
                async move { engine.run(execution, graph, token).await }.in_current_span(),
            )
        };

        let failure = match run.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join_error) if join_error.is_panic() => {
                Some("execution task panicked".to_string())
            }
            Err(_) => Some("execution task was aborted".to_string()),
        };
        if let Some(reason) = failure {
            error!(error = %reason, "execution run crashed, forcing failed status");
            self.force_failed(execution_id, &reason).await;
        }

        self.runs.lock().await.remove(&execution_id);
    }

    async fn force_failed(&self, id: ExecutionId, reason: &str) {
        match self
            .persistence
            .update_execution_status(id, ExecutionStatus::Failed, StatusUpdate::error(reason))
            .await
        {
            Ok(_) => {}
            Err(PersistenceError::InvalidTransition { from, .. }) => {
                debug!(status = %from, "execution already terminal");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to record failed status");
                return;
            }
        }

        let state = match self.persistence.get_execution_state(id).await {
            Ok(Some(state)) => Some(state),
            Ok(None) => self
                .persistence
                .get_execution(id)
                .await
                .ok()
                .map(|execution| ExecutionState::new(&execution)),
            Err(e) => {
                error!(error = %e, "failed to load state snapshot");
                None
            }
        };
        if let Some(mut state) = state {
            state.status = ExecutionStatus::Failed;
            state.error = Some(reason.to_string());
            state.updated_at = Utc::now();
            if let Err(e) = self.persistence.save_state(&state).await {
                error!(error = %e, "failed to record failed state snapshot");
            }
        }
    }

    async fn run(
        &self,
        execution: Execution,
        graph: WorkflowGraph,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let execution = self
            .persistence
            .update_execution_status(
                execution.id,
                ExecutionStatus::Running,
                StatusUpdate::default(),
            )
            .await?;
        let mut state = ExecutionState::new(&execution);
        self.persistence.save_state(&state).await?;
        debug!("execution running");

        let deadline = self.config.run_timeout().map(|timeout| Instant::now() + timeout);
        match self
            .traverse(&execution, &graph, &mut state, &token, deadline)
            .await
        {
            Ok(completion) => {
                state.status = ExecutionStatus::Completed;
                state.updated_at = Utc::now();
                self.persistence.save_state(&state).await?;
                self.persistence
                    .update_execution_status(
                        execution.id,
                        ExecutionStatus::Completed,
                        StatusUpdate::result(completion.result.clone())
                            .with_warnings(state.warnings.clone()),
                    )
                    .await?;
                if let Some(target) = completion.webhook {
                    self.notify(execution.id, target, completion.result);
                }
                info!(
                    steps = state.node_results.len(),
                    warnings = state.warnings.len(),
                    "execution completed"
                );
            }
            Err(e) => {
                let reason = e.to_string();
                state.status = ExecutionStatus::Failed;
                state.error = Some(reason.clone());
                state.updated_at = Utc::now();
                self.persistence.save_state(&state).await?;
                self.persistence
                    .update_execution_status(
                        execution.id,
                        ExecutionStatus::Failed,
                        StatusUpdate::error(reason.clone()).with_warnings(state.warnings.clone()),
                    )
                    .await?;
                info!(error = %reason, steps = state.node_results.len(), "execution failed");
            }
        }
        Ok(())
    }

    async fn traverse(
        &self,
        execution: &Execution,
        graph: &WorkflowGraph,
        state: &mut ExecutionState,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Completion, EngineError> {
        let ctx = NodeContext {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            initial_input: &execution.input,
        };
        let mut node: &Node = graph.trigger();
        let mut input = execution.input.clone();
        let mut steps: u32 = 0;

        loop {
            self.check_interrupted(token, deadline)?;
            if steps >= self.config.max_steps {
                return Err(EngineError::GraphCycle {
                    max_steps: self.config.max_steps,
                });
            }
            steps += 1;

            state.current_node_id = Some(node.id.clone());
            state.updated_at = Utc::now();
            self.persistence.save_state(state).await?;

            let started = Instant::now();
            let result = self.nodes.execute(node, input, ctx).await;
            if let Err(e) = self.check_interrupted(token, deadline) {
                debug!(node_id = %node.id, "discarding result of interrupted node");
                return Err(e);
            }
            let outcome = result.map_err(|e| EngineError::from_node(node.id.clone(), e))?;

            state.node_results.push(NodeResult {
                node_id: node.id.clone(),
                kind: node.kind(),
                output: outcome.output.clone(),
                finished_at: Utc::now(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
            if let Some(message) = outcome.warning {
                state
                    .warnings
                    .push(ExecutionWarning::new(node.id.clone(), message));
            }
            state.updated_at = Utc::now();
            self.persistence.save_state(state).await?;
            self.persistence
                .update_execution_status(
                    execution.id,
                    ExecutionStatus::Running,
                    StatusUpdate::default().with_warnings(state.warnings.clone()),
                )
                .await?;
            debug!(node_id = %node.id, step = steps, "node recorded");

            if let NodeConfig::Output(config) = &node.config {
                return Ok(Completion {
                    result: outcome.output,
                    webhook: config.webhook.clone(),
                });
            }

            let edges = graph.outgoing_edges(&node.id);
            let next = match (outcome.branch, edges.as_slice()) {
                (_, []) => {
                    return Ok(Completion {
                        result: outcome.output,
                        webhook: None,
                    });
                }
                (Some(branch), edges) => edges
                    .iter()
                    .copied()
                    .find(|edge| edge.branch_value() == Some(branch))
                    .ok_or_else(|| EngineError::InvalidGraph {
                        violations: vec![GraphViolation::MissingBranch {
                            node_id: node.id.clone(),
                            branch,
                        }],
                    })?,
                (None, [edge]) => *edge,
                (None, edges) => {
                    return Err(EngineError::InvalidGraph {
                        violations: vec![GraphViolation::AmbiguousSuccessor {
                            node_id: node.id.clone(),
                            count: edges.len(),
                        }],
                    });
                }
            };

            node = graph.node(&next.target).ok_or_else(|| EngineError::NotFound {
                what: format!("node {}", next.target),
            })?;
            input = outcome.forward;
        }
    }

    fn check_interrupted(
        &self,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled {
                reason: "cancelled by request".to_string(),
            });
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::Cancelled {
                    reason: format!(
                        "run timed out after {}s",
                        self.config.run_timeout_secs.unwrap_or_default()
                    ),
                });
            }
        }
        Ok(())
    }

    fn notify(&self, execution_id: ExecutionId, target: WebhookTarget, data: JsonValue) {
        let Some(webhooks) = self.webhooks.clone() else {
            debug!(url = %target.url, "no webhook delivery configured, skipping");
            return;
        };
        self.tasks.spawn(
            async move {
                let payload = WebhookPayload::new(&target, data);
                match webhooks.deliver(&target, payload).await {
                    Ok(()) => debug!(url = %target.url, "webhook delivered"),
                    Err(e) => warn!(
                        execution_id = %execution_id,
                        url = %target.url,
                        error = %e,
                        "webhook delivery failed"
                    ),
                }
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::edge::Edge;
    use crate::error::{AgentError, NodeError, StoreError, WebhookError};
    use crate::handler::{NodeHandlers, NodeOutcome};
    use crate::memory::{
        InMemoryExecutionStore, InMemoryStateCache, InMemoryWorkflowStore,
        RecordingWebhookDelivery, ScriptedAgentExecutor,
    };
    use crate::node::{AgentConfig, OutputFormat, OutputNodeConfig};
    use crate::persistence::DEFAULT_STATE_TTL;
    use crate::store::ExecutionStore;
    use agentflow_core::TriggerId;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        engine: Engine,
        workflows: Arc<InMemoryWorkflowStore>,
        executions: Arc<InMemoryExecutionStore>,
    }

    impl Harness {
        fn new(agents: ScriptedAgentExecutor, config: EngineConfig) -> Self {
            let handlers = NodeHandlers::new(Arc::new(agents)).with_agent_timeout(config.agent_timeout());
            Self::with_nodes(Arc::new(handlers), config)
        }

        fn with_nodes(nodes: Arc<dyn NodeExecutor>, config: EngineConfig) -> Self {
            let workflows = Arc::new(InMemoryWorkflowStore::new());
            let executions = Arc::new(InMemoryExecutionStore::new());
            let persistence = Arc::new(
                ExecutionPersistence::new(
                    executions.clone(),
                    Arc::new(InMemoryStateCache::new().with_max_value_bytes(config.max_snapshot_bytes)),
                    config.state_ttl(),
                )
                .with_max_snapshot_bytes(config.max_snapshot_bytes),
            );
            let engine = Engine::new(workflows.clone(), persistence, nodes, config);
            Self {
                engine,
                workflows,
                executions,
            }
        }

        async fn start(&self, workflow: Workflow, input: JsonValue) -> ExecutionId {
            let workflow_id = workflow.id;
            self.workflows.insert(workflow).await;
            self.engine
                .start_execution(workflow_id, UserId::new(), input)
                .await
                .expect("start")
        }

        async fn finish(&self, id: ExecutionId) -> ExecutionView {
            tokio::time::timeout(
                Duration::from_secs(10),
                self.engine.poll_until_terminal(id, Duration::from_millis(5)),
            )
            .await
            .expect("execution should finish")
            .expect("poll")
        }
    }

    fn default_harness() -> Harness {
        Harness::new(
            ScriptedAgentExecutor::replying(json!("unused")),
            EngineConfig::default(),
        )
    }

    fn workflow(name: &str) -> Workflow {
        Workflow::new(UserId::new(), name)
    }

    #[tokio::test]
    async fn linear_chain_threads_data() {
        let harness = default_harness();
        let wf = workflow("increment")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X1", "input + 1"))
            .with_node(Node::transform("X2", "input + 1"))
            .with_node(Node::transform("X3", "input + 1"))
            .with_edge(Edge::new("T", "X1"))
            .with_edge(Edge::new("X1", "X2"))
            .with_edge(Edge::new("X2", "X3"));

        let id = harness.start(wf, json!(1)).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(view.execution.result, Some(json!(4)));
        assert_eq!(view.visited(), vec!["T", "X1", "X2", "X3"]);
        let state = view.state.expect("state");
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.result_for(&"X2".into()), Some(&json!(3)));
        assert!(view.execution.started_at.is_some());
        assert!(view.execution.completed_at.is_some());
    }

    fn branching_workflow() -> Workflow {
        let high = OutputNodeConfig {
            format: OutputFormat::Text,
            template: Some("high {{score}}".to_string()),
            webhook: None,
        };
        let low = OutputNodeConfig {
            template: Some("low {{score}}".to_string()),
            ..high.clone()
        };

        workflow("branch")
            .with_node(Node::trigger("T"))
            .with_node(Node::condition("C", "input.score > 50"))
            .with_node(Node::new("HI", NodeConfig::Output(high)))
            .with_node(Node::new("LO", NodeConfig::Output(low)))
            .with_edge(Edge::new("T", "C"))
            .with_edge(Edge::branch("C", "LO", false))
            .with_edge(Edge::branch("C", "HI", true))
    }

    #[tokio::test]
    async fn condition_selects_labeled_branch() {
        let harness = default_harness();

        let id = harness.start(branching_workflow(), json!({"score": 80})).await;
        let view = harness.finish(id).await;
        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(view.execution.result, Some(json!("high 80")));
        assert_eq!(view.visited(), vec!["T", "C", "HI"]);
        assert_eq!(
            view.state.as_ref().and_then(|s| s.result_for(&"C".into())),
            Some(&json!(true))
        );

        let id = harness.start(branching_workflow(), json!({"score": 20})).await;
        let view = harness.finish(id).await;
        assert_eq!(view.execution.result, Some(json!("low 20")));
        assert_eq!(view.visited(), vec!["T", "C", "LO"]);
    }

    #[tokio::test]
    async fn invalid_graph_is_rejected_before_anything_is_persisted() {
        let harness = default_harness();
        let wf = workflow("two triggers")
            .with_node(Node::trigger("T1"))
            .with_node(Node::trigger("T2"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T1", "O"));
        let workflow_id = wf.id;
        harness.workflows.insert(wf).await;

        let err = harness
            .engine
            .start_execution(workflow_id, UserId::new(), json!({}))
            .await
            .expect_err("must reject");

        let EngineError::InvalidGraph { violations } = err else {
            panic!("expected InvalidGraph, got {err:?}");
        };
        assert!(violations.contains(&GraphViolation::MultipleTriggers {
            node_ids: vec!["T1".into(), "T2".into()],
        }));
        assert!(harness.executions.is_empty().await);
        assert_eq!(harness.executions.write_count(), 0);
    }

    #[tokio::test]
    async fn cycles_stop_at_the_step_ceiling() {
        let harness = Harness::new(
            ScriptedAgentExecutor::replying(json!("unused")),
            EngineConfig::default().with_max_steps(10),
        );
        let wf = workflow("loop")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input + 1"))
            .with_node(Node::transform("Y", "input + 1"))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "Y"))
            .with_edge(Edge::new("Y", "X"));

        let id = harness.start(wf, json!(0)).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Failed);
        assert_eq!(
            view.execution.error,
            Some(EngineError::GraphCycle { max_steps: 10 }.to_string())
        );
        assert_eq!(view.visited().len(), 10);
    }

    #[tokio::test]
    async fn summarize_scenario_returns_agent_output() {
        let harness = Harness::new(
            ScriptedAgentExecutor::replying(json!("Quantum computers use qubits.")),
            EngineConfig::default(),
        );
        let wf = workflow("summarize")
            .with_node(Node::trigger("T"))
            .with_node(Node::agent(
                "A",
                AgentConfig::new("summarizer", "You summarize topics."),
                "summarize {{input.topic}}",
            ))
            .with_node(Node::output("O", OutputFormat::Text))
            .with_edge(Edge::new("T", "A"))
            .with_edge(Edge::new("A", "O"));

        let id = harness.start(wf, json!({"topic": "quantum computing"})).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(
            view.execution.result,
            Some(json!("Quantum computers use qubits."))
        );
        assert_eq!(view.visited(), vec!["T", "A", "O"]);
        assert!(view.execution.error.is_none());
    }

    #[tokio::test]
    async fn failing_transform_completes_with_warning() {
        let harness = default_harness();
        let wf = workflow("fallback")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input.n / 0"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "O"));

        let id = harness.start(wf, json!({"n": 7})).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(view.execution.result, Some(json!({"n": 7})));
        assert_eq!(view.execution.warnings.len(), 1);
        assert_eq!(view.execution.warnings[0].node_id.as_str(), "X");
        let state = view.state.expect("state");
        assert_eq!(state.warnings, view.execution.warnings);
    }

    #[tokio::test]
    async fn agent_failure_fails_the_execution() {
        let harness = Harness::new(
            ScriptedAgentExecutor::failing(AgentError::Failed {
                reason: "model overloaded".to_string(),
            }),
            EngineConfig::default(),
        );
        let wf = workflow("agent failure")
            .with_node(Node::trigger("T"))
            .with_node(Node::agent("A", AgentConfig::new("a", "role"), "task"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "A"))
            .with_edge(Edge::new("A", "O"));

        let id = harness.start(wf, json!({})).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Failed);
        assert_eq!(
            view.execution.error.as_deref(),
            Some("agent node A failed: model overloaded")
        );
        assert!(view.execution.result.is_none());
        assert_eq!(view.visited(), vec!["T"]);
        assert_eq!(
            view.state.and_then(|s| s.error).as_deref(),
            Some("agent node A failed: model overloaded")
        );
    }

    #[tokio::test]
    async fn cancellation_stops_after_in_flight_node() {
        let harness = Harness::new(
            ScriptedAgentExecutor::replying(json!("late")).with_delay(Duration::from_millis(300)),
            EngineConfig::default(),
        );
        let wf = workflow("five nodes")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_node(Node::agent("A", AgentConfig::new("slow", "role"), "task"))
            .with_node(Node::transform("Y", "input"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "A"))
            .with_edge(Edge::new("A", "Y"))
            .with_edge(Edge::new("Y", "O"));

        let id = harness.start(wf, json!({"n": 1})).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = harness.engine.get_execution(id).await.expect("get");
                let current = view.state.and_then(|s| s.current_node_id);
                if current.as_ref().map(|n| n.as_str()) == Some("A") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("agent node should start");

        assert!(harness.engine.cancel_execution(id).await);
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Failed);
        assert!(
            view.execution
                .error
                .as_deref()
                .is_some_and(|e| e.contains("cancelled"))
        );
        assert_eq!(view.visited(), vec!["T", "X"]);
    }

    #[tokio::test]
    async fn cancelling_unknown_execution_returns_false() {
        let harness = default_harness();
        assert!(!harness.engine.cancel_execution(ExecutionId::new()).await);
    }

    #[tokio::test]
    async fn run_timeout_behaves_like_cancellation() {
        let harness = Harness::new(
            ScriptedAgentExecutor::replying(json!("late")).with_delay(Duration::from_millis(1500)),
            EngineConfig::default().with_run_timeout_secs(1),
        );
        let wf = workflow("slow")
            .with_node(Node::trigger("T"))
            .with_node(Node::agent("A", AgentConfig::new("slow", "role"), "task"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "A"))
            .with_edge(Edge::new("A", "O"));

        let id = harness.start(wf, json!({})).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Failed);
        assert_eq!(
            view.execution.error,
            Some(
                EngineError::Cancelled {
                    reason: "run timed out after 1s".to_string()
                }
                .to_string()
            )
        );
        assert_eq!(view.visited(), vec!["T"]);
    }

    struct PanickingExecutor;

    #[async_trait]
    impl NodeExecutor for PanickingExecutor {
        async fn execute(
            &self,
            node: &Node,
            input: JsonValue,
            _ctx: NodeContext<'_>,
        ) -> Result<NodeOutcome, NodeError> {
            if node.kind() == crate::node::NodeKind::Trigger {
                return Ok(NodeOutcome::value(input));
            }
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn panicking_run_is_forced_to_failed() {
        let harness = Harness::with_nodes(Arc::new(PanickingExecutor), EngineConfig::default());
        let wf = workflow("panics")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "input"))
            .with_edge(Edge::new("T", "X"));

        let id = harness.start(wf, json!(1)).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Failed);
        assert_eq!(view.execution.error.as_deref(), Some("execution task panicked"));
        let state = view.state.expect("state");
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.visited().len(), 1);
    }

    #[tokio::test]
    async fn inactive_workflow_cannot_start() {
        let harness = default_harness();
        let mut wf = workflow("inactive")
            .with_node(Node::trigger("T"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "O"));
        wf.deactivate();
        let workflow_id = wf.id;
        harness.workflows.insert(wf).await;

        let err = harness
            .engine
            .start_execution(workflow_id, UserId::new(), json!({}))
            .await
            .expect_err("inactive");
        assert_eq!(err, EngineError::WorkflowInactive);
        assert!(harness.executions.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let harness = default_harness();
        let err = harness
            .engine
            .start_execution(WorkflowId::new(), UserId::new(), json!({}))
            .await
            .expect_err("unknown workflow");
        assert!(matches!(err, EngineError::NotFound { .. }));

        let err = harness
            .engine
            .get_execution(ExecutionId::new())
            .await
            .expect_err("unknown execution");
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn output_webhook_is_delivered_and_failures_are_ignored() {
        let target = WebhookTarget {
            trigger_id: TriggerId::new(),
            url: "https://hooks.example.com/in".to_string(),
            event: crate::webhook::DEFAULT_EVENT.to_string(),
        };
        let wf = || {
            let config = OutputNodeConfig {
                webhook: Some(target.clone()),
                ..OutputNodeConfig::default()
            };
            workflow("notify")
                .with_node(Node::trigger("T"))
                .with_node(Node::new("O", NodeConfig::Output(config)))
                .with_edge(Edge::new("T", "O"))
        };

        for webhooks in [
            Arc::new(RecordingWebhookDelivery::new()),
            Arc::new(RecordingWebhookDelivery::failing(WebhookError::Status { status: 500 })),
        ] {
            let harness = default_harness();
            let engine = harness.engine.clone().with_webhooks(webhooks.clone());
            let workflow = wf();
            let workflow_id = workflow.id;
            harness.workflows.insert(workflow).await;

            let id = engine
                .start_execution(workflow_id, UserId::new(), json!({"done": true}))
                .await
                .expect("start");
            let view = harness.finish(id).await;
            assert_eq!(view.status(), ExecutionStatus::Completed);

            engine.drain().await;
            let deliveries = webhooks.deliveries().await;

            assert_eq!(deliveries.len(), 1);
            assert_eq!(deliveries[0].0, target);
            assert_eq!(deliveries[0].1.data, json!({"done": true}));
            assert_eq!(deliveries[0].1.trigger_id, target.trigger_id);
        }
    }

    /// Refuses to record a completed execution.
    struct RefusingCompletion(Arc<InMemoryExecutionStore>);

    #[async_trait]
    impl ExecutionStore for RefusingCompletion {
        async fn insert(&self, execution: &Execution) -> agentflow_core::Result<(), StoreError> {
            self.0.insert(execution).await
        }

        async fn update(&self, execution: &Execution) -> agentflow_core::Result<bool, StoreError> {
            if execution.status == ExecutionStatus::Completed {
                return Err(StoreError::Unavailable {
                    message: "database went away".to_string(),
                }
                .into());
            }
            self.0.update(execution).await
        }

        async fn find_by_id(
            &self,
            id: ExecutionId,
        ) -> agentflow_core::Result<Option<Execution>, StoreError> {
            self.0.find_by_id(id).await
        }

        async fn list_by_workflow(
            &self,
            workflow_id: WorkflowId,
            limit: usize,
        ) -> agentflow_core::Result<Vec<Execution>, StoreError> {
            self.0.list_by_workflow(workflow_id, limit).await
        }
    }

    #[tokio::test]
    async fn webhook_waits_for_completed_status() {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let persistence = Arc::new(ExecutionPersistence::new(
            Arc::new(RefusingCompletion(Arc::new(InMemoryExecutionStore::new()))),
            Arc::new(InMemoryStateCache::new()),
            DEFAULT_STATE_TTL,
        ));
        let nodes = NodeHandlers::new(Arc::new(ScriptedAgentExecutor::replying(json!("unused"))));
        let webhooks = Arc::new(RecordingWebhookDelivery::new());
        let engine = Engine::new(
            workflows.clone(),
            persistence,
            Arc::new(nodes),
            EngineConfig::default(),
        )
        .with_webhooks(webhooks.clone());

        let config = OutputNodeConfig {
            webhook: Some(WebhookTarget {
                trigger_id: TriggerId::new(),
                url: "https://hooks.example.com/in".to_string(),
                event: crate::webhook::DEFAULT_EVENT.to_string(),
            }),
            ..OutputNodeConfig::default()
        };
        let wf = workflow("unrecorded")
            .with_node(Node::trigger("T"))
            .with_node(Node::new("O", NodeConfig::Output(config)))
            .with_edge(Edge::new("T", "O"));
        let workflow_id = wf.id;
        workflows.insert(wf).await;

        let id = engine
            .start_execution(workflow_id, UserId::new(), json!({"done": true}))
            .await
            .expect("start");
        let view = tokio::time::timeout(
            Duration::from_secs(10),
            engine.poll_until_terminal(id, Duration::from_millis(5)),
        )
        .await
        .expect("execution should finish")
        .expect("poll");

        assert_eq!(view.status(), ExecutionStatus::Failed);
        engine.drain().await;
        assert!(webhooks.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn long_chains_fit_the_snapshot_cap() {
        let config = EngineConfig {
            max_snapshot_bytes: 64 * 1024,
            ..EngineConfig::default()
        };
        let harness = Harness::new(ScriptedAgentExecutor::replying(json!("unused")), config);
        let mut wf = workflow("long").with_node(Node::trigger("T"));
        let mut previous = "T".to_string();
        for i in 0..200 {
            let id = format!("X{i}");
            wf = wf
                .with_node(Node::transform(id.as_str(), "input"))
                .with_edge(Edge::new(previous.as_str(), id.as_str()));
            previous = id;
        }

        let id = harness.start(wf, json!("x".repeat(1000))).await;
        let view = harness.finish(id).await;

        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(view.execution.result, Some(json!("x".repeat(1000))));
        let state = view.state.expect("state");
        assert_eq!(state.node_results.len(), 201);
        assert_eq!(state.result_for(&"X199".into()), Some(&json!("x".repeat(1000))));
        assert_eq!(state.node_results[0].output["elided"], json!(true));
    }

    #[tokio::test]
    async fn executions_are_listed_per_workflow() {
        let harness = default_harness();
        let wf = workflow("listed")
            .with_node(Node::trigger("T"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "O"));
        let workflow_id = wf.id;
        harness.workflows.insert(wf).await;

        let mut ids = Vec::new();
        for n in 0..3 {
            let id = harness
                .engine
                .start_execution(workflow_id, UserId::new(), json!(n))
                .await
                .expect("start");
            harness.finish(id).await;
            ids.push(id);
        }

        let listed = harness
            .engine
            .list_executions(workflow_id, 10)
            .await
            .expect("list");
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|e| ids.contains(&e.id)));
        assert!(
            harness
                .engine
                .list_executions(WorkflowId::new(), 10)
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[test]
    fn config_defaults_apply_to_missing_fields() {
        let config: EngineConfig =
            serde_json::from_value(json!({"max_steps": 50})).expect("deserialize");
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.run_timeout(), None);
        assert_eq!(config.state_ttl(), Duration::from_secs(3600));
        assert_eq!(config.agent_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_snapshot_bytes, DEFAULT_MAX_SNAPSHOT_BYTES);
    }
}
