//! Process wiring: builds the engine and its collaborators from configuration.

use crate::config::ServerConfig;
use crate::db::{PgExecutionStore, PgWorkflowStore};
use crate::error::ServerError;
use agentflow_ai::{HttpLlmBackend, LlmAgentExecutor, RetryingAgentExecutor};
use agentflow_core::{UserId, WorkflowId};
use agentflow_integration::HttpWebhookDelivery;
use agentflow_workflow::memory::{
    InMemoryExecutionStore, InMemoryStateCache, InMemoryWorkflowStore,
};
use agentflow_workflow::nats::{NatsConfig, NatsStateCache};
use agentflow_workflow::{
    AgentExecutor, Engine, ExecutionPersistence, ExecutionStore, NodeHandlers, StateCache,
    Workflow, WorkflowStore, WorkflowSummary, validate,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

/// Where workflow definitions are kept.
#[derive(Clone)]
pub enum WorkflowCatalog {
    Postgres(PgWorkflowStore),
    Memory(Arc<InMemoryWorkflowStore>),
}

impl WorkflowCatalog {
    fn store(&self) -> Arc<dyn WorkflowStore> {
        match self {
            Self::Postgres(store) => Arc::new(store.clone()),
            Self::Memory(store) => store.clone(),
        }
    }

    /// Stores a workflow, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the write fails.
    pub async fn save(&self, workflow: &Workflow) -> Result<(), ServerError> {
        match self {
            Self::Postgres(store) => {
                store
                    .upsert(workflow)
                    .await
                    .map_err(|e| ServerError::Database {
                        details: e.to_string(),
                    })
            }
            Self::Memory(store) => {
                store.insert(workflow.clone()).await;
                Ok(())
            }
        }
    }

    /// Lists the workflows a user owns.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the read fails.
    pub async fn list(&self, owner: UserId) -> Result<Vec<WorkflowSummary>, ServerError> {
        match self {
            Self::Postgres(store) => {
                store
                    .list_by_owner(owner)
                    .await
                    .map_err(|e| ServerError::Database {
                        details: e.to_string(),
                    })
            }
            Self::Memory(store) => Ok(store.list_by_owner(owner).await),
        }
    }
}

/// The running application: an engine plus the workflow catalog it reads.
pub struct App {
    engine: Engine,
    catalog: WorkflowCatalog,
}

impl App {
    /// Connects to Postgres and NATS, runs migrations and wires the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a service cannot be
    /// reached.
    pub async fn connect(config: &ServerConfig) -> Result<Self, ServerError> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| ServerError::Config {
                reason: "DATABASE_URL is required unless running in memory".to_string(),
            })?;
        let pool = connect_database(database_url).await?;

        let states = NatsStateCache::connect(
            &NatsConfig::new(config.nats_url.clone()),
            config.engine.state_ttl(),
        )
        .await
        .map_err(|e| ServerError::StateCache {
            details: e.to_string(),
        })?;
        info!(nats_url = %config.nats_url, "state cache ready");

        let catalog = WorkflowCatalog::Postgres(PgWorkflowStore::new(pool.clone()));
        let executions = Arc::new(PgExecutionStore::new(pool));
        Self::assemble(config, catalog, executions, Arc::new(states))
    }

    /// Wires the engine over in-memory stores. Nothing outlives the process.
    ///
    /// # Errors
    ///
    /// Returns `Client` if the agent or webhook client cannot be built.
    pub fn in_memory(config: &ServerConfig) -> Result<Self, ServerError> {
        let catalog = WorkflowCatalog::Memory(Arc::new(InMemoryWorkflowStore::new()));
        Self::assemble(
            config,
            catalog,
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(InMemoryStateCache::new()),
        )
    }

    fn assemble(
        config: &ServerConfig,
        catalog: WorkflowCatalog,
        executions: Arc<dyn ExecutionStore>,
        states: Arc<dyn StateCache>,
    ) -> Result<Self, ServerError> {
        let backend =
            HttpLlmBackend::with_timeout(config.agent.backend_config(), config.agent.request_timeout())
                .map_err(|e| ServerError::Client {
                    details: e.to_string(),
                })?;
        let agents: Arc<dyn AgentExecutor> = Arc::new(RetryingAgentExecutor::new(
            Arc::new(LlmAgentExecutor::new(Arc::new(backend))),
            config.agent.retry_policy(),
        ));
        let webhooks =
            HttpWebhookDelivery::new(config.webhook).map_err(|e| ServerError::Client {
                details: e.to_string(),
            })?;

        let persistence = Arc::new(
            ExecutionPersistence::new(executions, states, config.engine.state_ttl())
                .with_max_snapshot_bytes(config.engine.max_snapshot_bytes),
        );
        let nodes =
            Arc::new(NodeHandlers::new(agents).with_agent_timeout(config.engine.agent_timeout()));
        let engine = Engine::new(catalog.store(), persistence, nodes, config.engine.clone())
            .with_webhooks(Arc::new(webhooks));

        Ok(Self { engine, catalog })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Validates and stores a workflow definition.
    ///
    /// # Errors
    ///
    /// Returns `Engine(InvalidGraph)` if the graph is malformed, or
    /// `Database` if it cannot be stored.
    pub async fn import(&self, workflow: Workflow) -> Result<WorkflowId, ServerError> {
        validate(&workflow).map_err(|e| ServerError::Engine(e.into()))?;
        self.catalog.save(&workflow).await?;
        info!(
            workflow_id = %workflow.id,
            nodes = workflow.nodes.len(),
            edges = workflow.edges.len(),
            "workflow imported"
        );
        Ok(workflow.id)
    }
}

async fn connect_database(url: &str) -> Result<PgPool, ServerError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .map_err(|e| ServerError::Database {
            details: format!("failed to connect: {e}"),
        })?;

    info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| ServerError::Database {
            details: format!("failed to run migrations: {e}"),
        })?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_workflow::{Edge, EngineError, ExecutionStatus, Node, OutputFormat};
    use serde_json::json;
    use std::time::Duration;

    fn config() -> ServerConfig {
        serde_json::from_value(json!({})).expect("default config")
    }

    #[tokio::test]
    async fn imported_workflow_runs_in_memory() {
        let app = App::in_memory(&config()).expect("wire app");
        let owner = UserId::new();
        let workflow = Workflow::new(owner, "Count")
            .with_node(Node::trigger("T"))
            .with_node(Node::transform("X", "len(input.items)"))
            .with_node(Node::output("O", OutputFormat::Json))
            .with_edge(Edge::new("T", "X"))
            .with_edge(Edge::new("X", "O"));
        let workflow_id = app.import(workflow).await.expect("import");

        let execution_id = app
            .engine()
            .start_execution(workflow_id, owner, json!({"items": [1, 2, 3]}))
            .await
            .expect("start");
        let view = app
            .engine()
            .poll_until_terminal(execution_id, Duration::from_millis(10))
            .await
            .expect("poll");

        assert_eq!(view.status(), ExecutionStatus::Completed);
        assert_eq!(view.execution.result, Some(json!(3)));
        assert_eq!(view.visited(), vec!["T", "X", "O"]);

        let listed = app.catalog().list(owner).await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn malformed_workflow_is_rejected_on_import() {
        let app = App::in_memory(&config()).expect("wire app");
        let workflow = Workflow::new(UserId::new(), "No trigger")
            .with_node(Node::output("O", OutputFormat::Text));

        let err = app.import(workflow).await.expect_err("must reject");
        assert!(matches!(
            err,
            ServerError::Engine(EngineError::InvalidGraph { .. })
        ));
    }

    #[tokio::test]
    async fn connect_requires_database_url() {
        let err = App::connect(&config()).await.err().expect("must fail");
        assert!(matches!(err, ServerError::Config { .. }));
    }
}
