//! Workflow definitions in Postgres.

use super::{invalid_column, store_error};
use agentflow_core::{Result, UserId, WorkflowId};
use agentflow_workflow::error::StoreError;
use agentflow_workflow::{Edge, Node, Workflow, WorkflowMetadata, WorkflowStore, WorkflowSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// The graph portion of a workflow, stored as JSONB.
#[derive(Debug, Serialize, Deserialize)]
struct GraphData {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    owner_id: String,
    name: String,
    description: Option<String>,
    is_active: bool,
    graph_data: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_record(self) -> std::result::Result<Workflow, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| invalid_column("workflow id", &self.id, e))?;
        let owner = UserId::from_str(&self.owner_id)
            .map_err(|e| invalid_column("owner id", &self.owner_id, e))?;
        let graph: GraphData = serde_json::from_value(self.graph_data)
            .map_err(|e| invalid_column("graph of workflow", &self.id, e))?;

        Ok(Workflow {
            id,
            owner,
            metadata: WorkflowMetadata {
                name: self.name,
                description: self.description,
                is_active: self.is_active,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            nodes: graph.nodes,
            edges: graph.edges,
        })
    }
}

/// Workflow storage over the `workflows` table.
///
/// Implements [`WorkflowStore`] for the engine and adds the writes and
/// listings the CLI needs.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a workflow or replaces the stored one with the same id.
    pub async fn upsert(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let graph = serde_json::to_value(GraphData {
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
        })
        .map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, owner_id, name, description, is_active, graph_data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                is_active = EXCLUDED.is_active,
                graph_data = EXCLUDED.graph_data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.owner.to_string())
        .bind(&workflow.metadata.name)
        .bind(&workflow.metadata.description)
        .bind(workflow.metadata.is_active)
        .bind(graph)
        .bind(workflow.metadata.created_at)
        .bind(workflow.metadata.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    /// Lists the workflows a user owns, most recently updated first.
    pub async fn list_by_owner(&self, owner: UserId) -> Result<Vec<WorkflowSummary>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, description, is_active, graph_data,
                   created_at, updated_at
            FROM workflows
            WHERE owner_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let workflow = row.try_into_record().map_err(store_error)?;
            summaries.push(WorkflowSummary::from(&workflow));
        }
        Ok(summaries)
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, description, is_active, graph_data,
                   created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => Ok(Some(row.try_into_record().map_err(store_error)?)),
            None => Ok(None),
        }
    }
}
