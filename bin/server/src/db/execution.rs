//! Execution records in Postgres.

use super::{invalid_column, store_error};
use agentflow_core::{ExecutionId, Result, UserId, WorkflowId};
use agentflow_workflow::error::StoreError;
use agentflow_workflow::{Execution, ExecutionStatus, ExecutionStore, ExecutionWarning};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    user_id: String,
    status: String,
    input: serde_json::Value,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    warnings: serde_json::Value,
}

impl ExecutionRow {
    fn try_into_record(self) -> std::result::Result<Execution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id)
            .map_err(|e| invalid_column("execution id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| invalid_column("workflow id", &self.workflow_id, e))?;
        let user_id = UserId::from_str(&self.user_id)
            .map_err(|e| invalid_column("user id", &self.user_id, e))?;
        let status = ExecutionStatus::from_str(&self.status)
            .map_err(|e| invalid_column("status", &self.status, e))?;
        let warnings: Vec<ExecutionWarning> = serde_json::from_value(self.warnings)
            .map_err(|e| invalid_column("warnings", &id.to_string(), e))?;

        Ok(Execution {
            id,
            workflow_id,
            user_id,
            status,
            input: self.input,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result,
            error: self.error,
            warnings,
        })
    }
}

fn warnings_json(execution: &Execution) -> std::result::Result<serde_json::Value, StoreError> {
    serde_json::to_value(&execution.warnings).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// [`ExecutionStore`] over the `executions` table.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        let warnings = warnings_json(execution)?;
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, user_id, status, input, created_at,
                 started_at, completed_at, result, error, warnings)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.user_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.input)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(warnings)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<bool, StoreError> {
        let warnings = warnings_json(execution)?;
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, started_at = $3, completed_at = $4,
                result = $5, error = $6, warnings = $7
            WHERE id = $1
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(warnings)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, user_id, status, input, created_at,
                   started_at, completed_at, result, error, warnings
            FROM executions
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

    async fn list_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, user_id, status, input, created_at,
                   started_at, completed_at, result, error, warnings
            FROM executions
            WHERE workflow_id = $1
            ORDER BY started_at DESC NULLS LAST, created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in rows {
            executions.push(row.try_into_record().map_err(store_error)?);
        }
        Ok(executions)
    }
}
