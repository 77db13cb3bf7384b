//! Postgres-backed stores for the agentflow server.
//!
//! - Workflow definitions ([`PgWorkflowStore`])
//! - Execution records ([`PgExecutionStore`])

pub mod execution;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use workflow::PgWorkflowStore;

use agentflow_workflow::error::StoreError;

/// Wraps a column that failed to decode into a `sqlx` decode error.
pub(crate) fn invalid_column(
    column: &str,
    value: &str,
    err: impl std::fmt::Display,
) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} '{value}': {err}"),
    )))
}

/// Maps a `sqlx` error onto the store error the engine understands.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable {
                message: err.to_string(),
            }
        }
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => StoreError::Serialization {
            message: err.to_string(),
        },
        other => StoreError::Operation {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable { .. }
        ));
    }

    #[test]
    fn decode_errors_are_serialization() {
        let err = invalid_column("status", "paused", "unknown status");
        let mapped = store_error(err);
        assert!(matches!(mapped, StoreError::Serialization { .. }));
        assert!(mapped.to_string().contains("invalid status 'paused'"));
    }

    #[test]
    fn other_errors_are_operation_failures() {
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            StoreError::Operation { .. }
        ));
    }
}
