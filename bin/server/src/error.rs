//! Error types for server operations.

use agentflow_workflow::EngineError;
use std::fmt;

/// Errors from bootstrapping the server or running a CLI command.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration is missing or invalid.
    Config { reason: String },
    /// The database could not be reached or migrated.
    Database { details: String },
    /// The state mirror could not be opened.
    StateCache { details: String },
    /// A collaborator client could not be built.
    Client { details: String },
    /// A command argument or input file was invalid.
    InvalidInput { reason: String },
    /// The engine rejected or failed an operation.
    Engine(EngineError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::StateCache { details } => write!(f, "state cache error: {details}"),
            Self::Client { details } => write!(f, "client setup failed: {details}"),
            Self::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            Self::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_display_unchanged() {
        let err = ServerError::from(EngineError::WorkflowInactive);
        assert_eq!(err.to_string(), EngineError::WorkflowInactive.to_string());
    }

    #[test]
    fn config_error_display() {
        let err = ServerError::Config {
            reason: "DATABASE_URL is required".to_string(),
        };
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
