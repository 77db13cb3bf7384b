//! Command-line interface.

use crate::app::App;
use crate::error::ServerError;
use agentflow_core::{ExecutionId, UserId, WorkflowId};
use agentflow_workflow::{ExecutionView, Workflow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// agentflow: run agent workflows
#[derive(Debug, Parser)]
#[command(name = "agentflow-server", version, about = "Run and inspect agent workflows")]
pub struct Cli {
    /// Keep workflows and executions in memory instead of Postgres and NATS
    #[arg(long, global = true, env = "AGENTFLOW_IN_MEMORY")]
    pub in_memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a workflow definition file and store it
    Import {
        /// Path to the workflow JSON
        path: PathBuf,
    },

    /// List the workflows a user owns
    Workflows {
        /// Owner of the workflows
        #[arg(long)]
        owner: UserId,
    },

    /// Start an execution and wait for it to finish
    Run {
        /// Workflow to execute
        #[arg(required_unless_present = "file")]
        workflow_id: Option<WorkflowId>,

        /// Import this workflow file first and execute it
        #[arg(long, conflicts_with = "workflow_id")]
        file: Option<PathBuf>,

        /// User requesting the execution
        #[arg(long)]
        user: UserId,

        /// Input handed to the trigger node, as JSON
        #[arg(long, default_value = "{}")]
        input: JsonValue,

        /// Print the execution id and return without waiting
        #[arg(long)]
        detach: bool,

        /// Milliseconds between status polls while waiting
        #[arg(long, default_value_t = 250)]
        poll_interval_ms: u64,
    },

    /// Show an execution's status, result and progress
    Status {
        execution_id: ExecutionId,
    },

    /// List recent executions of a workflow
    History {
        workflow_id: WorkflowId,

        /// Maximum number of executions to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Runs one command against a wired application.
///
/// # Errors
///
/// Returns the first error the command hits.
pub async fn execute(app: &App, command: Command) -> Result<(), ServerError> {
    match command {
        Command::Import { path } => {
            let workflow = read_workflow(&path).await?;
            let workflow_id = app.import(workflow).await?;
            print_json(&serde_json::json!({ "workflow_id": workflow_id }))
        }
        Command::Workflows { owner } => {
            let workflows = app.catalog().list(owner).await?;
            print_json(&workflows)
        }
        Command::Run {
            workflow_id,
            file,
            user,
            input,
            detach,
            poll_interval_ms,
        } => {
            let workflow_id = match (workflow_id, file) {
                (_, Some(path)) => app.import(read_workflow(&path).await?).await?,
                (Some(id), None) => id,
                (None, None) => {
                    return Err(ServerError::InvalidInput {
                        reason: "a workflow id or --file is required".to_string(),
                    });
                }
            };
            let execution_id = app
                .engine()
                .start_execution(workflow_id, user, input)
                .await?;
            if detach {
                return print_json(&serde_json::json!({ "execution_id": execution_id }));
            }
            let view =
                wait_for(app, execution_id, Duration::from_millis(poll_interval_ms)).await?;
            app.engine().drain().await;
            print_json(&view)
        }
        Command::Status { execution_id } => {
            let view = app.engine().get_execution(execution_id).await?;
            print_json(&view)
        }
        Command::History { workflow_id, limit } => {
            let executions = app.engine().list_executions(workflow_id, limit).await?;
            print_json(&executions)
        }
    }
}

/// Waits for an execution to finish. Ctrl-C cancels it and keeps waiting for
/// the failed status to land.
async fn wait_for(
    app: &App,
    execution_id: ExecutionId,
    interval: Duration,
) -> Result<ExecutionView, ServerError> {
    let engine = app.engine();
    tokio::select! {
        view = engine.poll_until_terminal(execution_id, interval) => return Ok(view?),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!(%execution_id, "interrupted, cancelling execution");
            engine.cancel_execution(execution_id).await;
        }
    }
    Ok(engine.poll_until_terminal(execution_id, interval).await?)
}

async fn read_workflow(path: &Path) -> Result<Workflow, ServerError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ServerError::InvalidInput {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
    parse_workflow(&text).map_err(|reason| ServerError::InvalidInput {
        reason: format!("{}: {reason}", path.display()),
    })
}

fn parse_workflow(text: &str) -> Result<Workflow, String> {
    serde_json::from_str(text).map_err(|e| format!("not a workflow definition: {e}"))
}

fn print_json(value: &impl Serialize) -> Result<(), ServerError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ServerError::InvalidInput {
        reason: format!("cannot encode output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}
