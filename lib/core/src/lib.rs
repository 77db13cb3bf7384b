//! Core domain types shared across the agentflow crates.
//!
//! Provides strongly-typed identifiers and the rootcause-backed `Result`
//! alias used at collaborator boundaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, ParseIdError, TriggerId, UserId, WorkflowId};
