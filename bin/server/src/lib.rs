//! agentflow server.
//!
//! Wires the workflow engine to Postgres, NATS, the agent gateway and
//! outgoing webhooks, and exposes it through a command-line interface.

pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
