//! Outbound integrations for agentflow.
//!
//! - **Webhooks**: [`HttpWebhookDelivery`] posts output-node results to
//!   receiver URLs as camelCase JSON

pub mod webhook;

pub use webhook::{HttpWebhookDelivery, WebhookSettings};
