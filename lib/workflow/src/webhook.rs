//! Webhook notification for output nodes.

use crate::error::WebhookError;
use agentflow_core::TriggerId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Event name used when a webhook target does not set one.
pub const DEFAULT_EVENT: &str = "workflow.completed";

fn default_event() -> String {
    DEFAULT_EVENT.to_string()
}

/// Where an output node delivers its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    /// The trigger registration this delivery belongs to.
    pub trigger_id: TriggerId,
    /// Receiver URL.
    pub url: String,
    /// Event name sent in the payload.
    #[serde(default = "default_event")]
    pub event: String,
}

/// Body posted to a webhook receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// The trigger registration this delivery belongs to.
    pub trigger_id: TriggerId,
    /// Event name.
    pub event: String,
    /// The formatted output.
    pub data: JsonValue,
    /// When the output was produced.
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Builds the payload for a target, stamped now.
    #[must_use]
    pub fn new(target: &WebhookTarget, data: JsonValue) -> Self {
        Self {
            trigger_id: target.trigger_id,
            event: target.event.clone(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Sends webhook notifications.
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    /// Delivers `payload` to the target.
    async fn deliver(
        &self,
        target: &WebhookTarget,
        payload: WebhookPayload,
    ) -> Result<(), WebhookError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_camel_case() {
        let target = WebhookTarget {
            trigger_id: TriggerId::new(),
            url: "https://hooks.example.com/in".to_string(),
            event: DEFAULT_EVENT.to_string(),
        };
        let payload = WebhookPayload::new(&target, json!({"summary": "done"}));
        let json = serde_json::to_value(&payload).expect("serialize");

        assert_eq!(json["triggerId"], json!(target.trigger_id));
        assert_eq!(json["event"], json!("workflow.completed"));
        assert_eq!(json["data"], json!({"summary": "done"}));
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn event_defaults_when_missing() {
        let trigger_id = TriggerId::new();
        let target: WebhookTarget = serde_json::from_value(json!({
            "trigger_id": trigger_id,
            "url": "https://hooks.example.com/in"
        }))
        .expect("deserialize");
        assert_eq!(target.event, DEFAULT_EVENT);
        assert_eq!(target.trigger_id, trigger_id);
    }
}
