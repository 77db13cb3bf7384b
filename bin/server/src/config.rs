//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables; nested keys use
//! a double underscore (`ENGINE__MAX_STEPS`, `AGENT__ENDPOINT`).

use agentflow_ai::{LlmBackendConfig, LlmProvider, RetryPolicy};
use agentflow_integration::WebhookSettings;
use agentflow_workflow::EngineConfig;
use agentflow_workflow::nats::DEFAULT_NATS_URL;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL. Required unless running in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// NATS server URL for the execution state mirror.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Engine limits and timeouts.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Agent gateway settings.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Outgoing webhook settings.
    #[serde(default)]
    pub webhook: WebhookSettings,
}

fn default_nats_url() -> String {
    DEFAULT_NATS_URL.to_string()
}

/// How agents are reached.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Base URL of the inference gateway.
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,

    /// Bearer token for the gateway.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used when an agent does not pin one.
    #[serde(default = "default_agent_model")]
    pub model: String,

    /// Retries after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_agent_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_agent_model() -> String {
    "default".to_string()
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_request_timeout_secs() -> u64 {
    90
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            api_key: None,
            model: default_agent_model(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AgentSettings {
    /// Backend configuration for the gateway.
    #[must_use]
    pub fn backend_config(&self) -> LlmBackendConfig {
        LlmBackendConfig {
            provider: LlmProvider::Gateway,
            base_url: self.endpoint.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            options: HashMap::new(),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default()
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = ServerConfig::from_source(environment(&[])).expect("load");
        assert!(config.database_url.is_none());
        assert_eq!(config.nats_url, DEFAULT_NATS_URL);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.agent.endpoint, "http://localhost:8080");
        assert_eq!(config.webhook, WebhookSettings::default());
    }

    #[test]
    fn nested_keys_use_double_underscore() {
        let config = ServerConfig::from_source(environment(&[
            ("DATABASE_URL", "postgres://localhost/agentflow"),
            ("ENGINE__MAX_STEPS", "50"),
            ("ENGINE__RUN_TIMEOUT_SECS", "30"),
            ("ENGINE__MAX_SNAPSHOT_BYTES", "262144"),
            ("AGENT__ENDPOINT", "http://gateway:9000"),
            ("AGENT__MAX_RETRIES", "4"),
            ("WEBHOOK__TIMEOUT_SECS", "3"),
        ]))
        .expect("load");

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/agentflow")
        );
        assert_eq!(config.engine.max_steps, 50);
        assert_eq!(config.engine.run_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.engine.max_snapshot_bytes, 262_144);
        assert_eq!(config.agent.endpoint, "http://gateway:9000");
        assert_eq!(config.agent.retry_policy().max_retries, 4);
        assert_eq!(config.webhook.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn agent_settings_build_gateway_config() {
        let settings = AgentSettings {
            api_key: Some("secret".to_string()),
            ..AgentSettings::default()
        };
        let backend = settings.backend_config();
        assert_eq!(backend.provider, LlmProvider::Gateway);
        assert_eq!(backend.api_key.as_deref(), Some("secret"));
        assert_eq!(backend.model, "default");
    }
}
