//! NATS-backed ephemeral execution state.
//!
//! State snapshots live in a JetStream key-value bucket. Expiry is a bucket
//! property (`max_age`), so the bucket is created with the configured state
//! TTL and every key inherits it. An existing bucket keeps its own expiry;
//! a mismatch with the configured TTL is logged. Keys may not contain `:`,
//! so the logical key `execution:{id}:state` is stored as
//! `execution.{id}.state`.

use crate::error::StoreError;
use crate::store::StateCache;
use agentflow_core::Result;
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Key-value bucket for execution state snapshots.
const STATE_BUCKET_NAME: &str = "agentflow-execution-state";

/// Configuration for the NATS state cache.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Key-value bucket name (defaults to agentflow-execution-state).
    pub state_bucket: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state_bucket: None,
        }
    }

    fn bucket(&self) -> &str {
        self.state_bucket.as_deref().unwrap_or(STATE_BUCKET_NAME)
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NATS_URL)
    }
}

/// JetStream key-value implementation of [`StateCache`].
pub struct NatsStateCache {
    store: kv::Store,
    ttl: Duration,
}

impl NatsStateCache {
    /// Connects to NATS and opens (or creates) the state bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or bucket setup fails.
    pub async fn connect(config: &NatsConfig, ttl: Duration) -> Result<Self, StoreError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("failed to connect to {}: {e}", config.url),
            })?;
        let jetstream = jetstream::new(client);
        Self::open(&jetstream, config.bucket(), ttl).await
    }

    /// Opens the bucket on an existing JetStream context, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be opened or created.
    pub async fn open(
        jetstream: &jetstream::Context,
        bucket: &str,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        let (store, ttl) = match jetstream.get_key_value(bucket).await {
            Ok(store) => {
                debug!(bucket, "opened existing state bucket");
                let effective = match store.status().await {
                    Ok(status) => bucket_ttl(bucket, status.max_age(), ttl),
                    Err(e) => {
                        warn!(bucket, error = %e, "failed to read state bucket expiry");
                        ttl
                    }
                };
                (store, effective)
            }
            Err(_) => {
                let store = jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        description: "agentflow execution state snapshots".to_string(),
                        history: 1,
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| StoreError::Unavailable {
                        message: format!("failed to create state bucket {bucket}: {e}"),
                    })?;
                info!(bucket, ttl_secs = ttl.as_secs(), "created state bucket");
                (store, ttl)
            }
        };
        Ok(Self { store, ttl })
    }

    /// Returns the bucket-wide expiry actually in effect.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn bucket_key(key: &str) -> String {
        key.replace(':', ".")
    }
}

/// Returns the expiry an existing bucket applies, warning when it differs
/// from the configured one. A zero `max_age` means entries never expire.
fn bucket_ttl(bucket: &str, actual: Duration, configured: Duration) -> Duration {
    if actual != configured {
        warn!(
            bucket,
            bucket_secs = actual.as_secs(),
            configured_secs = configured.as_secs(),
            "existing state bucket keeps its own expiry; recreate it to apply the configured ttl"
        );
    }
    actual
}

#[async_trait]
impl StateCache for NatsStateCache {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        if ttl != self.ttl {
            debug!(
                requested_secs = ttl.as_secs(),
                bucket_secs = self.ttl.as_secs(),
                "per-key ttl ignored, bucket expiry applies"
            );
        }
        self.store
            .put(Self::bucket_key(key), value.into())
            .await
            .map_err(|e| StoreError::Operation {
                message: format!("failed to write {key}: {e}"),
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .store
            .get(Self::bucket_key(key))
            .await
            .map_err(|e| StoreError::Operation {
                message: format!("failed to read {key}: {e}"),
            })?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store
            .delete(Self::bucket_key(key))
            .await
            .map_err(|e| StoreError::Operation {
                message: format!("failed to delete {key}: {e}"),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::state_key;
    use agentflow_core::ExecutionId;

    #[test]
    fn nats_config_defaults() {
        let config = NatsConfig::default();
        assert_eq!(config.url, DEFAULT_NATS_URL);
        assert_eq!(config.bucket(), STATE_BUCKET_NAME);
    }

    #[test]
    fn nats_config_custom_bucket() {
        let config = NatsConfig {
            url: "nats://nats:4222".to_string(),
            state_bucket: Some("custom-state".to_string()),
        };
        assert_eq!(config.bucket(), "custom-state");
    }

    #[test]
    fn existing_bucket_expiry_wins() {
        let hour = Duration::from_secs(3600);
        let day = Duration::from_secs(86_400);
        assert_eq!(bucket_ttl(STATE_BUCKET_NAME, day, hour), day);
        assert_eq!(bucket_ttl(STATE_BUCKET_NAME, hour, hour), hour);
        assert_eq!(bucket_ttl(STATE_BUCKET_NAME, Duration::ZERO, hour), Duration::ZERO);
    }

    #[test]
    fn state_keys_are_valid_bucket_keys() {
        let id = ExecutionId::new();
        let key = NatsStateCache::bucket_key(&state_key(id));
        assert_eq!(key, format!("execution.{id}.state"));
        assert!(
            key.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '='))
        );
    }
}
