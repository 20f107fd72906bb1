//! Relay endpoint and subscription settings.

use serde::{Deserialize, Serialize};
use sigrelay_core::constants::{
    DEFAULT_BROKER_URL, DEFAULT_CLOSE_TIMEOUT_MS, DEFAULT_IDLE_INTERVAL_MS,
    DEFAULT_PROGRESS_EVERY, DEFAULT_RELAY_URL, DEFAULT_RESPONSE_TIMEOUT_MS,
};
use sigrelay_core::retry::{DEFAULT_RETRY_DELAY_MS, RetryForever};

/// What to do when a drained batch spans more than one schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaPolicy {
    /// Fail the batch with a schema-mismatch error (fatal for the session).
    #[default]
    Reject,
    /// Keep entries matching the first entry's schema, drop the rest.
    FirstWins,
}

/// Outbound relay connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySection {
    /// WebSocket URL of the relay endpoint.
    pub url: String,
    /// Idle wait between drain attempts when nothing is pending.
    pub idle_interval_ms: u64,
    /// Bound on waiting for a single acknowledgement.
    pub response_timeout_ms: u64,
    /// Bound on the best-effort close handshake.
    pub close_timeout_ms: u64,
    /// Multi-schema batch policy.
    pub schema_policy: SchemaPolicy,
    /// Log a progress line every N acknowledged sends (0 disables).
    pub progress_every: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            schema_policy: SchemaPolicy::Reject,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Upstream subscription settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSection {
    /// Broker URL; `sim://` selects the built-in simulator.
    pub broker_url: String,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Delay before retrying a failed subscribe.
    pub retry_delay_ms: u64,
    /// Cap for exponential growth of the retry delay (equal to the base
    /// delay means a fixed delay).
    pub max_retry_delay_ms: u64,
}

impl SubscriptionSection {
    /// The retry-forever policy described by this section.
    pub fn retry_policy(&self) -> RetryForever {
        RetryForever {
            base_delay_ms: self.retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
        }
    }
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            client_id: "signal-relay".to_string(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}
