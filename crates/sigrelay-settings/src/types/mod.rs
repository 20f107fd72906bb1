//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only overrides the fields it names.

mod relay;
mod runtime;

pub use relay::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the signal relay.
///
/// ```json
/// {
///   "relay": { "url": "ws://aggregator:8080", "responseTimeoutMs": 2000 },
///   "store": { "deviceId": "root.fleet.car7" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Outbound relay endpoint.
    pub relay: RelaySection,
    /// Upstream subscription.
    pub subscription: SubscriptionSection,
    /// Time-series store output.
    pub store: StoreSection,
    /// Built-in simulator source.
    pub simulator: SimulatorSection,
    /// Logging.
    pub logging: LoggingSection,
    /// Teardown.
    pub shutdown: ShutdownSection,
}

impl RelaySettings {
    /// Reject values that would stall or spin the relay loop.
    pub fn validate(&self) -> Result<()> {
        if self.relay.response_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.responseTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.relay.idle_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.idleIntervalMs must be greater than 0".into(),
            ));
        }
        if self.simulator.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "simulator.intervalMs must be greater than 0".into(),
            ));
        }
        if self.simulator.signals_per_tick == Some(0) {
            return Err(SettingsError::InvalidValue(
                "simulator.signalsPerTick must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
