//! Store, simulator, logging, and shutdown settings.
//!
//! Grouped here because they are all small.

use serde::{Deserialize, Serialize};
use sigrelay_core::constants::{DEFAULT_DEVICE_ID, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use sigrelay_core::logging::LogFormat;

/// Time-series store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSection {
    /// Device path every record is written under.
    pub device_id: String,
    /// Output file for records; stdout when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            path: None,
        }
    }
}

/// Built-in signal simulator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorSection {
    /// Delay between delivered batches.
    pub interval_ms: u64,
    /// Signals per batch; `None` delivers every subscribed signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals_per_tick: Option<usize>,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            signals_per_tick: None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSection {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Teardown settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSection {
    /// Bound on awaiting the relay task once shutdown has begun.
    pub timeout_ms: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}
