//! Timestamp conversion between source microseconds, relay milliseconds,
//! and the `{seconds, nanos}` wire record.

use serde::{Deserialize, Serialize};

/// Convert a source timestamp in microseconds to milliseconds.
///
/// Truncating division, applied exactly once at ingestion.
pub const fn micros_to_millis(timestamp_us: i64) -> i64 {
    timestamp_us / 1000
}

/// A `{seconds, nanos}` timestamp as carried in relay metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second remainder in nanoseconds.
    pub nanos: i64,
}

impl WireTimestamp {
    /// Split a millisecond timestamp into seconds and nanoseconds.
    ///
    /// Uses floor division so the remainder is never negative.
    pub const fn from_millis(timestamp_ms: i64) -> Self {
        Self {
            seconds: timestamp_ms.div_euclid(1000),
            nanos: timestamp_ms.rem_euclid(1000) * 1_000_000,
        }
    }

    /// The metadata record for one leaf: `{"timestamps": {"generated": {...}}}`.
    pub fn to_metadata(self) -> serde_json::Value {
        serde_json::json!({
            "timestamps": {
                "generated": {
                    "seconds": self.seconds,
                    "nanos": self.nanos,
                }
            }
        })
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
