//! Signal data model.
//!
//! - [`SignalValue`]: the scalar carried by a signal (integer, float, bool, text)
//! - [`SourceSignal`]: a record as delivered by the subscription source, timestamped in µs
//! - [`Signal`]: the relay's internal record, timestamped in ms
//! - [`SignalId`]: a `namespace:name` subscription target

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SignalIdError;
use crate::timestamp::micros_to_millis;

// ─────────────────────────────────────────────────────────────────────────────
// SignalValue
// ─────────────────────────────────────────────────────────────────────────────

/// A scalar signal value.
///
/// Serializes untagged, so a value appears on the wire as a bare JSON
/// number, boolean, or string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Boolean value.
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Free-form text.
    Text(String),
}

impl SignalValue {
    /// Convert to a JSON value for payload construction.
    ///
    /// Non-finite floats have no JSON representation and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Whether the value is numeric (integer or float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A signal as delivered by the upstream subscription source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSignal {
    /// Dotted-path signal name (e.g. `Vehicle.Speed`).
    pub name: String,
    /// Signal value.
    pub value: SignalValue,
    /// Source timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl SourceSignal {
    /// Create a source record.
    pub fn new(name: impl Into<String>, value: impl Into<SignalValue>, timestamp_us: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp_us,
        }
    }

    /// Convert into a relay [`Signal`], truncating the timestamp to milliseconds.
    pub fn into_signal(self) -> Signal {
        Signal {
            name: self.name,
            value: self.value,
            timestamp_ms: micros_to_millis(self.timestamp_us),
        }
    }
}

/// A signal inside the relay, timestamped in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Dotted-path signal name.
    pub name: String,
    /// Signal value.
    pub value: SignalValue,
    /// Timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// SignalId
// ─────────────────────────────────────────────────────────────────────────────

/// A subscription target in `namespace:name` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId {
    /// Broker namespace (e.g. `vss`).
    pub namespace: String,
    /// Signal name within the namespace.
    pub name: String,
}

impl FromStr for SignalId {
    type Err = SignalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(SignalIdError(s.to_string())),
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
