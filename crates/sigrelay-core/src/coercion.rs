//! Value stringification for the time-series store.
//!
//! The store infers column types from its own schema, so every value is
//! written as a string. A fixed allow-list of VSS leaves is declared as
//! integer in that schema while the source delivers them with higher
//! precision; those are truncated to an integer string first.

use crate::errors::StoreWriteError;
use crate::signal::SignalValue;

/// VSS leaves that must be written as integer-valued strings.
pub const INTEGER_LEAVES: [&str; 4] = [
    "Vehicle.Chassis.Accelerator.PedalPosition",
    "Vehicle.Powertrain.Transmission.CurrentGear",
    "Vehicle.Powertrain.TractionBattery.NominalVoltage",
    "Vehicle.Chassis.SteeringWheel.Angle",
];

/// Whether `name` is on the integer allow-list.
pub fn is_integer_leaf(name: &str) -> bool {
    INTEGER_LEAVES.contains(&name)
}

/// Stringify a value for a store write, applying integer coercion to
/// allow-listed leaves.
pub fn store_value_string(name: &str, value: &SignalValue) -> Result<String, StoreWriteError> {
    if is_integer_leaf(name) {
        to_integer(value)
            .map(|i| i.to_string())
            .ok_or_else(|| StoreWriteError::Coercion {
                name: name.to_string(),
                value: value.to_string(),
            })
    } else {
        Ok(value.to_string())
    }
}

/// Quote a leaf name for use as a store measurement.
pub fn quote_measurement(name: &str) -> String {
    format!("`{name}`")
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: &SignalValue) -> Option<i64> {
    match value {
        SignalValue::Int(i) => Some(*i),
        SignalValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        SignalValue::Float(_) => None,
        SignalValue::Bool(b) => Some(i64::from(*b)),
        SignalValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
    }
}
