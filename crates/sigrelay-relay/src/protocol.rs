//! Relay wire messages.
//!
//! Request: a `set` payload built by [`crate::tree::build_payload`].
//! Response: `{"code": <int>, ...}`; `200` is the only success code, and
//! anything else, including a response that does not parse, is a
//! [`ProtocolError`].

use serde::{Deserialize, Serialize};
use sigrelay_core::ProtocolError;
use sigrelay_core::constants::ACK_SUCCESS_CODE;

/// Message type of every relay request.
pub const SET_MESSAGE_TYPE: &str = "set";

/// Outbound `set` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayPayload {
    /// Always [`SET_MESSAGE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Element identifier the data belongs to.
    pub instance: String,
    /// Leading path segment shared by every entry.
    pub schema: String,
    /// Remainder below the schema; only present for single-entry batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Scalar (single entry) or nested tree (several entries).
    pub data: serde_json::Value,
    /// Per-leaf timestamp records keyed by path relative to the schema.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RelayPayload {
    /// Serialize to the JSON text sent over the wire.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Number of leaves carried (one metadata record per leaf).
    pub fn leaf_count(&self) -> usize {
        self.metadata.len()
    }
}

/// A successfully classified acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Ack {
    /// Status code (always [`ACK_SUCCESS_CODE`] once classified).
    pub code: i64,
    /// Optional human-readable status text.
    #[serde(default)]
    pub message: Option<String>,
    /// Optional request correlation id echoed by the endpoint.
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
}

/// Parse and classify one response message.
pub fn classify_response(raw: &str) -> Result<Ack, ProtocolError> {
    let ack: Ack = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
        raw: truncate(raw, 256),
    })?;

    if ack.code == ACK_SUCCESS_CODE {
        Ok(ack)
    } else {
        Err(ProtocolError::Status { code: ack.code })
    }
}

fn truncate(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_string(),
    }
}
