//! Error taxonomy for the signal relay.
//!
//! - [`StartupError`]: subscribe/connect failures before any data flowed
//! - [`ProtocolError`]: malformed, non-success, or missing relay responses
//! - [`StoreWriteError`]: failed direct writes to the time-series store
//! - [`TreeError`]: a drained batch that cannot be folded into one payload
//! - [`SourceError`]: failures reported by the subscription source
//! - [`RelayError`]: umbrella enum, every fatal path funnels through it
//! - [`ShutdownReason`]: why teardown ran, and the resulting exit status
//!
//! None of these are retried except [`StartupError::Subscribe`], which the
//! subscribe loop retries until it succeeds or is cancelled.

use std::fmt;

use thiserror::Error;

/// A `--signals` argument not in `namespace:name` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signal must be in format namespace:signal_name, got {0:?}")]
pub struct SignalIdError(pub String);

/// Failures reported by the upstream subscription source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source is not reachable or not ready yet.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The source refused the subscription request.
    #[error("subscription rejected: {0}")]
    Rejected(String),
    /// Cancelling an active subscription failed.
    #[error("cancel failed: {0}")]
    Cancel(String),
}

/// Failures before the relay reached steady state.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The outbound relay connection could not be established.
    #[error("failed to connect to relay endpoint {url}: {reason}")]
    Connect {
        /// Endpoint URL.
        url: String,
        /// Underlying transport error.
        reason: String,
    },
    /// A subscribe attempt failed.
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] SourceError),
    /// No source implementation handles the broker URL.
    #[error("unsupported broker url: {0}")]
    UnsupportedSource(String),
    /// Startup was abandoned because shutdown began.
    #[error("startup cancelled")]
    Cancelled,
}

/// Relay request/response failures. Always fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The response was not a well-formed acknowledgement.
    #[error("malformed response ({reason}): {raw}")]
    Malformed {
        /// Parse failure description.
        reason: String,
        /// Raw response text.
        raw: String,
    },
    /// The acknowledgement carried a non-success status code.
    #[error("relay endpoint returned status {code}")]
    Status {
        /// Status code from the response.
        code: i64,
    },
    /// No response arrived within the configured bound.
    #[error("no response within {timeout_ms}ms")]
    Timeout {
        /// The bound that elapsed.
        timeout_ms: u64,
    },
    /// The connection was closed by the peer.
    #[error("connection closed by relay endpoint")]
    ConnectionClosed,
    /// Sending or receiving failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),
    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(String),
}

/// Direct store write failures. Fatal, never retried.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    /// Underlying I/O failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An allow-listed integer leaf carried a non-numeric value.
    #[error("cannot coerce {value:?} to integer for {name}")]
    Coercion {
        /// Signal name.
        name: String,
        /// Offending value, stringified.
        value: String,
    },
    /// The store rejected the record.
    #[error("store rejected record: {0}")]
    Rejected(String),
    /// The store was already closed.
    #[error("store is closed")]
    Closed,
}

/// A batch that cannot be folded into a single relay payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Entries of one batch disagree on their leading path segment.
    #[error("schema mismatch: expected {expected:?}, found {found:?} in {name}")]
    SchemaMismatch {
        /// Schema of the first entry.
        expected: String,
        /// Conflicting schema.
        found: String,
        /// Name of the conflicting entry.
        name: String,
    },
    /// A relative path is used both as a leaf and as a branch.
    #[error("path {path:?} is both a leaf and a branch")]
    PathConflict {
        /// Relative path of the collision.
        path: String,
    },
    /// The name has no segment after the schema.
    #[error("signal {name:?} has no path below its schema")]
    MissingLeaf {
        /// Offending signal name.
        name: String,
    },
}

/// Top-level error for every fatal relay condition.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Startup failure.
    #[error(transparent)]
    Startup(#[from] StartupError),
    /// Relay protocol failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Store write failure.
    #[error(transparent)]
    StoreWrite(#[from] StoreWriteError),
    /// Payload construction failure.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl RelayError {
    /// Short machine-readable category for logging and exit reporting.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Startup(_) => "startup",
            Self::Protocol(_) => "protocol",
            Self::StoreWrite(_) => "store_write",
            Self::Tree(_) => "schema",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ShutdownReason
// ─────────────────────────────────────────────────────────────────────────────

/// Why the relay is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// External interrupt (Ctrl-C / SIGTERM). Graceful.
    Interrupt,
    /// A fatal error. Exits non-zero.
    Fatal {
        /// Error category (see [`RelayError::category`]).
        category: &'static str,
        /// Rendered error message.
        message: String,
    },
}

impl ShutdownReason {
    /// Whether this reason represents a graceful shutdown.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Interrupt)
    }

    /// Process exit status for this reason.
    pub fn exit_code(&self) -> u8 {
        if self.is_graceful() { 0 } else { 1 }
    }
}

impl From<&RelayError> for ShutdownReason {
    fn from(err: &RelayError) -> Self {
        Self::Fatal {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<RelayError> for ShutdownReason {
    fn from(err: RelayError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Fatal { category, message } => write!(f, "{category}: {message}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
