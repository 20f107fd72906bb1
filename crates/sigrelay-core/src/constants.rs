//! Shared defaults.

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8080";

/// Default subscription broker URL (built-in simulator).
pub const DEFAULT_BROKER_URL: &str = "sim://localhost";

/// Default store device path.
pub const DEFAULT_DEVICE_ID: &str = "root.test2.dev1";

/// Idle wait between drain attempts when the buffer is empty, in ms.
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 50;

/// Bound on waiting for one relay acknowledgement, in ms.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Bound on the best-effort close handshake, in ms.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;

/// Bound on awaiting the relay task during teardown, in ms.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// The only acknowledgement status code treated as success.
pub const ACK_SUCCESS_CODE: i64 = 200;

/// Report progress every this many acknowledged sends.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;
