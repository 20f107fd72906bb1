//! Retry policy for subscription establishment.
//!
//! Subscribing is idempotent and cheap, so it retries forever until it
//! succeeds or shutdown begins. Relay sends never use this policy: a failed
//! send or acknowledgement is fatal for the session.
//!
//! This module holds the sync-only math. The async loop that sleeps between
//! attempts lives in `sigrelay-relay`, next to the tokio runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay between subscribe attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Retry-forever policy for the initial subscribe call.
///
/// With `max_delay_ms == base_delay_ms` (the default) every attempt waits
/// the same fixed delay. A larger cap enables exponential growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryForever {
    /// Delay before the first retry in ms.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in ms.
    pub max_delay_ms: u64,
}

impl RetryForever {
    /// Fixed-delay policy.
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
        }
    }

    /// Delay to wait after the failed attempt with zero-based index `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms.max(self.base_delay_ms),
        ))
    }
}

impl Default for RetryForever {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY_MS)
    }
}

/// Exponential backoff: `min(max_delay, base_delay * 2^attempt)`.
///
/// Saturates instead of overflowing for large attempt numbers.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    exponential.min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
