//! Relay session: owns the outbound connection and runs the
//! drain → build → send → await-ack cycle.
//!
//! States move `Connecting → Active → Draining → Closed`. Any protocol or
//! payload error ends the cycle (fail-fast, no retry); so does cancellation.
//! At most one request is in flight at any time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sigrelay_core::{ProtocolError, RelayError, StartupError};
use sigrelay_settings::{RelaySection, SchemaPolicy};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{RelayBatch, SignalBuffer};
use crate::protocol::classify_response;
use crate::transport::{RelayConnector, RelayTransport};
use crate::tree::build_payload;

/// Lifecycle state of a [`RelaySession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Establishing the outbound connection.
    Connecting,
    /// Running the relay cycle.
    Active,
    /// Closing the outbound connection.
    Draining,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

/// Per-session tuning.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Element identifier put in every payload.
    pub instance: String,
    /// Wait between drain attempts when the buffer is empty.
    pub idle_interval: Duration,
    /// Bound on waiting for one acknowledgement.
    pub response_timeout: Duration,
    /// Multi-schema batch policy.
    pub schema_policy: SchemaPolicy,
    /// Progress line every N acknowledgements; 0 disables.
    pub progress_every: u64,
}

impl SessionConfig {
    /// Build from the `relay` settings section.
    pub fn from_settings(instance: impl Into<String>, relay: &RelaySection) -> Self {
        Self {
            instance: instance.into(),
            idle_interval: Duration::from_millis(relay.idle_interval_ms),
            response_timeout: Duration::from_millis(relay.response_timeout_ms),
            schema_policy: relay.schema_policy,
            progress_every: relay.progress_every,
        }
    }
}

/// Counters reported when the session ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Payloads sent.
    pub sent: u64,
    /// Payloads acknowledged with a success code.
    pub acknowledged: u64,
}

/// The relay consumer.
pub struct RelaySession {
    config: SessionConfig,
    buffer: Arc<SignalBuffer>,
    transport: Option<Box<dyn RelayTransport>>,
    state: watch::Sender<SessionState>,
    stats: SessionStats,
}

impl RelaySession {
    /// New session in `Connecting`.
    pub fn new(config: SessionConfig, buffer: Arc<SignalBuffer>) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            config,
            buffer,
            transport: None,
            state,
            stats: SessionStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "relay session state");
        }
    }

    /// Open the outbound connection. No retry: failure closes the session.
    pub async fn connect(&mut self, connector: &dyn RelayConnector) -> Result<(), StartupError> {
        debug!(endpoint = connector.endpoint(), "connecting to relay endpoint");
        match connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.transition(SessionState::Active);
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    /// Attach an already-open transport and move to `Active`.
    pub fn attach(&mut self, transport: Box<dyn RelayTransport>) {
        self.transport = Some(transport);
        self.transition(SessionState::Active);
    }

    /// Run the relay cycle until `cancel` fires or an error occurs.
    ///
    /// Returns in `Draining` with the connection still open; call
    /// [`close`](Self::close) afterwards. Cancellation is not an error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<SessionStats, RelayError> {
        let result = self.run_cycles(cancel).await;
        if self.state() == SessionState::Active {
            self.transition(SessionState::Draining);
        }
        if let Err(e) = &result {
            warn!(error = %e, category = e.category(), "relay session failed");
        }
        result.map(|()| self.stats)
    }

    async fn run_cycles(&mut self, cancel: &CancellationToken) -> Result<(), RelayError> {
        if self.state() != SessionState::Active {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let Some(batch) = self.buffer.drain() else {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(self.config.idle_interval) => {}
                }
                continue;
            };
            if !self.cycle(&batch, cancel).await? {
                return Ok(());
            }
        }
    }

    /// One request/response exchange. `Ok(false)` when cancelled mid-wait.
    async fn cycle(
        &mut self,
        batch: &RelayBatch,
        cancel: &CancellationToken,
    ) -> Result<bool, RelayError> {
        let payload = build_payload(batch, &self.config.instance, self.config.schema_policy)?;
        let wire = payload.to_wire()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;

        transport.send_text(wire).await?;
        self.stats.sent += 1;
        info!(
            schema = %payload.schema,
            entries = payload.leaf_count(),
            "relay send"
        );

        let timeout = self.config.response_timeout;
        let raw = tokio::select! {
            () = cancel.cancelled() => {
                debug!("cancelled while awaiting acknowledgement");
                return Ok(false);
            }
            res = tokio::time::timeout(timeout, transport.recv_text()) => match res {
                Ok(raw) => raw?,
                Err(_) => {
                    return Err(ProtocolError::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                    .into());
                }
            },
        };

        let ack = classify_response(&raw)?;
        self.stats.acknowledged += 1;
        info!(code = ack.code, "relay ack");

        let every = self.config.progress_every;
        if every > 0 && self.stats.acknowledged % every == 0 {
            info!(
                sent = self.stats.sent,
                acknowledged = self.stats.acknowledged,
                pending = self.buffer.pending(),
                "relay progress"
            );
        }
        Ok(true)
    }

    /// Close the connection if open and move to `Closed`. Idempotent.
    pub async fn close(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        if self.state() != SessionState::Draining {
            self.transition(SessionState::Draining);
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.transition(SessionState::Closed);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
