//! Adapter from the push-callback source API onto the relay's sinks, plus
//! the retry-forever subscribe loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sigrelay_core::retry::RetryForever;
use sigrelay_core::{RelayError, ShutdownReason, SignalId, SourceError, SourceSignal, StartupError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::buffer::SignalBuffer;
use crate::lifecycle::LifecycleController;
use crate::source::{SignalHandler, SignalSource};
use crate::store::{SeriesStore, write_signal};

/// Where delivered signals go.
pub enum BridgeSink {
    /// Direct synchronous store writes under `device_id`.
    Store {
        /// Target store.
        store: Arc<dyn SeriesStore>,
        /// Device path for every record.
        device_id: String,
    },
    /// Latest-value-wins buffer drained by the relay session.
    Buffer(Arc<SignalBuffer>),
}

/// The [`SignalHandler`] registered with the source.
pub struct SubscriptionBridge {
    sink: BridgeSink,
    lifecycle: Arc<LifecycleController>,
    received: AtomicU64,
}

impl SubscriptionBridge {
    /// Bridge forwarding into `sink` until `lifecycle` stops.
    pub fn new(sink: BridgeSink, lifecycle: Arc<LifecycleController>) -> Self {
        Self {
            sink,
            lifecycle,
            received: AtomicU64::new(0),
        }
    }

    /// Signals forwarded so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl SignalHandler for SubscriptionBridge {
    fn on_signals(&self, batch: &[SourceSignal]) {
        for source_signal in batch {
            if self.lifecycle.is_stopped() {
                return;
            }
            let signal = source_signal.clone().into_signal();
            debug!(name = %signal.name, value = %signal.value, timestamp_ms = signal.timestamp_ms, "signal received");

            match &self.sink {
                BridgeSink::Buffer(buffer) => buffer.upsert_signal(signal),
                BridgeSink::Store { store, device_id } => {
                    if let Err(e) = write_signal(store.as_ref(), device_id, &signal) {
                        if self.lifecycle.is_stopped() {
                            debug!(error = %e, "store write after shutdown ignored");
                        } else {
                            error!(name = %signal.name, error = %e, "store write failed");
                            let _ = self
                                .lifecycle
                                .shutdown(ShutdownReason::from(RelayError::from(e)));
                        }
                        return;
                    }
                }
            }
            let _ = self.received.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Subscribe, retrying every failure per `policy` until success or shutdown.
///
/// Each blocking `subscribe` call runs on its own OS thread and hands the
/// subscription straight to `lifecycle`. Cancellation returns at once even
/// while an attempt is stuck; if that attempt succeeds later,
/// [`LifecycleController::register_subscription`] cancels it on arrival.
pub async fn subscribe_with_retry(
    source: Arc<dyn SignalSource>,
    ids: Vec<SignalId>,
    handler: Arc<dyn SignalHandler>,
    policy: RetryForever,
    lifecycle: Arc<LifecycleController>,
) -> Result<(), StartupError> {
    let ids: Arc<[SignalId]> = ids.into();
    let cancel = lifecycle.token();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StartupError::Cancelled);
        }

        let pending = spawn_attempt(
            Arc::clone(&source),
            Arc::clone(&ids),
            Arc::clone(&handler),
            Arc::clone(&lifecycle),
        );
        let result = match pending {
            Ok(rx) => tokio::select! {
                () = cancel.cancelled() => {
                    debug!(attempt = attempt + 1, "subscribe attempt abandoned on shutdown");
                    return Err(StartupError::Cancelled);
                }
                res = rx => res.unwrap_or_else(|_| {
                    Err(SourceError::Unavailable("subscribe thread exited".into()))
                }),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(signals = ids.len(), attempts = attempt + 1, "subscribed");
                return Ok(());
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "subscribe failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(StartupError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Run one `subscribe` call on a detached thread.
///
/// Detached, so a stalled source cannot hold up runtime shutdown.
fn spawn_attempt(
    source: Arc<dyn SignalSource>,
    ids: Arc<[SignalId]>,
    handler: Arc<dyn SignalHandler>,
    lifecycle: Arc<LifecycleController>,
) -> Result<oneshot::Receiver<Result<(), SourceError>>, SourceError> {
    let (tx, rx) = oneshot::channel();
    let _ = std::thread::Builder::new()
        .name("sigrelay-subscribe".into())
        .spawn(move || {
            let result = source
                .subscribe(&ids, handler)
                .map(|subscription| {
                    let _ = lifecycle.register_subscription(subscription);
                });
            let _ = tx.send(result);
        })
        .map_err(|e| SourceError::Unavailable(format!("spawn subscribe thread: {e}")))?;
    Ok(rx)
}
