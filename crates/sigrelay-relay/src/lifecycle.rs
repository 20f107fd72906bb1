//! Single-entry, idempotent shutdown coordination via `CancellationToken`.
//!
//! `shutdown` may be called from any thread, concurrently and repeatedly.
//! Only the first call tears down: it sets the stopped flag, records the
//! reason, cancels the upstream subscription, then cancels the token that
//! the relay task watches to close its connection. The store is closed by
//! [`LifecycleController::finish`] once the relay task has ended.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sigrelay_core::ShutdownReason;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::Subscription;
use crate::store::SeriesStore;

/// Coordinates teardown across the producer thread, relay task, and main task.
pub struct LifecycleController {
    token: CancellationToken,
    stopped: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    store: Mutex<Option<Arc<dyn SeriesStore>>>,
}

impl LifecycleController {
    /// Create a controller with nothing registered.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            reason: Mutex::new(None),
            subscription: Mutex::new(None),
            store: Mutex::new(None),
        }
    }

    /// Clone of the token cancelled by the first shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has begun.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The reason recorded by the first shutdown.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().clone()
    }

    /// Hand over the live subscription. Cancelled at once if shutdown
    /// already began; returns whether it was kept.
    pub fn register_subscription(&self, subscription: Box<dyn Subscription>) -> bool {
        {
            let mut slot = self.subscription.lock();
            if !self.is_stopped() {
                *slot = Some(subscription);
                return true;
            }
        }
        debug!("subscription arrived after shutdown, cancelling");
        cancel_logged(subscription.as_ref());
        false
    }

    /// Register the store to close in [`finish`](Self::finish).
    pub fn register_store(&self, store: Arc<dyn SeriesStore>) {
        *self.store.lock() = Some(store);
    }

    /// Begin teardown. Returns `true` only for the call that performed it.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        // Taking the subscription lock orders this against register_subscription.
        let subscription = {
            let mut slot = self.subscription.lock();
            if self.stopped.swap(true, Ordering::SeqCst) {
                debug!(%reason, "shutdown already in progress");
                return false;
            }
            slot.take()
        };

        match &reason {
            ShutdownReason::Interrupt => info!("shutdown requested by interrupt"),
            ShutdownReason::Fatal { category, message } => {
                error!(category, reason = %message, "fatal error, shutting down");
            }
        }
        *self.reason.lock() = Some(reason);

        if let Some(subscription) = subscription {
            cancel_logged(subscription.as_ref());
        }
        self.token.cancel();
        true
    }

    /// Close the store (if any) and return the final reason.
    ///
    /// Call after the relay task has finished.
    pub fn finish(&self) -> ShutdownReason {
        let store = self.store.lock().take();
        if let Some(store) = store {
            if let Err(e) = store.close() {
                warn!(error = %e, "store close failed during teardown");
            }
        }
        self.reason().unwrap_or(ShutdownReason::Interrupt)
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_logged(subscription: &dyn Subscription) {
    match subscription.cancel() {
        Ok(()) => info!("subscription cancelled"),
        Err(e) => warn!(error = %e, "subscription cancel failed during teardown"),
    }
}
