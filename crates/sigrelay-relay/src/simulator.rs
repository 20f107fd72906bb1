//! Built-in signal source for `sim://` broker URLs.
//!
//! Delivers generated values for the subscribed ids from a dedicated OS
//! thread, one batch per interval, until cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use rand::seq::IndexedRandom;
use sigrelay_core::coercion::is_integer_leaf;
use sigrelay_core::timestamp::now_micros;
use sigrelay_core::{SignalId, SignalValue, SourceError, SourceSignal};
use sigrelay_settings::SimulatorSection;
use tracing::{debug, info, warn};

use crate::source::{SignalHandler, SignalSource, SourceCredentials, Subscription};

/// Longest uninterrupted sleep; bounds how long `cancel` waits for the worker.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Random-walk signal generator.
pub struct SimulatedSource {
    interval: Duration,
    signals_per_tick: Option<usize>,
    client_id: String,
    credentials: SourceCredentials,
}

impl SimulatedSource {
    /// Create a simulator with the given delivery interval.
    pub fn new(interval: Duration, signals_per_tick: Option<usize>) -> Self {
        Self {
            interval,
            signals_per_tick,
            client_id: String::new(),
            credentials: SourceCredentials::None,
        }
    }

    /// Create a simulator from settings, identified to the broker as `client_id`.
    pub fn from_settings(
        settings: &SimulatorSection,
        client_id: &str,
        credentials: SourceCredentials,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            credentials,
            ..Self::new(
                Duration::from_millis(settings.interval_ms),
                settings.signals_per_tick,
            )
        }
    }

    /// Client identifier presented on subscribe.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl SignalSource for SimulatedSource {
    fn subscribe(
        &self,
        ids: &[SignalId],
        handler: Arc<dyn SignalHandler>,
    ) -> Result<Box<dyn Subscription>, SourceError> {
        if ids.is_empty() {
            return Err(SourceError::Rejected("no signals requested".into()));
        }

        let names: Vec<String> = ids.iter().map(|id| id.name.clone()).collect();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            names,
            interval: self.interval,
            per_tick: self.signals_per_tick,
            stop: Arc::clone(&stop),
            handler,
        };

        let handle = thread::Builder::new()
            .name("sigrelay-sim".into())
            .spawn(move || worker.run())
            .map_err(|e| SourceError::Unavailable(format!("spawn simulator thread: {e}")))?;

        info!(
            signals = ids.len(),
            client_id = %self.client_id,
            credentials = self.credentials.kind(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "simulated subscription started"
        );

        Ok(Box::new(SimulatedSubscription {
            stop,
            worker: Mutex::new(Some(handle)),
        }))
    }
}

/// Handle returned by [`SimulatedSource::subscribe`].
pub struct SimulatedSubscription {
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription for SimulatedSubscription {
    fn cancel(&self) -> Result<(), SourceError> {
        self.stop.store(true, Ordering::SeqCst);

        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        // Cancelled from inside a callback: the worker exits on its own.
        if handle.thread().id() == thread::current().id() {
            debug!("simulated subscription cancelled from its own thread");
            return Ok(());
        }
        // Waits at most one in-flight callback plus STOP_POLL, so callers on
        // an async worker block only briefly.
        handle
            .join()
            .map_err(|_| SourceError::Cancel("simulator thread panicked".into()))
    }
}

impl Drop for SimulatedSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct Worker {
    names: Vec<String>,
    interval: Duration,
    per_tick: Option<usize>,
    stop: Arc<AtomicBool>,
    handler: Arc<dyn SignalHandler>,
}

impl Worker {
    fn run(self) {
        let mut rng = rand::rng();
        let mut state: HashMap<String, SignalValue> = self
            .names
            .iter()
            .map(|name| (name.clone(), initial_value(name)))
            .collect();

        while !self.stop.load(Ordering::SeqCst) {
            let picked: Vec<&String> = match self.per_tick {
                Some(n) if n < self.names.len() => {
                    self.names.choose_multiple(&mut rng, n).collect()
                }
                _ => self.names.iter().collect(),
            };

            let timestamp_us = now_micros();
            let batch: Vec<SourceSignal> = picked
                .into_iter()
                .filter_map(|name| {
                    let value = state.get_mut(name)?;
                    *value = step(value, &mut rng);
                    Some(SourceSignal::new(name.clone(), value.clone(), timestamp_us))
                })
                .collect();

            if !batch.is_empty() {
                self.handler.on_signals(&batch);
            }
            self.sleep_interval();
        }
        debug!("simulator thread exiting");
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

fn initial_value(name: &str) -> SignalValue {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    if leaf.starts_with("Is") {
        SignalValue::Bool(false)
    } else if is_integer_leaf(name) {
        SignalValue::Int(0)
    } else {
        SignalValue::Float(0.0)
    }
}

fn step(value: &SignalValue, rng: &mut impl Rng) -> SignalValue {
    match value {
        SignalValue::Bool(b) => SignalValue::Bool(if rng.random_bool(0.1) { !b } else { *b }),
        SignalValue::Int(i) => SignalValue::Int(i.saturating_add(rng.random_range(-2..=2))),
        SignalValue::Float(f) => {
            let next = f + rng.random_range(-1.0..1.0);
            SignalValue::Float((next * 100.0).round() / 100.0)
        }
        SignalValue::Text(s) => {
            warn!(value = %s, "text values are not simulated");
            value.clone()
        }
    }
}
