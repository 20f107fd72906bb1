//! End-to-end wiring: source → bridge → (store | buffer → relay session).
//!
//! [`Pipeline::run`] returns once the lifecycle has shut down and every
//! resource is released. Interrupts are delivered by calling
//! [`LifecycleController::shutdown`] on the controller passed in.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sigrelay_core::{RelayError, ShutdownReason, SignalId, StartupError};
use sigrelay_settings::RelaySettings;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::{BridgeSink, SubscriptionBridge, subscribe_with_retry};
use crate::buffer::SignalBuffer;
use crate::lifecycle::LifecycleController;
use crate::session::{RelaySession, SessionConfig, SessionState, SessionStats};
use crate::source::{SignalSource, SourceCredentials, source_for_url};
use crate::store::{JsonlStore, SeriesStore};
use crate::transport::{RelayConnector, WsConnector};

/// Output selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Direct writes to the time-series store.
    Store,
    /// Relay to the remote endpoint as element `instance`.
    Relay {
        /// Element identifier.
        instance: String,
    },
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// First shutdown reason.
    pub reason: ShutdownReason,
    /// Relay counters; `None` in store mode or when never connected.
    pub stats: Option<SessionStats>,
    /// Last observed relay session state; `None` when no session ran.
    pub final_state: Option<SessionState>,
}

impl RunOutcome {
    /// Process exit status.
    pub fn exit_code(&self) -> u8 {
        self.reason.exit_code()
    }
}

/// A configured relay pipeline.
pub struct Pipeline {
    settings: RelaySettings,
    signals: Vec<SignalId>,
    mode: OutputMode,
    source: Option<Arc<dyn SignalSource>>,
    store: Option<Arc<dyn SeriesStore>>,
    connector: Option<Arc<dyn RelayConnector>>,
    credentials: SourceCredentials,
}

impl Pipeline {
    /// Pipeline with default collaborators resolved from `settings`.
    pub fn new(settings: RelaySettings, signals: Vec<SignalId>, mode: OutputMode) -> Self {
        Self {
            settings,
            signals,
            mode,
            source: None,
            store: None,
            connector: None,
            credentials: SourceCredentials::None,
        }
    }

    /// Broker credentials for the default source.
    #[must_use]
    pub fn with_credentials(mut self, credentials: SourceCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use `source` instead of resolving the broker URL.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use `store` instead of a [`JsonlStore`].
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `connector` instead of a [`WsConnector`].
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn RelayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Run until shutdown.
    pub async fn run(self, lifecycle: Arc<LifecycleController>) -> RunOutcome {
        let settings = self.settings.clone();
        let mut relay_task: Option<RelayTask> = None;

        match self.start(&lifecycle, &mut relay_task).await {
            Ok(()) | Err(RelayError::Startup(StartupError::Cancelled)) => {}
            Err(e) => {
                let _ = lifecycle.shutdown(ShutdownReason::from(&e));
            }
        }

        lifecycle.token().cancelled().await;

        let mut stats = None;
        let mut final_state = None;
        if let Some(relay) = relay_task {
            let timeout = Duration::from_millis(settings.shutdown.timeout_ms);
            let (state, joined) = relay.join(timeout).await;
            final_state = Some(state);
            stats = joined;
        }

        let reason = lifecycle.finish();
        if let Some(s) = &stats {
            info!(sent = s.sent, acknowledged = s.acknowledged, "relay session finished");
        }
        info!(%reason, exit_code = reason.exit_code(), "shutdown complete");
        RunOutcome {
            reason,
            stats,
            final_state,
        }
    }

    async fn start(
        self,
        lifecycle: &Arc<LifecycleController>,
        relay_task: &mut Option<RelayTask>,
    ) -> Result<(), RelayError> {
        let Self {
            settings,
            signals,
            mode,
            source,
            store,
            connector,
            credentials,
        } = self;

        let source = match source {
            Some(source) => source,
            None => source_for_url(&settings.subscription, credentials, &settings.simulator)?,
        };

        let sink = match mode {
            OutputMode::Store => {
                let store = match store {
                    Some(store) => store,
                    None => Arc::new(JsonlStore::open(
                        settings.store.path.as_deref().map(Path::new),
                    )?),
                };
                lifecycle.register_store(Arc::clone(&store));
                BridgeSink::Store {
                    store,
                    device_id: settings.store.device_id.clone(),
                }
            }
            OutputMode::Relay { instance } => {
                let connector = connector.unwrap_or_else(|| {
                    Arc::new(WsConnector::new(
                        settings.relay.url.clone(),
                        Duration::from_millis(settings.relay.close_timeout_ms),
                    ))
                });
                let buffer = Arc::new(SignalBuffer::new());
                let mut session = RelaySession::new(
                    SessionConfig::from_settings(instance, &settings.relay),
                    Arc::clone(&buffer),
                );
                session.connect(connector.as_ref()).await?;
                *relay_task = Some(spawn_relay(session, Arc::clone(lifecycle)));
                BridgeSink::Buffer(buffer)
            }
        };

        let bridge = Arc::new(SubscriptionBridge::new(sink, Arc::clone(lifecycle)));
        subscribe_with_retry(
            source,
            signals,
            bridge,
            settings.subscription.retry_policy(),
            Arc::clone(lifecycle),
        )
        .await?;
        Ok(())
    }
}

/// The spawned relay session plus a view of its state.
struct RelayTask {
    handle: JoinHandle<SessionStats>,
    state: watch::Receiver<SessionState>,
}

impl RelayTask {
    /// Wait up to `timeout` for the session to reach `Closed`, then collect
    /// its counters. Returns the last observed state.
    async fn join(mut self, timeout: Duration) -> (SessionState, Option<SessionStats>) {
        let closed = tokio::time::timeout(
            timeout,
            self.state.wait_for(|s| *s == SessionState::Closed),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        let state = *self.state.borrow();

        if !closed {
            warn!(
                %state,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "relay session did not close in time"
            );
            self.handle.abort();
            return (state, None);
        }

        match self.handle.await {
            Ok(stats) => (state, Some(stats)),
            Err(e) => {
                warn!(error = %e, "relay task failed");
                (state, None)
            }
        }
    }
}

fn spawn_relay(mut session: RelaySession, lifecycle: Arc<LifecycleController>) -> RelayTask {
    let state = session.watch_state();
    let handle = tokio::spawn(async move {
        let token = lifecycle.token();
        if let Err(e) = session.run(&token).await {
            let _ = lifecycle.shutdown(ShutdownReason::from(&e));
        }
        session.close().await;
        session.stats()
    });
    RelayTask { handle, state }
}
