//! Upstream subscription boundary.
//!
//! The source pushes batches of [`SourceSignal`]s into a [`SignalHandler`]
//! from its own execution context. Subscribing returns a [`Subscription`]
//! handle whose `cancel` stops delivery.

use std::fmt;
use std::sync::Arc;

use sigrelay_core::{SignalId, SourceError, SourceSignal, StartupError};
use sigrelay_settings::{SimulatorSection, SubscriptionSection};

use crate::simulator::SimulatedSource;

/// URL scheme selecting the built-in simulator.
pub const SIMULATOR_SCHEME: &str = "sim";

/// Receiver of pushed signal batches.
///
/// Called from the source's own thread; implementations must not block on
/// async work.
pub trait SignalHandler: Send + Sync {
    /// Handle one non-empty, ordered batch.
    fn on_signals(&self, batch: &[SourceSignal]);
}

/// Handle for an active subscription.
pub trait Subscription: Send + Sync {
    /// Stop delivery. Safe to call more than once and from the delivering
    /// thread itself. May block until an in-flight delivery returns.
    fn cancel(&self) -> Result<(), SourceError>;
}

/// A push-style signal source.
pub trait SignalSource: Send + Sync {
    /// Subscribe `handler` to `ids`.
    fn subscribe(
        &self,
        ids: &[SignalId],
        handler: Arc<dyn SignalHandler>,
    ) -> Result<Box<dyn Subscription>, SourceError>;
}

/// Credentials presented to the broker.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum SourceCredentials {
    /// Anonymous.
    #[default]
    None,
    /// `x-api-key` header.
    ApiKey(String),
    /// Bearer access token.
    AccessToken(String),
}

impl SourceCredentials {
    /// Pick credentials from CLI flags; an API key wins over a token.
    pub fn from_flags(api_key: Option<String>, access_token: Option<String>) -> Self {
        match (api_key, access_token) {
            (Some(key), _) => Self::ApiKey(key),
            (None, Some(token)) => Self::AccessToken(token),
            (None, None) => Self::None,
        }
    }

    /// Credential kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey(_) => "api_key",
            Self::AccessToken(_) => "access_token",
        }
    }
}

// Secrets never reach Debug output.
impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Resolve the source implementation for `subscription.broker_url`.
///
/// The source presents `subscription.client_id` to the broker.
pub fn source_for_url(
    subscription: &SubscriptionSection,
    credentials: SourceCredentials,
    simulator: &SimulatorSection,
) -> Result<Arc<dyn SignalSource>, StartupError> {
    let broker_url = subscription.broker_url.as_str();
    match broker_url.split_once("://") {
        Some((SIMULATOR_SCHEME, _)) => Ok(Arc::new(SimulatedSource::from_settings(
            simulator,
            &subscription.client_id,
            credentials,
        ))),
        _ => Err(StartupError::UnsupportedSource(broker_url.to_string())),
    }
}
