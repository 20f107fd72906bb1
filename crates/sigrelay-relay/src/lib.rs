//! # sigrelay-relay
//!
//! The signal aggregation and relay core.
//!
//! - **Buffer**: [`buffer::SignalBuffer`], latest-value-wins state shared by
//!   the producer thread and the relay task
//! - **Tree**: [`tree::build_payload`] folds a drained batch into one `set` payload
//! - **Protocol / transport**: wire shapes, ack classification, WebSocket link
//! - **Session**: [`session::RelaySession`], the drain → send → ack cycle
//! - **Bridge**: [`bridge::SubscriptionBridge`] and the retry-forever subscribe loop
//! - **Lifecycle**: [`lifecycle::LifecycleController`], idempotent ordered teardown
//! - **Collaborators**: source traits and simulator, time-series store sink
//! - **Pipeline**: [`pipeline::Pipeline`] wires everything together

#![deny(unsafe_code)]

pub mod bridge;
pub mod buffer;
pub mod lifecycle;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod source;
pub mod store;
pub mod transport;
pub mod tree;

pub use buffer::{BatchEntry, RelayBatch, SignalBuffer};
pub use lifecycle::LifecycleController;
pub use pipeline::{OutputMode, Pipeline, RunOutcome};
pub use session::{RelaySession, SessionConfig, SessionState, SessionStats};
pub use source::{SignalHandler, SignalSource, SourceCredentials, Subscription};
pub use store::{JsonlStore, SeriesStore};
pub use transport::{RelayConnector, RelayTransport, WsConnector};
