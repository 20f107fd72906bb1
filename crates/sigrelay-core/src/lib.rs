//! # sigrelay-core
//!
//! Foundation types shared by every signal-relay crate:
//!
//! - **Signals**: [`signal::SourceSignal`] (µs, as delivered), [`signal::Signal`] (ms, in the relay)
//! - **Timestamps**: µs→ms truncation and the `{seconds, nanos}` wire record
//! - **Coercion**: store value stringification with the integer-leaf allow-list
//! - **Errors**: the startup / protocol / store / schema taxonomy via `thiserror`
//! - **Retry**: the retry-forever policy for subscribing
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod coercion;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod signal;
pub mod timestamp;

pub use errors::{
    ProtocolError, RelayError, ShutdownReason, SignalIdError, SourceError, StartupError,
    StoreWriteError, TreeError,
};
pub use signal::{Signal, SignalId, SignalValue, SourceSignal};
pub use timestamp::WireTimestamp;
