//! # sigrelay
//!
//! Signal relay binary: subscribes to vehicle signals and forwards them to
//! a time-series store or a remote relay endpoint until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use sigrelay_core::logging::init_subscriber;
use sigrelay_core::{ShutdownReason, SignalId};
use sigrelay_relay::{LifecycleController, OutputMode, Pipeline, SourceCredentials};
use sigrelay_settings::{RelaySettings, load_settings, load_settings_from_path};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{info, warn};

/// Where subscribed signals are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Direct writes to the time-series store.
    Store,
    /// Batched `set` payloads to the relay endpoint.
    Relay,
}

/// Signal relay.
#[derive(Parser, Debug)]
#[command(name = "sigrelay", about = "Relay subscribed vehicle signals")]
struct Cli {
    /// Broker URL (overrides settings).
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// Broker API key. Takes precedence over --access-token.
    #[arg(short = 'x', long = "x-api-key")]
    x_api_key: Option<String>,

    /// Broker access token.
    #[arg(short = 't', long)]
    access_token: Option<String>,

    /// Signals to subscribe to, as `namespace:signal_name`.
    #[arg(short = 's', long, num_args = 1.., required = true)]
    signals: Vec<SignalId>,

    /// Output mode.
    #[arg(short = 'o', long, value_enum, default_value_t = Mode::Store)]
    output_mode: Mode,

    /// Element identifier (required in relay mode).
    #[arg(short = 'i', long)]
    id: Option<String>,

    /// Relay endpoint URL (overrides settings).
    #[arg(long)]
    relay_url: Option<String>,

    /// Settings file (defaults to `~/.sigrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store device path (overrides settings).
    #[arg(long)]
    device_id: Option<String>,

    /// Store output file (overrides settings; stdout when unset).
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn output_mode(&self) -> Result<OutputMode> {
        match (self.output_mode, &self.id) {
            (Mode::Store, _) => Ok(OutputMode::Store),
            (Mode::Relay, Some(id)) if !id.is_empty() => Ok(OutputMode::Relay {
                instance: id.clone(),
            }),
            (Mode::Relay, _) => bail!("--id is required when --output-mode is relay"),
        }
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(url) = &self.url {
            settings.subscription.broker_url.clone_from(url);
        }
        if let Some(url) = &self.relay_url {
            settings.relay.url.clone_from(url);
        }
        if let Some(device_id) = &self.device_id {
            settings.store.device_id.clone_from(device_id);
        }
        if let Some(path) = &self.store_path {
            settings.store.path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    fn credentials(&self) -> SourceCredentials {
        SourceCredentials::from_flags(self.x_api_key.clone(), self.access_token.clone())
    }
}

/// Process stop signals: Ctrl-C everywhere, plus SIGTERM on Unix.
struct InterruptListener {
    #[cfg(unix)]
    terminate: Signal,
}

impl InterruptListener {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Name of the first stop signal received.
    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mode = cli.output_mode()?;

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    info!(
        broker = %settings.subscription.broker_url,
        mode = ?mode,
        signals = cli.signals.len(),
        credentials = cli.credentials().kind(),
        "starting signal relay"
    );

    let lifecycle = Arc::new(LifecycleController::new());
    let interrupt = {
        let lifecycle = Arc::clone(&lifecycle);
        let token = lifecycle.token();
        let mut listener =
            InterruptListener::new().context("Failed to install signal handlers")?;
        tokio::spawn(async move {
            tokio::select! {
                res = listener.recv() => match res {
                    Ok(name) => {
                        info!(signal = name, "stop signal received");
                        let _ = lifecycle.shutdown(ShutdownReason::Interrupt);
                    }
                    Err(e) => warn!(error = %e, "failed to listen for interrupt"),
                },
                () = token.cancelled() => {}
            }
        })
    };

    let credentials = cli.credentials();
    let outcome = Pipeline::new(settings, cli.signals, mode)
        .with_credentials(credentials)
        .run(lifecycle)
        .await;
    interrupt.abort();

    Ok(outcome.exit_code())
}
