//! Serve command: run the receiver and the correlation engine
//!
//! Events arriving on the hook socket are dispatched into the engine until
//! Ctrl-C, then every live span is flushed and the tracer provider shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use spanloom_core::{Dispatcher, HookReceiver, HookReceiverConfig, SystemClock, Tracker};
use spanloom_observe::build_provider;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigLoader, SpanloomConfig};

/// Capacity of the receiver to dispatcher channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Socket path to listen on (overrides config)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Print spans to stdout instead of exporting them
    #[arg(long)]
    pub console: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load().context("loading configuration")?;
    apply_overrides(&mut config, &args);
    serve(config).await
}

fn apply_overrides(config: &mut SpanloomConfig, args: &ServeArgs) {
    if let Some(socket) = &args.socket {
        config.receiver.socket_path = socket.clone();
    }
    if args.console {
        config.export.console = true;
    }
}

async fn serve(config: SpanloomConfig) -> Result<()> {
    let tracer_config = config.export.tracer_config();
    if !tracer_config.export_enabled() {
        warn!("No export credential configured; spans will not leave this process");
    }
    let mut guard = build_provider(&tracer_config).context("building tracer provider")?;
    let tracer = guard
        .tracer()
        .context("tracer provider already shut down")?;

    let tracker = Tracker::new(tracer, Arc::new(SystemClock))
        .with_ttl(config.gc.ttl_policy())
        .with_correlation(config.correlation.policy());

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let receiver = HookReceiver::new(HookReceiverConfig::from(&config.receiver), tx);
    receiver
        .start()
        .await
        .with_context(|| format!("binding hook receiver at {}", receiver.address()))?;

    let shutdown = CancellationToken::new();
    let dispatcher = tokio::spawn(Dispatcher::new(tracker).run(rx, shutdown.clone()));

    info!("spanloom listening on {}", receiver.address());
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");
    shutdown.cancel();

    let summary = dispatcher.await.context("dispatcher task failed")?;
    info!(
        events = summary.events,
        reaped = summary.reaped.total(),
        flushed = summary.flushed.units_closed,
        "Dispatcher drained"
    );

    guard.shutdown();

    #[cfg(unix)]
    if let Err(e) = std::fs::remove_file(&config.receiver.socket_path) {
        warn!("Failed to remove socket file: {}", e);
    }

    Ok(())
}
