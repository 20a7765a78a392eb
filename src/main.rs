use anyhow::Context;

use crate::config::FileConfigSource;
use crate::daemon::ClockSyncDaemon;

#[macro_use]
extern crate tracing;

mod clock;
mod config;
mod daemon;
mod devices;
mod error;
mod hotplug;
mod protocols;
mod registry;
mod session;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=info",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for interrupt signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();

    let config = FileConfigSource::from_env();
    match config.path() {
        Some(path) => info!("Reading preferences from {}", path.display()),
        None => warn!("No config directory found, using default preferences"),
    }

    let daemon = ClockSyncDaemon::new(config)
        .await
        .context("failed to start device monitoring")?;

    daemon.run(interrupted()).await;
    Ok(())
}
