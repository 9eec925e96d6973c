mod adapters;
mod bootstrap;
mod health;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::Duration;

use procura_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use procura_core::config::LogFormat::{Compact, Json, Pretty};
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Config and logging come up before anything that might need to log.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.state_store.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = tokio::spawn(app.sweeper.run(shutdown_rx));

    tracing::info!(event_name = "server_started", correlation_id = "bootstrap");

    tokio::signal::ctrl_c().await?;
    tracing::info!(event_name = "server_stopping", correlation_id = "shutdown");

    // The sweeper releases its lease on the way out; give it a bounded
    // window before tearing down the pools.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs.max(1));
    if tokio::time::timeout(grace, sweeper_handle).await.is_err() {
        tracing::warn!(event_name = "sweeper_shutdown_timed_out", correlation_id = "shutdown");
    }

    app.state_store.close().await;
    tracing::info!(event_name = "server_stopped", correlation_id = "shutdown");

    Ok(())
}
