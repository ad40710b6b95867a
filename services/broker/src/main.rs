//! stratus-broker
//!
//! Operator entry point: record-store migrations and the reconciliation
//! sweeper, either as a single pass or as a periodic worker.

use anyhow::Result;
use clap::{Parser, Subcommand};
use stratus_broker::{config::Config, state::AppState, store::Database, sweeper::SweeperWorker};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lifecycle broker for managed databases and caches.
#[derive(Debug, Parser)]
#[command(name = "stratus-broker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation sweep and print the report as JSON.
    Sweep,

    /// Sweep periodically until interrupted.
    Run,

    /// Apply pending record-store migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to STRATUS_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(environment = %config.environment, "Starting stratus broker");

    match cli.command {
        Command::Migrate => {
            let db = Database::connect(&config.database).await?;
            if let Err(e) = db.run_migrations().await {
                error!(error = %e, "Failed to run migrations");
                return Err(e.into());
            }
        }
        Command::Sweep => {
            let state = AppState::from_config(&config).await?;
            let report = state.sweeper().sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run => {
            let state = AppState::from_config(&config).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let worker = SweeperWorker::new(state.sweeper(), config.sweep_interval);
            let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);

            if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
                warn!(error = %e, "Sweeper worker did not shut down in time");
            }
        }
    }

    info!("Broker shutdown complete");
    Ok(())
}
