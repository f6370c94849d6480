//! ClipRelay - clipboard synchronization through an untrusted relay
//!
//! This is the main entry point for the ClipRelay client.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cliprelay::cli::{Cli, CliHandler};
use cliprelay::Config;

/// Time granted to in-flight work after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. An unreadable config is reported by the command
    // that needs it.
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load_config(cli.config.as_deref())
            .map(|config| config.log_level)
            .unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cliprelay={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ClipRelay v{}", cliprelay::VERSION);

    let handler = CliHandler::new(cli.config);
    let cancel = CancellationToken::new();
    let work = handler.handle_command(cli.command, cancel.clone());
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => return result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return work.await;
            }
        }
    }

    info!("Shutting down");
    cancel.cancel();
    match tokio::time::timeout(SHUTDOWN_GRACE, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Shutdown grace period elapsed, exiting");
            Ok(())
        }
    }
}
