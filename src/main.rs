//! xdsnap - Main entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use xdsnap::{
    cli::{Cli, Command, run_capture_command, run_probe_command},
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xdsnap=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env()?;

    // Ctrl-C stops log streaming and the capture loop; the current snapshot
    // is still bundled.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing current snapshot");
            interrupt.cancel();
        }
    });

    match cli.command {
        Command::Capture(args) => run_capture_command(args, &config, cancel).await,
        Command::Probe(args) => run_probe_command(args, &config).await,
    }
}
