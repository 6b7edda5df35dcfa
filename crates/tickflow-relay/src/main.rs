//! tickflow relay - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Market data relay: venue ingestion, cluster fan-out, client gateway.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKFLOW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    tickflow_ws::init_crypto();

    let args = Args::parse();

    tickflow_telemetry::init_logging()?;

    info!("Starting tickflow relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            tickflow_relay::AppConfig::from_file(&path)?
        }
        None => tickflow_relay::AppConfig::load()?,
    };

    let app = tickflow_relay::Application::new(config)?;
    app.run().await?;

    Ok(())
}
