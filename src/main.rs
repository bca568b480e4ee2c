//! CLI entry point for ppg-vitals
//!
//! ```bash
//! ppg-vitals serve --config config/ppg_vitals.toml
//! ppg-vitals check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ppg_vitals::config::{AppConfig, DEFAULT_CONFIG_PATH};
use ppg_vitals::data::storage::CsvArchive;
use ppg_vitals::logging;
use ppg_vitals::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "ppg-vitals")]
#[command(about = "PPG ingest server with heart rate and SpO2 estimation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP ingest endpoint and WebSocket feed
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load, validate and print the effective configuration
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => serve(config, port).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn serve(path: PathBuf, port: Option<u16>) -> Result<()> {
    let mut config = AppConfig::load_from(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(port) = port {
        config.server.port = port;
    }
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    info!(
        name = %config.application.name,
        threshold = config.acquisition.window_threshold,
        fs = config.acquisition.sampling_rate_hz,
        "Starting PPG vitals service"
    );

    let archive = Arc::new(CsvArchive::from_config(&config.storage));
    let state = AppState::new(&config, archive);
    server::serve(&config, state).await?;
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = AppConfig::load_from(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
