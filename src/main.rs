//! orca-udp - simulated computation peer
//!
//! Answers Terrain and Evaluation-Config requests over the fragmented UDP
//! protocol so the engine can be exercised end to end without the real
//! computation service.

mod simulator;

use clap::Parser;
use orca_transport::Config;
use simulator::{Simulator, DEFAULT_BLOCK_BYTES};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orca-udp")]
#[command(about = "Simulated peer for the orca UDP computation protocol")]
#[command(version)]
struct Args {
    /// Terrain block bytes attached to each generated item
    #[arg(long, env = "ORCA_SIM_BLOCK_BYTES", default_value_t = DEFAULT_BLOCK_BYTES)]
    block_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration (from file if ORCA_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("ORCA_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("ORCA_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting orca-udp simulator");
    tracing::info!("  Bind address: {}", config.udp.send_endpoint());
    tracing::info!("  Reply address: {}", config.udp.listen_endpoint());
    tracing::info!("  Max datagram size: {}", config.udp.max_datagram_size);
    tracing::info!("  Terrain block bytes: {}", args.block_bytes);

    let mut simulator = Simulator::bind(&config.udp, args.block_bytes).await?;

    tokio::select! {
        result = simulator.run() => {
            if let Err(e) = result {
                tracing::error!("Simulator failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping simulator...");
        }
    }

    tracing::info!("Simulator stopped");
    Ok(())
}
