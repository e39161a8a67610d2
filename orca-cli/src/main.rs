//! orca-cli - Command-line client for the orca UDP computation service
//!
//! Sends one request, waits for the response and prints it as JSON.

use clap::{Parser, Subcommand};
use colored::Colorize;
use orca_protocol::{EvaluationConfigRequest, Request, TerrainRequest};
use orca_transport::{Config, UdpConfig, UdpService};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orca-cli")]
#[command(about = "Command-line client for the orca UDP computation service")]
#[command(version)]
struct Cli {
    /// Host to receive responses on
    #[arg(long, env = "ORCA_UDP_LISTEN_HOST")]
    listen_host: Option<String>,

    /// Port to receive responses on
    #[arg(long, env = "ORCA_UDP_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Peer host
    #[arg(long, env = "ORCA_UDP_SEND_HOST")]
    send_host: Option<String>,

    /// Peer port
    #[arg(long, env = "ORCA_UDP_SEND_PORT")]
    send_port: Option<u16>,

    /// Largest datagram to send, fragment header included
    #[arg(long)]
    max_datagram_size: Option<usize>,

    /// Seconds to wait for the response
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print transport statistics after the response
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request terrain analysis between two points
    Terrain {
        /// Longitude of point A
        #[arg(long, allow_hyphen_values = true)]
        a_lon: f64,

        /// Latitude of point A
        #[arg(long, allow_hyphen_values = true)]
        a_lat: f64,

        /// Longitude of point B
        #[arg(long, allow_hyphen_values = true)]
        b_lon: f64,

        /// Latitude of point B
        #[arg(long, allow_hyphen_values = true)]
        b_lat: f64,

        /// Data source (1 = A, 2 = B, 3 = C)
        #[arg(long, default_value_t = 1)]
        data_source: u16,

        /// Terminal the result is delivered to
        #[arg(long, default_value_t = 0)]
        terminal: u16,

        /// Request id (defaults to the current time in milliseconds)
        #[arg(long)]
        request_id: Option<u64>,
    },

    /// Fetch the evaluation configuration
    EvalConfig {
        /// Terminal the result is delivered to
        #[arg(long, default_value_t = 0)]
        terminal: u16,

        /// Request id (defaults to the current time in milliseconds)
        #[arg(long)]
        request_id: Option<u64>,
    },

    /// Print the effective transport configuration
    ShowConfig,
}

impl Cli {
    /// Applies command-line endpoint overrides on top of the loaded configuration.
    fn apply_overrides(&self, mut udp: UdpConfig) -> UdpConfig {
        if let Some(ref host) = self.listen_host {
            udp.listen_host = host.clone();
        }
        if let Some(port) = self.listen_port {
            udp.listen_port = port;
        }
        if let Some(ref host) = self.send_host {
            udp.send_host = host.clone();
        }
        if let Some(port) = self.send_port {
            udp.send_port = port;
        }
        if let Some(size) = self.max_datagram_size {
            udp.max_datagram_size = size;
        }
        udp
    }
}

fn default_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load().map_err(|e| {
        eprintln!("{}: {}", "Invalid configuration".red(), e);
        e
    })?;
    let udp = cli.apply_overrides(config.udp);
    udp.validate()?;

    let request: Request = match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&udp)?);
            return Ok(());
        }
        Commands::Terrain {
            a_lon,
            a_lat,
            b_lon,
            b_lat,
            data_source,
            terminal,
            request_id,
        } => TerrainRequest {
            request_id: request_id.unwrap_or_else(default_request_id),
            response_terminal: terminal,
            a_longitude: a_lon,
            a_latitude: a_lat,
            b_longitude: b_lon,
            b_latitude: b_lat,
            data_source,
        }
        .into(),
        Commands::EvalConfig {
            terminal,
            request_id,
        } => EvaluationConfigRequest {
            request_id: request_id.unwrap_or_else(default_request_id),
            response_terminal: terminal,
        }
        .into(),
    };

    let service = UdpService::start(udp).await.map_err(|e| {
        eprintln!("{}: {}", "Failed to start transport".red(), e);
        e
    })?;

    let request_id = request.request_id();
    let timeout = Duration::from_secs(cli.timeout_secs);
    tracing::info!(
        "Listening on {}, sending {:?} request {} to {}",
        service.local_addr(),
        request.message_type(),
        request_id,
        service.peer_addr()
    );
    let result = service.request(request, timeout).await;
    let stats = service.stats();
    service.shutdown().await;

    match result {
        Ok(response) => {
            eprintln!(
                "{} response for request {}",
                "Received".green(),
                request_id.to_string().cyan()
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
            if cli.stats {
                eprintln!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!("Request {} failed (retryable: {})", request_id, e.is_retryable());
            eprintln!("{}: {}", "Request failed".red(), e);
            Err(e.into())
        }
    }
}
