//! Transport configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ORCA_CONFIG)
//! 3. Environment variables

use orca_protocol::{FRAGMENT_HEADER_SIZE, MAX_UDP_PAYLOAD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum receive buffer size.
pub const MIN_RECV_BUFFER_SIZE: usize = 1024;

/// Maximum receive buffer size.
pub const MAX_RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// UDP transport configuration.
    pub udp: UdpConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ORCA_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.udp.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.udp.validate()
    }
}

/// UDP endpoint and engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Host the inbound socket binds to.
    pub listen_host: String,
    pub listen_port: u16,
    /// Peer host requests are sent to.
    pub send_host: String,
    pub send_port: u16,
    /// Largest datagram sent, fragment header included.
    pub max_datagram_size: usize,
    /// Idle time after which a partial reassembly session is dropped.
    pub reassembly_timeout_ms: u64,
    /// Scratch buffer for a single receive.
    pub recv_buffer_size: usize,
    /// Number of datagram processing workers.
    pub workers: usize,
    /// Datagrams buffered between the receive loop and the workers.
    pub worker_queue_capacity: usize,
    /// Fixed seed for fragment session ids; OS entropy when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_seed: Option<u64>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 19210,
            send_host: "0.0.0.0".to_string(),
            send_port: 19211,
            max_datagram_size: 1400,
            reassembly_timeout_ms: 3000,
            recv_buffer_size: MAX_RECV_BUFFER_SIZE,
            workers: 2,
            worker_queue_capacity: 1024,
            session_seed: None,
        }
    }
}

impl UdpConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ORCA_UDP_LISTEN_HOST") {
            if !host.is_empty() {
                self.listen_host = host;
            }
        }

        if let Ok(port) = std::env::var("ORCA_UDP_LISTEN_PORT") {
            if let Ok(p) = port.parse() {
                self.listen_port = p;
            }
        }

        if let Ok(host) = std::env::var("ORCA_UDP_SEND_HOST") {
            if !host.is_empty() {
                self.send_host = host;
            }
        }

        if let Ok(port) = std::env::var("ORCA_UDP_SEND_PORT") {
            if let Ok(p) = port.parse() {
                self.send_port = p;
            }
        }

        if let Ok(size) = std::env::var("ORCA_UDP_MAX_DATAGRAM_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_datagram_size = n;
            }
        }

        if let Ok(timeout) = std::env::var("ORCA_UDP_REASSEMBLY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.reassembly_timeout_ms = ms;
            }
        }

        if let Ok(size) = std::env::var("ORCA_UDP_RECV_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.recv_buffer_size = n;
            }
        }

        if let Ok(workers) = std::env::var("ORCA_UDP_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.workers = n;
            }
        }

        if let Ok(queue) = std::env::var("ORCA_UDP_WORKER_QUEUE") {
            if let Ok(n) = queue.parse() {
                self.worker_queue_capacity = n;
            }
        }

        if let Ok(seed) = std::env::var("ORCA_UDP_SESSION_SEED") {
            if let Ok(s) = seed.parse() {
                self.session_seed = Some(s);
            }
        }
    }

    /// Validates UDP configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_datagram_size <= FRAGMENT_HEADER_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "max_datagram_size must exceed the {}-byte fragment header",
                FRAGMENT_HEADER_SIZE
            )));
        }
        if self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::ValidationError(format!(
                "max_datagram_size {} exceeds UDP limit {}",
                self.max_datagram_size, MAX_UDP_PAYLOAD
            )));
        }
        if self.reassembly_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reassembly_timeout_ms must be positive".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be positive".to_string(),
            ));
        }
        if self.worker_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "worker_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the inbound endpoint.
    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.listen_host = host.into();
        self.listen_port = port;
        self
    }

    /// Sets the peer endpoint.
    pub fn with_send(mut self, host: impl Into<String>, port: u16) -> Self {
        self.send_host = host.into();
        self.send_port = port;
        self
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_session_seed(mut self, seed: u64) -> Self {
        self.session_seed = Some(seed);
        self
    }

    /// Returns `host:port` for the inbound socket.
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Returns `host:port` for the peer.
    pub fn send_endpoint(&self) -> String {
        format!("{}:{}", self.send_host, self.send_port)
    }

    /// Message bytes carried per fragment.
    pub fn fragment_payload_budget(&self) -> usize {
        self.max_datagram_size.saturating_sub(FRAGMENT_HEADER_SIZE)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Receive buffer size clamped to the supported range.
    pub fn effective_recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
            .clamp(MIN_RECV_BUFFER_SIZE, MAX_RECV_BUFFER_SIZE)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
