//! # orca-transport
//!
//! UDP transport for the orca computation service.
//!
//! This crate provides:
//! - Fragment reassembly with idle-session eviction
//! - Request/response correlation by request id
//! - `UdpService`, the async client that ties sockets, workers and both tables together
//! - YAML and environment based configuration

pub mod config;
pub mod error;
pub mod pending;
pub mod reassembler;
pub mod service;

pub use config::{Config, ConfigError, UdpConfig};
pub use error::{ReassembleError, ServiceError};
pub use pending::{PendingRequests, PendingResponse};
pub use reassembler::Reassembler;
pub use service::{ServiceStats, StatsSnapshot, UdpService};
