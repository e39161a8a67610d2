//! # orca-protocol
//!
//! Wire protocol for the orca computation service.
//!
//! This crate provides:
//! - Little-endian primitive reader/writer with bounds-checked reads
//! - Terrain and evaluation-config message schemas
//! - Type-tag dispatch into request/response sum types
//! - Datagram fragment header and message splitter

pub mod codec;
pub mod error;
pub mod evaluation;
pub mod fragment;
pub mod message;
pub mod terrain;

pub use codec::{ByteReader, ByteWriter};
pub use error::ProtocolError;
pub use evaluation::{EvaluationConfigRequest, EvaluationConfigResponse};
pub use fragment::{FragmentHeader, FragmentSplitter, FRAGMENT_HEADER_SIZE, MAX_FRAGMENT_PAYLOAD};
pub use message::{peek_type, MessageType, Request, Response, MESSAGE_PREFIX_SIZE};
pub use terrain::{TerrainItem, TerrainRequest, TerrainResponse};

/// Default maximum datagram size, header included.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1400;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65507;
