//! Message envelopes and type-tag dispatch.
//!
//! Every defragmented message starts with the same 10-byte prefix:
//!
//! ```text
//! +----------+----------------+----------------------+
//! | type tag | request id     | type-specific body   |
//! | 2 bytes  | 8 bytes        | ...                  |
//! +----------+----------------+----------------------+
//! ```
//!
//! [`Request`] and [`Response`] are the per-direction sum types; their
//! `decode` functions peek the tag and route to the matching schema.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::ProtocolError;
use crate::evaluation::{EvaluationConfigRequest, EvaluationConfigResponse};
use crate::terrain::{TerrainRequest, TerrainResponse};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Size of the type tag in bytes.
pub const TYPE_TAG_SIZE: usize = 2;

/// Size of the common prefix (type tag + request id).
pub const MESSAGE_PREFIX_SIZE: usize = TYPE_TAG_SIZE + 8;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    /// Terrain analysis between two coordinates.
    Terrain = 1,
    /// Evaluation configuration lookup.
    EvaluationConfig = 2,
}

impl MessageType {
    pub fn tag(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Terrain),
            2 => Ok(MessageType::EvaluationConfig),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Reads the type tag without consuming anything.
pub fn peek_type(data: &[u8]) -> Result<u16, ProtocolError> {
    if data.len() < TYPE_TAG_SIZE {
        return Err(ProtocolError::TooShort {
            expected: TYPE_TAG_SIZE,
            actual: data.len(),
        });
    }
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// Validates length and tag, then reads the request id.
///
/// Returns a reader positioned at the start of the type-specific body.
pub(crate) fn open_message(
    data: &[u8],
    expected: MessageType,
    min_len: usize,
) -> Result<(ByteReader<'_>, u64), ProtocolError> {
    if data.len() < min_len {
        return Err(ProtocolError::TooShort {
            expected: min_len,
            actual: data.len(),
        });
    }
    let mut reader = ByteReader::new(data);
    let tag = reader.read_u16()?;
    if tag != expected.tag() {
        return Err(ProtocolError::InvalidType {
            expected: expected.tag(),
            actual: tag,
        });
    }
    let request_id = reader.read_u64()?;
    Ok((reader, request_id))
}

/// Allocates a writer of `len` bytes and writes the common prefix.
pub(crate) fn start_message(len: usize, ty: MessageType, request_id: u64) -> ByteWriter {
    let mut writer = ByteWriter::with_len(len);
    writer.write_u16(ty.tag());
    writer.write_u64(request_id);
    writer
}

/// A request sent to the computation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Terrain(TerrainRequest),
    EvaluationConfig(EvaluationConfigRequest),
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Terrain(_) => MessageType::Terrain,
            Request::EvaluationConfig(_) => MessageType::EvaluationConfig,
        }
    }

    pub fn request_id(&self) -> u64 {
        match self {
            Request::Terrain(r) => r.request_id,
            Request::EvaluationConfig(r) => r.request_id,
        }
    }

    /// Exact encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Request::Terrain(_) => TerrainRequest::ENCODED_LEN,
            Request::EvaluationConfig(_) => EvaluationConfigRequest::ENCODED_LEN,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Request::Terrain(r) => r.encode(),
            Request::EvaluationConfig(r) => r.encode(),
        }
    }

    /// Decodes a request, dispatching on the type tag.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        match MessageType::try_from(peek_type(data)?)? {
            MessageType::Terrain => TerrainRequest::decode(data).map(Request::Terrain),
            MessageType::EvaluationConfig => {
                EvaluationConfigRequest::decode(data).map(Request::EvaluationConfig)
            }
        }
    }
}

impl From<TerrainRequest> for Request {
    fn from(r: TerrainRequest) -> Self {
        Request::Terrain(r)
    }
}

impl From<EvaluationConfigRequest> for Request {
    fn from(r: EvaluationConfigRequest) -> Self {
        Request::EvaluationConfig(r)
    }
}

/// A response produced by the computation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Terrain(TerrainResponse),
    EvaluationConfig(EvaluationConfigResponse),
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Terrain(_) => MessageType::Terrain,
            Response::EvaluationConfig(_) => MessageType::EvaluationConfig,
        }
    }

    pub fn request_id(&self) -> u64 {
        match self {
            Response::Terrain(r) => r.request_id,
            Response::EvaluationConfig(r) => r.request_id,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Response::Terrain(r) => r.encode(),
            Response::EvaluationConfig(r) => Ok(r.encode()),
        }
    }

    /// Decodes a response, dispatching on the type tag.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        match MessageType::try_from(peek_type(data)?)? {
            MessageType::Terrain => TerrainResponse::decode(data).map(Response::Terrain),
            MessageType::EvaluationConfig => {
                EvaluationConfigResponse::decode(data).map(Response::EvaluationConfig)
            }
        }
    }
}

impl From<TerrainResponse> for Response {
    fn from(r: TerrainResponse) -> Self {
        Response::Terrain(r)
    }
}

impl From<EvaluationConfigResponse> for Response {
    fn from(r: EvaluationConfigResponse) -> Self {
        Response::EvaluationConfig(r)
    }
}
