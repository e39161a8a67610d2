//! Terrain analysis messages (type 1).
//!
//! Request layout (46 bytes):
//!
//! ```text
//! | type | request_id | response_terminal | a_lon | a_lat | b_lon | b_lat | data_source |
//! |  2   |     8      |         2         |   8   |   8   |   8   |   8   |      2      |
//! ```
//!
//! Response layout:
//!
//! ```text
//! | type | request_id | count | item * count |
//! |  2   |     8      |   4   |              |
//!
//! item:
//! | a_lon | b_lon | type | density | field6 | data_len | data     |
//! |   8   |   8   |  4   |    4    |   2    |    2     | data_len |
//! ```

use crate::codec::ByteReader;
use crate::error::ProtocolError;
use crate::message::{open_message, start_message, MessageType, MESSAGE_PREFIX_SIZE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Terrain analysis request between points A and B.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainRequest {
    pub request_id: u64,
    /// Terminal the result should be delivered to.
    pub response_terminal: u16,
    pub a_longitude: f64,
    pub a_latitude: f64,
    pub b_longitude: f64,
    pub b_latitude: f64,
    /// Data source selector (1 = A, 2 = B, 3 = C).
    pub data_source: u16,
}

impl TerrainRequest {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = MESSAGE_PREFIX_SIZE + 2 + 8 * 4 + 2;

    pub fn encode(&self) -> Bytes {
        let mut w = start_message(Self::ENCODED_LEN, MessageType::Terrain, self.request_id);
        w.write_u16(self.response_terminal);
        w.write_f64(self.a_longitude);
        w.write_f64(self.a_latitude);
        w.write_f64(self.b_longitude);
        w.write_f64(self.b_latitude);
        w.write_u16(self.data_source);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (mut r, request_id) = open_message(data, MessageType::Terrain, Self::ENCODED_LEN)?;
        Ok(Self {
            request_id,
            response_terminal: r.read_u16()?,
            a_longitude: r.read_f64()?,
            a_latitude: r.read_f64()?,
            b_longitude: r.read_f64()?,
            b_latitude: r.read_f64()?,
            data_source: r.read_u16()?,
        })
    }
}

/// One analysed segment in a [`TerrainResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainItem {
    pub a_longitude: f64,
    pub b_longitude: f64,
    pub item_type: u32,
    pub density: f32,
    pub field6: u16,
    /// Raw terrain block; empty when the peer sent none.
    #[serde(default)]
    pub terrain_data: Vec<u8>,
}

impl TerrainItem {
    /// Fixed part of an item, including the 2-byte data length.
    pub const FIXED_LEN: usize = 8 + 8 + 4 + 4 + 2 + 2;

    pub fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + self.terrain_data.len()
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, ProtocolError> {
        let a_longitude = r.read_f64()?;
        let b_longitude = r.read_f64()?;
        let item_type = r.read_u32()?;
        let density = r.read_f32()?;
        let field6 = r.read_u16()?;
        let data_len = r.read_u16()? as usize;
        let terrain_data = r.read_bytes(data_len)?.to_vec();
        Ok(Self {
            a_longitude,
            b_longitude,
            item_type,
            density,
            field6,
            terrain_data,
        })
    }
}

/// Terrain analysis result.
///
/// The wire `count` field is always the number of items encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainResponse {
    pub request_id: u64,
    pub items: Vec<TerrainItem>,
}

impl TerrainResponse {
    /// Minimum size: prefix plus the item count.
    pub const MIN_LEN: usize = MESSAGE_PREFIX_SIZE + 4;

    pub fn count(&self) -> u32 {
        self.items.len() as u32
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_LEN + self.items.iter().map(TerrainItem::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.items.len() > u32::MAX as usize {
            return Err(ProtocolError::FieldTooLarge {
                field: "items",
                size: self.items.len(),
                max: u32::MAX as usize,
            });
        }
        for item in &self.items {
            if item.terrain_data.len() > u16::MAX as usize {
                return Err(ProtocolError::FieldTooLarge {
                    field: "terrain_data",
                    size: item.terrain_data.len(),
                    max: u16::MAX as usize,
                });
            }
        }

        let mut w = start_message(self.encoded_len(), MessageType::Terrain, self.request_id);
        w.write_u32(self.count());
        for item in &self.items {
            w.write_f64(item.a_longitude);
            w.write_f64(item.b_longitude);
            w.write_u32(item.item_type);
            w.write_f32(item.density);
            w.write_u16(item.field6);
            w.write_u16(item.terrain_data.len() as u16);
            w.write_bytes(&item.terrain_data);
        }
        Ok(w.finish())
    }

    /// Decodes a response.
    ///
    /// Decoding stops early, without error, when the buffer ends on an item
    /// boundary before `count` items were read. An item cut off in the
    /// middle is an error.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (mut r, request_id) = open_message(data, MessageType::Terrain, Self::MIN_LEN)?;
        let count = r.read_u32()? as usize;

        let mut items = Vec::with_capacity(count.min(r.remaining() / TerrainItem::FIXED_LEN));
        while items.len() < count && r.has_remaining() {
            items.push(TerrainItem::decode(&mut r)?);
        }

        Ok(Self { request_id, items })
    }
}
