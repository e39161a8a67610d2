//! Evaluation configuration messages (type 2).
//!
//! Request layout (12 bytes): type(2) request_id(8) response_terminal(2).
//!
//! Response layout (288 bytes):
//!
//! ```text
//! | type | request_id | test_background | evaluation_purpose | eval_task_id |
//! |  2   |     8      |   128 (UTF-8)   |    128 (UTF-8)     |      8       |
//! | platforms mask | location | tasks | test_method |
//! |       8        |    2     |   2   |      2      |
//! ```

use crate::error::ProtocolError;
use crate::message::{open_message, start_message, MessageType, MESSAGE_PREFIX_SIZE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Width of each fixed text field in bytes.
pub const TEXT_FIELD_WIDTH: usize = 128;

/// Highest platform id representable in the 64-bit mask.
pub const MAX_PLATFORM_ID: u8 = 64;

/// Asks the peer for the current evaluation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfigRequest {
    pub request_id: u64,
    pub response_terminal: u16,
}

impl EvaluationConfigRequest {
    pub const ENCODED_LEN: usize = MESSAGE_PREFIX_SIZE + 2;

    pub fn encode(&self) -> Bytes {
        let mut w = start_message(
            Self::ENCODED_LEN,
            MessageType::EvaluationConfig,
            self.request_id,
        );
        w.write_u16(self.response_terminal);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (mut r, request_id) =
            open_message(data, MessageType::EvaluationConfig, Self::ENCODED_LEN)?;
        Ok(Self {
            request_id,
            response_terminal: r.read_u16()?,
        })
    }
}

/// Evaluation configuration returned by the peer.
///
/// `test_platforms` travels as a bitmask (bit `i` set means platform
/// `i + 1`), so it decodes sorted and deduplicated. `test_location` and
/// `test_tasks` carry at most one non-zero id each.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvaluationConfigResponse {
    pub request_id: u64,
    pub test_background: String,
    pub evaluation_purpose: String,
    pub eval_task_id: u64,
    pub test_platforms: Vec<u8>,
    pub test_location: Vec<u16>,
    pub test_tasks: Vec<u16>,
    /// Mutually exclusive test mode: 0, 1 or 2.
    pub test_method: u16,
}

impl EvaluationConfigResponse {
    pub const ENCODED_LEN: usize =
        MESSAGE_PREFIX_SIZE + TEXT_FIELD_WIDTH * 2 + 8 + 8 + 2 + 2 + 2;

    /// Encodes the response. Text longer than [`TEXT_FIELD_WIDTH`] bytes is
    /// truncated; platform ids outside `1..=64` are dropped.
    pub fn encode(&self) -> Bytes {
        let mut w = start_message(
            Self::ENCODED_LEN,
            MessageType::EvaluationConfig,
            self.request_id,
        );
        w.write_fixed_str(&self.test_background, TEXT_FIELD_WIDTH);
        w.write_fixed_str(&self.evaluation_purpose, TEXT_FIELD_WIDTH);
        w.write_u64(self.eval_task_id);
        w.write_u64(platforms_to_mask(&self.test_platforms));
        w.write_u16(first_or_zero(&self.test_location));
        w.write_u16(first_or_zero(&self.test_tasks));
        w.write_u16(self.test_method);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (mut r, request_id) =
            open_message(data, MessageType::EvaluationConfig, Self::ENCODED_LEN)?;
        Ok(Self {
            request_id,
            test_background: r.read_fixed_str(TEXT_FIELD_WIDTH)?,
            evaluation_purpose: r.read_fixed_str(TEXT_FIELD_WIDTH)?,
            eval_task_id: r.read_u64()?,
            test_platforms: mask_to_platforms(r.read_u64()?),
            test_location: single_to_list(r.read_u16()?),
            test_tasks: single_to_list(r.read_u16()?),
            test_method: r.read_u16()?,
        })
    }
}

fn platforms_to_mask(ids: &[u8]) -> u64 {
    ids.iter()
        .filter(|&&id| (1..=MAX_PLATFORM_ID).contains(&id))
        .fold(0u64, |mask, &id| mask | (1u64 << (id - 1)))
}

fn mask_to_platforms(mask: u64) -> Vec<u8> {
    (0..MAX_PLATFORM_ID)
        .filter(|bit| mask & (1u64 << bit) != 0)
        .map(|bit| bit + 1)
        .collect()
}

fn first_or_zero(ids: &[u16]) -> u16 {
    ids.first().copied().unwrap_or(0)
}

fn single_to_list(id: u16) -> Vec<u16> {
    if id == 0 {
        Vec::new()
    } else {
        vec![id]
    }
}
