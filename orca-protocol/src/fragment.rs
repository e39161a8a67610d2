//! Datagram fragmentation.
//!
//! Every datagram on the wire is a 15-byte header followed by one slice of
//! an encoded message:
//!
//! ```text
//! +------------+---------------+----------------+--------------+-------+----------+
//! | session_id | total_packets | current_packet | current_size | flags | checksum |
//! |  4 bytes   |    2 bytes    |    2 bytes     |   2 bytes    | 1 byte|  4 bytes |
//! +------------+---------------+----------------+--------------+-------+----------+
//! | payload (current_size bytes)                                                  |
//! +-------------------------------------------------------------------------------+
//! ```
//!
//! `flags` and `checksum` are carried for wire compatibility; the splitter
//! writes zero and nothing verifies them.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::ProtocolError;
use bytes::Bytes;
use rand::Rng;

/// Size of the fragment header in bytes.
pub const FRAGMENT_HEADER_SIZE: usize = 15;

/// Largest payload a single fragment can declare.
pub const MAX_FRAGMENT_PAYLOAD: usize = u16::MAX as usize;

/// Header preceding every fragment datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    pub session_id: u32,
    pub total_packets: u16,
    /// Zero-based index of this fragment.
    pub current_packet: u16,
    /// Payload bytes following the header in this datagram.
    pub current_size: u16,
    pub flags: u8,
    pub checksum: u32,
}

impl FragmentHeader {
    pub fn new(session_id: u32, total_packets: u16, current_packet: u16, current_size: u16) -> Self {
        Self {
            session_id,
            total_packets,
            current_packet,
            current_size,
            flags: 0,
            checksum: 0,
        }
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u32(self.session_id);
        w.write_u16(self.total_packets);
        w.write_u16(self.current_packet);
        w.write_u16(self.current_size);
        w.write_u8(self.flags);
        w.write_u32(self.checksum);
    }

    pub fn encode(&self) -> Bytes {
        let mut w = ByteWriter::with_len(FRAGMENT_HEADER_SIZE);
        self.write(&mut w);
        w.finish()
    }

    /// Decodes a header from the first 15 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAGMENT_HEADER_SIZE {
            return Err(ProtocolError::TooShort {
                expected: FRAGMENT_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut r = ByteReader::new(&data[..FRAGMENT_HEADER_SIZE]);
        Ok(Self {
            session_id: r.read_u32()?,
            total_packets: r.read_u16()?,
            current_packet: r.read_u16()?,
            current_size: r.read_u16()?,
            flags: r.read_u8()?,
            checksum: r.read_u32()?,
        })
    }

    /// Splits a received datagram into its header and payload.
    ///
    /// Fails if the datagram is shorter than a header or if the header
    /// declares more payload than the datagram carries. Trailing bytes past
    /// `current_size` are ignored.
    pub fn parse_datagram(datagram: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        let header = Self::decode(datagram)?;
        let declared = header.current_size as usize;
        let available = datagram.len() - FRAGMENT_HEADER_SIZE;
        if declared > available {
            return Err(ProtocolError::InvalidFragment(format!(
                "header declares {} payload bytes, datagram carries {}",
                declared, available
            )));
        }
        let start = FRAGMENT_HEADER_SIZE;
        Ok((header, &datagram[start..start + declared]))
    }
}

/// Splits encoded messages into fragment datagrams.
#[derive(Debug, Clone, Copy)]
pub struct FragmentSplitter {
    max_payload: usize,
}

impl FragmentSplitter {
    /// Creates a splitter that puts at most `max_payload` message bytes in
    /// each datagram.
    pub fn new(max_payload: usize) -> Result<Self, ProtocolError> {
        if max_payload == 0 || max_payload > MAX_FRAGMENT_PAYLOAD {
            return Err(ProtocolError::InvalidPayloadBudget(max_payload));
        }
        Ok(Self { max_payload })
    }

    /// Creates a splitter sized for datagrams of at most `max_datagram_size`
    /// bytes including the header.
    pub fn for_datagram_size(max_datagram_size: usize) -> Result<Self, ProtocolError> {
        let budget = max_datagram_size
            .checked_sub(FRAGMENT_HEADER_SIZE)
            .ok_or(ProtocolError::InvalidPayloadBudget(0))?;
        Self::new(budget)
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Number of fragments `len` bytes split into (at least one).
    pub fn fragment_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload).max(1)
    }

    /// Splits `message` under a session id drawn from `rng`.
    pub fn split<R: Rng + ?Sized>(
        &self,
        message: &[u8],
        rng: &mut R,
    ) -> Result<Vec<Bytes>, ProtocolError> {
        self.split_with_session(message, rng.gen())
    }

    /// Splits `message` under the given session id.
    pub fn split_with_session(
        &self,
        message: &[u8],
        session_id: u32,
    ) -> Result<Vec<Bytes>, ProtocolError> {
        let total = self.fragment_count(message.len());
        if total > u16::MAX as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: message.len(),
                max: u16::MAX as usize * self.max_payload,
            });
        }

        let mut fragments = Vec::with_capacity(total);
        if message.is_empty() {
            fragments.push(Self::build(FragmentHeader::new(session_id, 1, 0, 0), &[]));
            return Ok(fragments);
        }

        for (index, chunk) in message.chunks(self.max_payload).enumerate() {
            let header =
                FragmentHeader::new(session_id, total as u16, index as u16, chunk.len() as u16);
            fragments.push(Self::build(header, chunk));
        }
        Ok(fragments)
    }

    fn build(header: FragmentHeader, payload: &[u8]) -> Bytes {
        let mut w = ByteWriter::with_len(FRAGMENT_HEADER_SIZE + payload.len());
        header.write(&mut w);
        w.write_bytes(payload);
        w.finish()
    }
}
