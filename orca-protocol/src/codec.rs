//! Little-endian primitive codec.
//!
//! Every multi-byte field on the wire is little-endian. Readers fail with
//! [`ProtocolError::BufferUnderrun`] instead of reading past the end of the
//! buffer. Writers are allocated with the exact size of the message they
//! will hold and never grow.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Cursor over a borrowed byte slice that reads little-endian primitives.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::BufferUnderrun {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a NUL-padded UTF-8 field of `width` bytes.
    ///
    /// Decoding stops at the first NUL. Invalid UTF-8 (for example a code
    /// point cut in half by a truncating writer) is replaced rather than
    /// rejected.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, ProtocolError> {
        let raw = self.read_bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// Fixed-capacity little-endian writer.
///
/// The total length is declared up front; [`ByteWriter::finish`] asserts
/// that exactly that many bytes were written.
#[derive(Debug)]
pub struct ByteWriter {
    buf: BytesMut,
    len: usize,
}

impl ByteWriter {
    /// Allocates a writer for a message of exactly `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(len),
            len,
        }
    }

    fn check(&self, additional: usize) {
        assert!(
            self.buf.len() + additional <= self.len,
            "write of {} bytes overflows declared length {} (written {})",
            additional,
            self.len,
            self.buf.len()
        );
    }

    pub fn write_u8(&mut self, value: u8) {
        self.check(1);
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.check(2);
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.check(4);
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.check(8);
        self.buf.put_u64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.check(4);
        self.buf.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.check(8);
        self.buf.put_f64_le(value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.check(data.len());
        self.buf.put_slice(data);
    }

    /// Writes `value` into a field of exactly `width` bytes.
    ///
    /// Longer input is cut at `width` bytes, which may split a multi-byte
    /// UTF-8 sequence. Shorter input is NUL-padded.
    pub fn write_fixed_str(&mut self, value: &str, width: usize) {
        self.check(width);
        let bytes = value.as_bytes();
        let n = bytes.len().min(width);
        self.buf.put_slice(&bytes[..n]);
        self.buf.put_bytes(0, width - n);
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    /// Returns the encoded message.
    ///
    /// # Panics
    ///
    /// Panics if fewer bytes were written than declared; that is a bug in
    /// the schema's size computation.
    pub fn finish(self) -> Bytes {
        assert_eq!(
            self.buf.len(),
            self.len,
            "encoded length does not match computed length"
        );
        self.buf.freeze()
    }
}
