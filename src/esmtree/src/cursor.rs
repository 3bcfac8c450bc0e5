//! Bounded little-endian reader for record and subrecord payloads
//!
//! A [`Cursor`] never reads past the end of the slice it was built over. Every
//! overrun surfaces as [`Error::TruncatedInput`] with the absolute archive
//! offset, so a bad length field cannot spill into neighbouring data.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::tag::Tag;
use crate::{Error, Result};

/// Forward-only reader over one bounded region of the archive
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a cursor whose first byte sits at `base` in the archive
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    /// Position relative to the start of the region
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute archive offset of the next byte
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Borrow the next `n` bytes without copying
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read an `n`-byte name field. The name ends at the first NUL.
    pub fn read_fixed_name(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(decode_text(&bytes[..end]))
    }

    pub fn read_tag(&mut self) -> Result<Tag> {
        let bytes = self.read_bytes(4)?;
        Ok(Tag::new([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.read_bytes(4)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// Read a `u32` length prefix followed by that many bytes
    pub fn read_sized_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32_le()? as usize;
        self.read_bytes(len)
    }

    /// Consume everything left in the region
    pub fn read_remaining_bytes(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        slice
    }

    pub fn read_remaining_text(&mut self) -> String {
        decode_text(self.read_remaining_bytes())
    }

    /// Hand the rest of the region to a bulk copy without decoding it
    pub fn as_byte_stream(&mut self) -> impl Read + 'a {
        self.read_remaining_bytes()
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::TruncatedInput {
                offset: self.offset(),
                need: n,
                have: self.remaining(),
            });
        }
        Ok(())
    }
}

/// Decode archive text: UTF-8 when valid, otherwise byte-per-char Latin-1
///
/// The Latin-1 fallback is lossless, so legacy code-page text survives the
/// trip through the metadata document.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
