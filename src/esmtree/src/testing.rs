//! Archive fixtures for unit tests

use byteorder::{LittleEndian, WriteBytesExt};

use crate::tag::{self, Tag};

/// Builds one record: header plus subrecord stream
pub struct RecordBuilder {
    tag: Tag,
    flags: u32,
    unknown: u32,
    body: Vec<u8>,
}

impl RecordBuilder {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            flags: 0,
            unknown: 0,
            body: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn unknown(mut self, unknown: u32) -> Self {
        self.unknown = unknown;
        self
    }

    /// Append a well-formed subrecord
    pub fn sub(mut self, tag: Tag, payload: &[u8]) -> Self {
        self.body.extend_from_slice(&tag.bytes());
        self.body
            .write_u32::<LittleEndian>(payload.len() as u32)
            .unwrap();
        self.body.extend_from_slice(payload);
        self
    }

    /// Append bytes verbatim, for malformed framing
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.body.len());
        out.extend_from_slice(&self.tag.bytes());
        out.write_u32::<LittleEndian>(self.body.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(self.unknown).unwrap();
        out.write_u32::<LittleEndian>(self.flags).unwrap();
        out.extend_from_slice(&self.body);
        out
    }
}

/// `SCHD` payload: 32-byte NUL-padded name and five counters
pub fn schd(name: &str, counters: [i32; 5]) -> Vec<u8> {
    let mut out = name.as_bytes().to_vec();
    out.resize(32, 0);
    for value in counters {
        out.write_i32::<LittleEndian>(value).unwrap();
    }
    out
}

/// Minimal `TES3` file header record
pub fn file_header() -> Vec<u8> {
    let mut hedr = Vec::new();
    hedr.write_f32::<LittleEndian>(1.3).unwrap();
    hedr.write_u32::<LittleEndian>(0).unwrap();
    let mut company = b"test".to_vec();
    company.resize(32, 0);
    hedr.extend_from_slice(&company);
    let mut description = b"fixture".to_vec();
    description.resize(256, 0);
    hedr.extend_from_slice(&description);
    hedr.write_u32::<LittleEndian>(2).unwrap();

    RecordBuilder::new(tag::TES3).sub(tag::HEDR, &hedr).build()
}

/// Concatenate records into an archive
pub fn archive(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}
