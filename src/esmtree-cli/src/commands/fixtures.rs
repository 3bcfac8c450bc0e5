//! Archive bytes for command tests

use byteorder::{LittleEndian, WriteBytesExt};
use std::path::{Path, PathBuf};

fn subrecord(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
}

pub fn record(tag: &[u8; 4], subrecords: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (tag, payload) in subrecords {
        subrecord(&mut body, tag, payload);
    }

    let mut out = tag.to_vec();
    out.write_u32::<LittleEndian>(body.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.extend_from_slice(&body);
    out
}

pub fn script(name: &str, source: &str) -> Vec<u8> {
    let mut schd = name.as_bytes().to_vec();
    schd.resize(32, 0);
    for value in [1, 2, 0, 4, 3] {
        schd.write_i32::<LittleEndian>(value).unwrap();
    }
    record(
        b"SCPT",
        &[
            (b"SCHD", &schd),
            (b"SCVR", b"one\0two\0x"),
            (b"SCDT", &[1, 2, 3, 4]),
            (b"SCTX", source.as_bytes()),
        ],
    )
}

/// A script whose first subrecord is not `SCHD`
pub fn headerless_script() -> Vec<u8> {
    record(b"SCPT", &[(b"SCTX", b"orphan")])
}

pub fn write_archive(dir: &Path, records: &[Vec<u8>]) -> PathBuf {
    let path = dir.join("fixture.esp");
    std::fs::write(&path, records.concat()).unwrap();
    path
}
