//! Lock index of emitted record directories
//!
//! Handlers register every record directory they create, in archive order.
//! The [`LockFile`] implementation appends one JSON line per record so an
//! interrupted run still leaves a usable index behind.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispatch::RecordHeader;
use crate::output::Metadata;
use crate::{Error, Result};

/// Name of the lock index written at the root of an output tree
pub const LOCK_FILE: &str = ".lock";

/// Receives every record directory as soon as it exists
pub trait LockWriter {
    fn record_directory(&mut self, directory: &Path) -> Result<()>;
}

/// One line of the lock index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Position of the record among emitted records
    pub sequence: u64,
    /// Directory relative to the output root, `/`-separated
    pub directory: String,
}

/// Append-only lock index backed by `<root>/.lock`
pub struct LockFile {
    root: PathBuf,
    path: PathBuf,
    writer: BufWriter<File>,
    next: u64,
}

impl LockFile {
    /// Start a fresh index for a conversion into `root`
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let path = root.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;

        Ok(Self {
            root: root.to_path_buf(),
            path,
            writer: BufWriter::new(file),
            next: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of directories recorded so far
    pub fn len(&self) -> u64 {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Read back every entry of an existing lock index
    pub fn read_entries(path: &Path) -> Result<Vec<LockEntry>> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut entries = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }

        Ok(entries)
    }

    fn relative(&self, directory: &Path) -> String {
        let relative = directory.strip_prefix(&self.root).unwrap_or(directory);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl LockWriter for LockFile {
    fn record_directory(&mut self, directory: &Path) -> Result<()> {
        let entry = LockEntry {
            sequence: self.next,
            directory: self.relative(directory),
        };

        serde_json::to_writer(&mut self.writer, &entry)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| Error::io(&self.path, e))?;

        self.next += 1;
        Ok(())
    }
}

/// Lock writer that only remembers directories, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryLock {
    pub directories: Vec<PathBuf>,
}

impl LockWriter for MemoryLock {
    fn record_directory(&mut self, directory: &Path) -> Result<()> {
        self.directories.push(directory.to_path_buf());
        Ok(())
    }
}

/// Contribute the record header's flag words to its metadata
///
/// Zero words are omitted, so absence means zero.
pub fn record_fields(doc: &mut Metadata, header: &RecordHeader) {
    if header.flags != 0 {
        doc.number("flags", i64::from(header.flags));
    }
    if header.unknown != 0 {
        doc.number("unknown", i64::from(header.unknown));
    }
}
