//! Streaming decoder for TES3 master/plugin archives (`.esm` / `.esp`)
//!
//! Each record of the archive is re-expressed as a directory of plain files
//! plus a `.metadata` document, so game content can be diffed and edited
//! outside the binary blob.
//!
//! # Format Overview
//!
//! An archive is a flat sequence of records. Every record starts with a
//! 16-byte header:
//! - Bytes 0-3: Record tag (e.g. `SCPT`)
//! - Bytes 4-7: Size of the subrecord stream that follows
//! - Bytes 8-11: Reserved word (carried through as `unknown`)
//! - Bytes 12-15: Flags
//!
//! The subrecord stream is a sequence of 8-byte subrecord headers
//! (tag + payload size) each followed by its payload. All integers are
//! little-endian.
//!
//! # Pipeline
//!
//! [`Dispatcher`] pulls records from any [`std::io::Read`], routes each one to
//! the [`RecordHandler`] registered for its tag in a [`HandlerRegistry`], and
//! delivers subrecords one at a time. Handlers write through the helpers in
//! [`output`] and register every directory they create with a [`LockWriter`].

pub mod cursor;
pub mod dispatch;
pub mod handler;
pub mod lock;
pub mod output;
pub mod script;
pub mod tag;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

pub use cursor::Cursor;
pub use dispatch::{Dispatcher, OnError, RecordFailure, RecordHeader, Report, Subrecord};
pub use handler::{HandlerEnv, HandlerFactory, HandlerRegistry, RecordHandler, SkipHandler};
pub use lock::{LockEntry, LockFile, LockWriter, MemoryLock};
pub use output::{Metadata, MetadataFormat, RecordDir};
pub use script::{ScriptFactory, ScriptHandler};
pub use tag::Tag;

/// Size of a record header in bytes
pub const RECORD_HEADER_SIZE: usize = 16;

/// Size of a subrecord header in bytes
pub const SUBRECORD_HEADER_SIZE: usize = 8;

/// Name of the metadata document written into every record directory
pub const METADATA_FILE: &str = ".metadata";

/// Marker left in a record directory whose conversion failed
pub const INCOMPLETE_FILE: &str = ".incomplete";

/// Errors from archive decoding and output emission
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Truncated input at offset {offset:#x}: need {need} bytes, have {have}")]
    TruncatedInput { offset: u64, need: usize, have: usize },

    #[error("Unexpected subrecord order in {record} record: {reason}")]
    UnexpectedSubrecordOrder {
        record: Tag,
        found: Option<Tag>,
        reason: &'static str,
    },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("{context}: {message}")]
    Malformed {
        context: &'static str,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse error category used when reporting failed records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Truncated,
    Order,
    Io,
    Malformed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TruncatedInput { .. } => ErrorKind::Truncated,
            Error::UnexpectedSubrecordOrder { .. } => ErrorKind::Order,
            Error::Io { .. } | Error::Stream(_) => ErrorKind::Io,
            Error::Malformed { .. } | Error::Json(_) | Error::Yaml(_) => ErrorKind::Malformed,
        }
    }

    /// Attach a filesystem path to an I/O error
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Truncated => "truncated input",
            ErrorKind::Order => "subrecord order",
            ErrorKind::Io => "i/o failure",
            ErrorKind::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
