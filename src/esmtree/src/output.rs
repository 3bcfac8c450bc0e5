//! Output tree emission
//!
//! Every record gets its own directory. Content files are opened, written and
//! closed inside a single helper call. The metadata document is assembled in
//! memory and committed with a temp-file rename, so a `.metadata` on disk is
//! always complete.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, INCOMPLETE_FILE, METADATA_FILE};

/// On-disk syntax of the metadata document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    #[default]
    Json,
    Yaml,
}

impl MetadataFormat {
    /// Serialize an ordered field map
    pub fn render(self, fields: &Map<String, Value>) -> Result<Vec<u8>> {
        match self {
            MetadataFormat::Json => {
                let mut out = serde_json::to_vec_pretty(fields)?;
                out.push(b'\n');
                Ok(out)
            }
            MetadataFormat::Yaml => Ok(serde_yaml::to_string(fields)?.into_bytes()),
        }
    }

    /// Parse a document previously produced by [`MetadataFormat::render`]
    pub fn parse(self, data: &[u8]) -> Result<Map<String, Value>> {
        let value: Value = match self {
            MetadataFormat::Json => serde_json::from_slice(data)?,
            MetadataFormat::Yaml => serde_yaml::from_slice(data)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(Error::Malformed {
                context: "metadata",
                message: format!("expected an object, found {}", other),
            }),
        }
    }
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataFormat::Json => f.write_str("json"),
            MetadataFormat::Yaml => f.write_str("yaml"),
        }
    }
}

impl FromStr for MetadataFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MetadataFormat::Json),
            "yaml" | "yml" => Ok(MetadataFormat::Yaml),
            other => Err(Error::Malformed {
                context: "metadata format",
                message: format!("unknown format {:?} (expected json or yaml)", other),
            }),
        }
    }
}

/// Ordered scalar fields of one record's metadata document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: Map<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string field. Re-setting a key keeps its original position.
    pub fn string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn number(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.fields.insert(key.into(), Value::from(value));
        self
    }

    pub fn boolean(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.fields.insert(key.into(), Value::Bool(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write `.metadata` into `dir` atomically
    pub fn commit(&self, dir: &Path, format: MetadataFormat) -> Result<PathBuf> {
        let rendered = format.render(&self.fields)?;
        let target = dir.join(METADATA_FILE);
        let staging = dir.join(format!("{}.tmp", METADATA_FILE));

        if let Err(e) = write_file(&staging, |w| w.write_all(&rendered)) {
            discard_staging(&staging);
            return Err(e);
        }
        fs::rename(&staging, &target).map_err(|e| {
            discard_staging(&staging);
            Error::io(&target, e)
        })?;

        Ok(target)
    }

    /// Load the `.metadata` document from a record directory
    pub fn load(dir: &Path, format: MetadataFormat) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let data = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            fields: format.parse(&data)?,
        })
    }
}

/// Directory owned by a single record
#[derive(Debug, Clone)]
pub struct RecordDir {
    path: PathBuf,
}

impl RecordDir {
    /// Create (or reuse) `base/<id>`, clearing metadata and the incomplete
    /// marker left by an earlier run
    pub fn create(base: &Path, id: &str) -> Result<Self> {
        let dir = Self::at(base.join(sanitize_component(id)?))?;
        dir.remove(&[METADATA_FILE, INCOMPLETE_FILE])?;
        Ok(dir)
    }

    fn at(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self { path })
    }

    /// Delete the named files if present
    pub fn remove(&self, names: &[&str]) -> Result<()> {
        for name in names {
            let file = self.path.join(name);
            match fs::remove_file(&file) {
                Ok(()) => tracing::trace!(path = %file.display(), "removed stale file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&file, e)),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy a byte stream into `name` unchanged
    pub fn write_binary(&self, name: &str, mut reader: impl Read) -> Result<u64> {
        let mut copied = 0;
        write_file(&self.path.join(name), |w| {
            copied = std::io::copy(&mut reader, w)?;
            Ok(())
        })?;
        Ok(copied)
    }

    /// Write `bytes` as lowercase hex text, two characters per byte
    pub fn write_hex(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let encoded = hex::encode(bytes);
        write_file(&self.path.join(name), |w| w.write_all(encoded.as_bytes()))
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<()> {
        write_file(&self.path.join(name), |w| w.write_all(text.as_bytes()))
    }

    /// Flag this directory as holding a failed conversion
    pub fn mark_incomplete(&self, reason: &str) -> Result<()> {
        write_file(&self.path.join(INCOMPLETE_FILE), |w| {
            writeln!(w, "{}", reason)
        })
    }
}

/// Whether a record directory carries an incomplete marker
pub fn is_incomplete(dir: &Path) -> bool {
    dir.join(INCOMPLETE_FILE).exists()
}

/// Turn a record identity into a single safe path component
///
/// Reserved and control characters plus `%` itself become `%XX`
/// escapes of their UTF-8 bytes, so distinct identities never share a name.
pub fn sanitize_component(id: &str) -> Result<String> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(Error::Malformed {
            context: "record identity",
            message: format!("{:?} cannot name a directory", id),
        });
    }

    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => escape(&mut out, c),
            c if c.is_control() => escape(&mut out, c),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn escape(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for b in c.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{:02X}", b));
    }
}

/// Record directories handed out during one conversion
///
/// Identities that differ only in case would share a directory on
/// case-insensitive filesystems, so claims are compared case-folded.
#[derive(Debug, Default)]
pub struct DirClaims {
    owners: HashMap<String, String>,
}

impl DirClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `base/<id>` unless another identity already owns that directory
    ///
    /// Claiming the same identity again reuses the directory.
    pub fn claim(&mut self, base: &Path, id: &str) -> Result<RecordDir> {
        let component = sanitize_component(id)?;
        let key = component.to_lowercase();

        if let Some(owner) = self.owners.get(&key) {
            if owner != id {
                return Err(Error::Malformed {
                    context: "record identity",
                    message: format!("{:?} maps to the directory already used by {:?}", id, owner),
                });
            }
        }

        let dir = RecordDir::create(base, id)?;
        self.owners.insert(key, id.to_string());
        Ok(dir)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

fn discard_staging(staging: &Path) {
    match fs::remove_file(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %staging.display(), "could not remove staging file: {}", e),
    }
}

/// Open `path`, run `body` against a buffered writer, flush and close
fn write_file<F>(path: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)
        .and_then(|()| writer.flush())
        .map_err(|e| Error::io(path, e))
}
