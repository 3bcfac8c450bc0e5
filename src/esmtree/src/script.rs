//! Script records (`SCPT`)
//!
//! Each script becomes `scripts/<id>/` holding:
//! - `.metadata`: id, record flags and the five `SCHD` counters
//! - `script.var`: raw `SCVR` variable names
//! - `script.hex`: `SCDT` compiled bytecode as lowercase hex
//! - `script.src`: `SCTX` source text
//!
//! `SCHD` must be the first subrecord. Any other subrecord tag is stored as a
//! text field in the metadata, and `DELE` sets `deleted: true`.

use std::collections::HashSet;
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::cursor::Cursor;
use crate::dispatch::{RecordHeader, Subrecord};
use crate::handler::{HandlerEnv, HandlerFactory, RecordHandler};
use crate::lock::{record_fields, LockWriter};
use crate::output::{DirClaims, Metadata, MetadataFormat, RecordDir};
use crate::tag::{self, Tag};
use crate::{Error, Result};

/// Directory under the output root holding all scripts
pub const SCRIPTS_DIR: &str = "scripts";
pub const VARIABLES_FILE: &str = "script.var";
pub const BYTECODE_FILE: &str = "script.hex";
pub const SOURCE_FILE: &str = "script.src";

/// Content files a script directory may hold from an earlier run
const CONTENT_FILES: [&str; 3] = [VARIABLES_FILE, BYTECODE_FILE, SOURCE_FILE];

/// Width of the NUL-padded name at the start of `SCHD`
pub const NAME_SIZE: usize = 32;

/// Decoded `SCHD` subrecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHeader {
    pub id: String,
    pub shorts: i32,
    pub longs: i32,
    pub floats: i32,
    /// Size of the compiled bytecode
    pub data: i32,
    /// Size of the local variable name table
    pub table: i32,
}

impl ScriptHeader {
    pub fn parse(cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            id: cursor.read_fixed_name(NAME_SIZE)?,
            shorts: cursor.read_i32_le()?,
            longs: cursor.read_i32_le()?,
            floats: cursor.read_i32_le()?,
            data: cursor.read_i32_le()?,
            table: cursor.read_i32_le()?,
        })
    }

    /// Encode back into the on-disk `SCHD` layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.id.as_bytes().to_vec();
        out.resize(NAME_SIZE, 0);
        for value in [self.shorts, self.longs, self.floats, self.data, self.table] {
            // Writing into a Vec cannot fail
            let _ = out.write_i32::<LittleEndian>(value);
        }
        out
    }

    fn write_counters(&self, doc: &mut Metadata) {
        doc.number("shorts", i64::from(self.shorts))
            .number("longs", i64::from(self.longs))
            .number("floats", i64::from(self.floats))
            .number("data", i64::from(self.data))
            .number("table", i64::from(self.table));
    }
}

/// Registers [`ScriptHandler`] for `SCPT`
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFactory;

impl HandlerFactory for ScriptFactory {
    fn tag(&self) -> Tag {
        tag::SCPT
    }

    fn create(&self, env: &HandlerEnv) -> Box<dyn RecordHandler> {
        Box::new(ScriptHandler::new(env.output.join(SCRIPTS_DIR), env.format))
    }
}

/// Per-record state, replaced wholesale on every `begin`
enum Session {
    AwaitingHeader(RecordHeader),
    Open(OpenScript),
}

struct OpenScript {
    id: String,
    dir: RecordDir,
    metadata: Metadata,
    /// Metadata keys written from generic subrecords
    generic: HashSet<String>,
}

impl OpenScript {
    fn write(&mut self, mut sub: Subrecord<'_>) -> Result<()> {
        match sub.tag {
            tag::SCHD => Err(Error::UnexpectedSubrecordOrder {
                record: tag::SCPT,
                found: Some(sub.tag),
                reason: "duplicate SCHD header",
            }),
            tag::SCVR => {
                self.dir
                    .write_binary(VARIABLES_FILE, sub.payload.as_byte_stream())?;
                Ok(())
            }
            tag::SCDT => self
                .dir
                .write_hex(BYTECODE_FILE, sub.payload.read_remaining_bytes()),
            tag::SCTX => self
                .dir
                .write_text(SOURCE_FILE, &sub.payload.read_remaining_text()),
            tag::DELE => {
                self.metadata.boolean("deleted", true);
                Ok(())
            }
            other => {
                let key = self.generic_key(other);
                self.metadata
                    .string(key.clone(), sub.payload.read_remaining_text());
                self.generic.insert(key);
                Ok(())
            }
        }
    }

    /// Field name for a generic subrecord
    ///
    /// A tag that repeats replaces its earlier value. A tag that spells a field
    /// the handler itself wrote is prefixed with `_` until the name is free.
    fn generic_key(&self, tag: Tag) -> String {
        let mut key = tag.to_string();
        while self.metadata.get(&key).is_some() && !self.generic.contains(&key) {
            key.insert(0, '_');
        }
        key
    }
}

/// Emits one directory per script record
pub struct ScriptHandler {
    base: PathBuf,
    format: MetadataFormat,
    claims: DirClaims,
    session: Option<Session>,
}

impl ScriptHandler {
    pub fn new(base: impl Into<PathBuf>, format: MetadataFormat) -> Self {
        Self {
            base: base.into(),
            format,
            claims: DirClaims::new(),
            session: None,
        }
    }

    /// Handle `SCHD`: create the directory, register it and start the metadata
    fn open(
        &mut self,
        header: &RecordHeader,
        sub: &mut Subrecord<'_>,
        lock: &mut dyn LockWriter,
    ) -> Result<OpenScript> {
        let script = ScriptHeader::parse(&mut sub.payload)?;
        let dir = self.claims.claim(&self.base, &script.id)?;
        dir.remove(&CONTENT_FILES)?;

        if let Err(e) = lock.record_directory(dir.path()) {
            mark_incomplete(&script.id, &dir, &e);
            return Err(e);
        }

        let mut metadata = Metadata::new();
        metadata.string("id", script.id.as_str());
        record_fields(&mut metadata, header);
        script.write_counters(&mut metadata);

        tracing::debug!(id = %script.id, dir = %dir.path().display(), "script opened");

        Ok(OpenScript {
            id: script.id,
            dir,
            metadata,
            generic: HashSet::new(),
        })
    }

    fn finish(&self, script: OpenScript) -> Result<()> {
        if let Err(e) = script.metadata.commit(script.dir.path(), self.format) {
            mark_incomplete(&script.id, &script.dir, &e);
            return Err(e);
        }
        tracing::debug!(id = %script.id, "script written");
        Ok(())
    }
}

impl RecordHandler for ScriptHandler {
    fn begin(&mut self, header: &RecordHeader) -> Result<()> {
        if let Some(Session::Open(previous)) = self.session.take() {
            self.finish(previous)?;
        }
        self.session = Some(Session::AwaitingHeader(*header));
        Ok(())
    }

    fn subrecord(&mut self, mut sub: Subrecord<'_>, lock: &mut dyn LockWriter) -> Result<()> {
        match self.session.as_mut() {
            None => Err(Error::UnexpectedSubrecordOrder {
                record: tag::SCPT,
                found: Some(sub.tag),
                reason: "subrecord outside a record",
            }),
            Some(Session::AwaitingHeader(header)) => {
                if sub.tag != tag::SCHD {
                    return Err(Error::UnexpectedSubrecordOrder {
                        record: tag::SCPT,
                        found: Some(sub.tag),
                        reason: "SCHD header must come first",
                    });
                }
                let header = *header;
                let script = self.open(&header, &mut sub, lock)?;
                self.session = Some(Session::Open(script));
                Ok(())
            }
            Some(Session::Open(script)) => script.write(sub),
        }
    }

    fn end(&mut self) -> Result<()> {
        match self.session.take() {
            Some(Session::Open(script)) => self.finish(script),
            Some(Session::AwaitingHeader(_)) => Err(Error::UnexpectedSubrecordOrder {
                record: tag::SCPT,
                found: None,
                reason: "record ended without SCHD header",
            }),
            None => Err(Error::UnexpectedSubrecordOrder {
                record: tag::SCPT,
                found: None,
                reason: "record end without record begin",
            }),
        }
    }

    fn abort(&mut self, error: &Error) {
        if let Some(Session::Open(script)) = self.session.take() {
            mark_incomplete(&script.id, &script.dir, error);
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn identity(&self) -> Option<&str> {
        match &self.session {
            Some(Session::Open(script)) => Some(&script.id),
            _ => None,
        }
    }
}

fn mark_incomplete(id: &str, dir: &RecordDir, error: &Error) {
    if let Err(e) = dir.mark_incomplete(&error.to_string()) {
        tracing::warn!(%id, "could not mark script incomplete: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLock;
    use crate::output::is_incomplete;
    use crate::testing::schd;
    use crate::{ErrorKind, METADATA_FILE};
    use serde_json::Value;
    use std::fs;
    use std::path::Path;

    fn header(flags: u32, unknown: u32) -> RecordHeader {
        RecordHeader {
            tag: tag::SCPT,
            size: 0,
            unknown,
            flags,
            index: 0,
            offset: 0,
        }
    }

    fn handler(root: &Path) -> ScriptHandler {
        ScriptHandler::new(root.join(SCRIPTS_DIR), MetadataFormat::Json)
    }

    fn feed(
        handler: &mut ScriptHandler,
        lock: &mut MemoryLock,
        subs: &[(Tag, &[u8])],
    ) -> Result<()> {
        handler.begin(&header(0, 0))?;
        for (tag, payload) in subs {
            handler.subrecord(Subrecord::new(*tag, payload, 0), lock)?;
        }
        handler.end()
    }

    fn keys(dir: &Path) -> Vec<String> {
        let doc = Metadata::load(dir, MetadataFormat::Json).unwrap();
        doc.keys().map(str::to_string).collect()
    }

    #[test]
    fn test_header_roundtrip() {
        let original = ScriptHeader {
            id: "TestScript".to_string(),
            shorts: 1,
            longs: -2,
            floats: i32::MAX,
            data: 10,
            table: i32::MIN,
        };
        let bytes = original.to_bytes();
        assert_eq!(bytes.len(), NAME_SIZE + 20);

        let parsed = ScriptHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_truncated_header() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();

        let payload = schd("Short", [1, 2, 3, 4, 5]);
        let err = feed(&mut handler, &mut lock, &[(tag::SCHD, &payload[..40])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
        assert!(!temp.path().join(SCRIPTS_DIR).join("Short").exists());
        assert!(lock.directories.is_empty());
    }

    #[test]
    fn test_content_before_header() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();

        let err = feed(&mut handler, &mut lock, &[(tag::SCVR, b"vars")]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedSubrecordOrder {
                found: Some(tag::SCVR),
                ..
            }
        ));
        assert!(!temp.path().join(SCRIPTS_DIR).exists());
    }

    #[test]
    fn test_zero_subrecords() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();

        let err = feed(&mut handler, &mut lock, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert!(!handler.is_open());
        assert!(!temp.path().join(SCRIPTS_DIR).exists());
    }

    #[test]
    fn test_duplicate_header() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Twice", [0; 5]);

        let err = feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &payload), (tag::SCHD, &payload)],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert_eq!(handler.identity(), Some("Twice"));

        handler.abort(&err);
        let dir = temp.path().join(SCRIPTS_DIR).join("Twice");
        assert!(is_incomplete(&dir));
        assert!(!dir.join(METADATA_FILE).exists());
        assert_eq!(handler.identity(), None);
    }

    #[test]
    fn test_generic_fields_follow_header_fields() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Generic", [0; 5]);

        feed(
            &mut handler,
            &mut lock,
            &[
                (tag::SCHD, &payload),
                ("ZZZZ".parse().unwrap(), b"first"),
                (tag::DELE, &[0, 0, 0, 0]),
                ("YYYY".parse().unwrap(), b"second"),
            ],
        )
        .unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Generic");
        assert_eq!(
            keys(&dir),
            vec!["id", "shorts", "longs", "floats", "data", "table", "ZZZZ", "deleted", "YYYY"]
        );
        let doc = Metadata::load(&dir, MetadataFormat::Json).unwrap();
        assert_eq!(doc.get("ZZZZ"), Some(&Value::from("first")));
        assert_eq!(doc.get("YYYY"), Some(&Value::from("second")));
    }

    #[test]
    fn test_flag_fields_between_id_and_counters() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Flagged", [3; 5]);

        handler.begin(&header(0x2000, 4)).unwrap();
        handler
            .subrecord(Subrecord::new(tag::SCHD, &payload, 0), &mut lock)
            .unwrap();
        handler.end().unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Flagged");
        assert_eq!(
            keys(&dir),
            vec!["id", "flags", "unknown", "shorts", "longs", "floats", "data", "table"]
        );
    }

    #[test]
    fn test_headerless_end_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();

        // First record succeeds, second never sees a header
        let payload = schd("Kept", [1, 1, 1, 1, 1]);
        feed(&mut handler, &mut lock, &[(tag::SCHD, &payload)]).unwrap();
        let kept = temp.path().join(SCRIPTS_DIR).join("Kept").join(METADATA_FILE);
        let before = fs::read(&kept).unwrap();

        handler.begin(&header(0, 0)).unwrap();
        let err = handler.end().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);

        assert_eq!(fs::read(&kept).unwrap(), before);
        assert_eq!(lock.directories.len(), 1);
        let entries = fs::read_dir(temp.path().join(SCRIPTS_DIR)).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_records_are_isolated() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let first = schd("First", [1, 0, 0, 2, 0]);
        let second = schd("Second", [9, 9, 9, 9, 9]);

        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &first), (tag::SCTX, b"first source")],
        )
        .unwrap();
        let first_dir = temp.path().join(SCRIPTS_DIR).join("First");
        let first_meta = fs::read(first_dir.join(METADATA_FILE)).unwrap();

        feed(
            &mut handler,
            &mut lock,
            &[
                (tag::SCHD, &second),
                (tag::SCTX, b"second source"),
                (tag::SCVR, b"x"),
            ],
        )
        .unwrap();
        let second_dir = temp.path().join(SCRIPTS_DIR).join("Second");

        assert_ne!(first_dir, second_dir);
        assert_eq!(fs::read(first_dir.join(METADATA_FILE)).unwrap(), first_meta);
        assert_eq!(
            fs::read_to_string(first_dir.join(SOURCE_FILE)).unwrap(),
            "first source"
        );
        assert!(!first_dir.join(VARIABLES_FILE).exists());
        assert_eq!(
            fs::read_to_string(second_dir.join(SOURCE_FILE)).unwrap(),
            "second source"
        );
        assert_eq!(lock.directories, vec![first_dir, second_dir]);
    }

    #[test]
    fn test_escaped_identities_stay_apart() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let slash = schd("a/b", [0; 5]);
        let underscore = schd("a_b", [0; 5]);

        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &slash), (tag::SCTX, b"first")],
        )
        .unwrap();
        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &underscore), (tag::SCTX, b"second")],
        )
        .unwrap();

        let scripts = temp.path().join(SCRIPTS_DIR);
        assert_eq!(
            lock.directories,
            vec![scripts.join("a%2Fb"), scripts.join("a_b")]
        );
        assert_eq!(
            fs::read_to_string(scripts.join("a%2Fb").join(SOURCE_FILE)).unwrap(),
            "first"
        );
        assert_eq!(
            fs::read_to_string(scripts.join("a_b").join(SOURCE_FILE)).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_case_folded_identity_fails_second_record() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let first = schd("Guard", [0; 5]);
        let second = schd("guard", [0; 5]);

        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &first), (tag::SCTX, b"first")],
        )
        .unwrap();
        let err = feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &second), (tag::SCTX, b"second")],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        handler.abort(&err);

        let dir = temp.path().join(SCRIPTS_DIR).join("Guard");
        assert_eq!(fs::read_to_string(dir.join(SOURCE_FILE)).unwrap(), "first");
        assert!(dir.join(METADATA_FILE).exists());
        assert!(!is_incomplete(&dir));
        assert_eq!(lock.directories, vec![dir]);
    }

    #[test]
    fn test_same_identity_again_replaces_output() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Twice", [0; 5]);

        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &payload), (tag::SCVR, b"vars")],
        )
        .unwrap();
        feed(
            &mut handler,
            &mut lock,
            &[(tag::SCHD, &payload), (tag::SCTX, b"later")],
        )
        .unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Twice");
        assert!(!dir.join(VARIABLES_FILE).exists());
        assert_eq!(fs::read_to_string(dir.join(SOURCE_FILE)).unwrap(), "later");
    }

    #[test]
    fn test_stale_content_removed_on_reconversion() {
        let temp = tempfile::tempdir().unwrap();
        let payload = schd("Rerun", [0; 5]);

        let mut lock = MemoryLock::default();
        feed(
            &mut handler(temp.path()),
            &mut lock,
            &[
                (tag::SCHD, &payload),
                (tag::SCVR, b"old"),
                (tag::SCDT, &[1, 2]),
                (tag::SCTX, b"old source"),
            ],
        )
        .unwrap();

        // A fresh run, as a second conversion into the same tree would do
        feed(
            &mut handler(temp.path()),
            &mut lock,
            &[(tag::SCHD, &payload), (tag::SCTX, b"new source")],
        )
        .unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Rerun");
        assert!(!dir.join(VARIABLES_FILE).exists());
        assert!(!dir.join(BYTECODE_FILE).exists());
        assert_eq!(
            fs::read_to_string(dir.join(SOURCE_FILE)).unwrap(),
            "new source"
        );
    }

    #[test]
    fn test_generic_tag_cannot_replace_counter() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Clash", [1, 2, 0, 10, 5]);
        let data_tag: Tag = "data".parse().unwrap();

        feed(
            &mut handler,
            &mut lock,
            &[
                (tag::SCHD, &payload),
                (data_tag, b"zz"),
                (data_tag, b"yy"),
            ],
        )
        .unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Clash");
        let doc = Metadata::load(&dir, MetadataFormat::Json).unwrap();
        assert_eq!(doc.get("data"), Some(&Value::from(10)));
        assert_eq!(doc.get("_data"), Some(&Value::from("yy")));
        assert_eq!(
            keys(&dir),
            vec!["id", "shorts", "longs", "floats", "data", "table", "_data"]
        );
    }

    #[test]
    fn test_close_commits_open_session() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = handler(temp.path());
        let mut lock = MemoryLock::default();
        let payload = schd("Dangling", [0; 5]);

        handler.begin(&header(0, 0)).unwrap();
        handler
            .subrecord(Subrecord::new(tag::SCHD, &payload, 0), &mut lock)
            .unwrap();
        assert!(handler.is_open());

        handler.close().unwrap();
        assert!(!handler.is_open());
        assert!(temp
            .path()
            .join(SCRIPTS_DIR)
            .join("Dangling")
            .join(METADATA_FILE)
            .exists());

        // Nothing left to close
        handler.close().unwrap();
    }

    #[test]
    fn test_yaml_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let mut handler = ScriptHandler::new(temp.path().join(SCRIPTS_DIR), MetadataFormat::Yaml);
        let mut lock = MemoryLock::default();
        let payload = schd("Yaml", [1, 2, 0, 10, 5]);

        feed(&mut handler, &mut lock, &[(tag::SCHD, &payload)]).unwrap();

        let dir = temp.path().join(SCRIPTS_DIR).join("Yaml");
        let text = fs::read_to_string(dir.join(METADATA_FILE)).unwrap();
        assert_eq!(
            text,
            "id: Yaml\nshorts: 1\nlongs: 2\nfloats: 0\ndata: 10\ntable: 5\n"
        );
    }

    #[test]
    fn test_factory_places_scripts_under_output() {
        let temp = tempfile::tempdir().unwrap();
        let env = HandlerEnv::new(temp.path(), MetadataFormat::Json);
        let mut handler = ScriptFactory.create(&env);
        let mut lock = MemoryLock::default();
        let payload = schd("FromFactory", [0; 5]);

        handler.begin(&header(0, 0)).unwrap();
        handler
            .subrecord(Subrecord::new(tag::SCHD, &payload, 0), &mut lock)
            .unwrap();
        handler.end().unwrap();

        assert_eq!(
            lock.directories,
            vec![temp.path().join(SCRIPTS_DIR).join("FromFactory")]
        );
    }
}
