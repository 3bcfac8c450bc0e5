//! Record handler contract and the tag-keyed factory registry
//!
//! A handler sees one record at a time through `begin`, zero or more
//! `subrecord` calls and a final `end` (or `abort` when the record fails).
//! Handlers are created lazily by the [`HandlerFactory`] registered for their
//! record tag and reused for every later record of that tag.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::dispatch::{RecordHeader, Subrecord};
use crate::lock::LockWriter;
use crate::output::MetadataFormat;
use crate::script::ScriptFactory;
use crate::tag::Tag;
use crate::{Error, Result};

/// Consumer of one record type's subrecord stream
pub trait RecordHandler {
    /// Start a new record session
    fn begin(&mut self, header: &RecordHeader) -> Result<()>;

    /// Handle one subrecord; the payload borrow ends with the call
    fn subrecord(&mut self, subrecord: Subrecord<'_>, lock: &mut dyn LockWriter) -> Result<()>;

    /// Finish the current record and commit its output
    fn end(&mut self) -> Result<()>;

    /// Drop the current record after a failure without committing it
    fn abort(&mut self, error: &Error);

    /// Whether a record session is currently open
    fn is_open(&self) -> bool;

    /// Identity of the open record, once its header has been seen
    fn identity(&self) -> Option<&str> {
        None
    }

    /// Shutdown: ends a still-open session, otherwise does nothing
    fn close(&mut self) -> Result<()> {
        if self.is_open() {
            self.end()
        } else {
            Ok(())
        }
    }
}

/// Everything a factory needs to build a handler
#[derive(Debug, Clone)]
pub struct HandlerEnv {
    /// Root of the output tree
    pub output: PathBuf,
    /// Syntax used for `.metadata` documents
    pub format: MetadataFormat,
}

impl HandlerEnv {
    pub fn new(output: impl Into<PathBuf>, format: MetadataFormat) -> Self {
        Self {
            output: output.into(),
            format,
        }
    }
}

/// Builds the handler for one record tag
pub trait HandlerFactory {
    fn tag(&self) -> Tag;

    fn create(&self, env: &HandlerEnv) -> Box<dyn RecordHandler>;
}

/// Record tag → handler factory
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<Tag, Box<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    /// An empty registry: every record is skipped
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ScriptFactory);
        registry
    }

    /// Register a factory, returning the one it replaced
    pub fn register<F>(&mut self, factory: F) -> Option<Box<dyn HandlerFactory>>
    where
        F: HandlerFactory + 'static,
    {
        self.factories.insert(factory.tag(), Box::new(factory))
    }

    pub fn get(&self, tag: Tag) -> Option<&dyn HandlerFactory> {
        self.factories.get(&tag).map(|f| f.as_ref())
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.factories.contains_key(&tag)
    }

    /// Registered tags, sorted by printable form
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.factories.keys().copied().collect();
        tags.sort_by_key(|t| t.to_string());
        tags
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Handler for record types nobody registered; consumes and ignores them
#[derive(Debug, Default)]
pub struct SkipHandler {
    open: bool,
    subrecords: u64,
}

impl SkipHandler {
    /// Subrecords ignored so far, across all records
    pub fn subrecords(&self) -> u64 {
        self.subrecords
    }
}

impl RecordHandler for SkipHandler {
    fn begin(&mut self, header: &RecordHeader) -> Result<()> {
        tracing::trace!(tag = %header.tag, index = header.index, "skipping record");
        self.open = true;
        Ok(())
    }

    fn subrecord(&mut self, _subrecord: Subrecord<'_>, _lock: &mut dyn LockWriter) -> Result<()> {
        self.subrecords += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn abort(&mut self, _error: &Error) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
