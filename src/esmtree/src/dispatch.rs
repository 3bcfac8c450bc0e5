//! Top-level archive scan
//!
//! The [`Dispatcher`] pulls record headers from a byte stream, routes each
//! record to the handler registered for its tag and feeds it subrecords one
//! at a time. Only the current subrecord's payload is ever buffered.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};

use crate::cursor::Cursor;
use crate::handler::{HandlerEnv, HandlerRegistry, RecordHandler, SkipHandler};
use crate::lock::LockWriter;
use crate::tag::Tag;
use crate::{Error, Result, RECORD_HEADER_SIZE, SUBRECORD_HEADER_SIZE};

/// Decoded 16-byte record header plus its archive position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: Tag,
    /// Byte length of the subrecord stream
    pub size: u32,
    /// Reserved word, carried through unchanged
    pub unknown: u32,
    pub flags: u32,
    /// Zero-based record number in the archive
    pub index: u64,
    /// Absolute offset of the header's first byte
    pub offset: u64,
}

impl RecordHeader {
    /// Parse the fixed header: tag, size, reserved word, flags
    pub fn parse(bytes: &[u8], index: u64, offset: u64) -> Result<Self> {
        let mut cursor = Cursor::with_base(bytes, offset);
        Ok(Self {
            tag: cursor.read_tag()?,
            size: cursor.read_u32_le()?,
            unknown: cursor.read_u32_le()?,
            flags: cursor.read_u32_le()?,
            index,
            offset,
        })
    }
}

/// One tagged chunk of a record, valid only for the callback receiving it
#[derive(Debug)]
pub struct Subrecord<'a> {
    pub tag: Tag,
    /// Absolute offset of the payload's first byte
    pub offset: u64,
    pub payload: Cursor<'a>,
}

impl<'a> Subrecord<'a> {
    pub fn new(tag: Tag, payload: &'a [u8], offset: u64) -> Self {
        Self {
            tag,
            offset,
            payload: Cursor::with_base(payload, offset),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.len() == 0
    }
}

/// What the driver wants after a record fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Record the failure and move on to the next record
    #[default]
    Continue,
    /// Stop at the first failed record
    Abort,
}

/// A record whose conversion failed
#[derive(Debug)]
pub struct RecordFailure {
    pub index: u64,
    pub offset: u64,
    pub tag: Tag,
    /// Record identity, if its header subrecord was reached
    pub identity: Option<String>,
    pub error: Error,
}

impl std::fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record #{} ({}) at {:#x}", self.index, self.tag, self.offset)?;
        if let Some(id) = &self.identity {
            write!(f, " [{}]", id)?;
        }
        write!(f, ": {}: {}", self.error.kind(), self.error)
    }
}

/// Outcome of a dispatcher run
#[derive(Debug, Default)]
pub struct Report {
    /// Records whose header was read
    pub records: u64,
    /// Records routed to a registered handler
    pub handled: u64,
    /// Records routed to the skip handler
    pub skipped: u64,
    /// Handled records that completed without error
    pub converted: u64,
    /// Records seen per tag
    pub counts: BTreeMap<Tag, u64>,
    pub failures: Vec<RecordFailure>,
    /// Stopped early because of [`OnError::Abort`]
    pub aborted: bool,
    /// Stopped early because the archive stream ended mid-record
    pub truncated: bool,
    /// Bytes consumed from the archive
    pub bytes: u64,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Streams archive records to their handlers
pub struct Dispatcher<'r> {
    registry: &'r HandlerRegistry,
    env: HandlerEnv,
    handlers: HashMap<Tag, Box<dyn RecordHandler>>,
    skip: SkipHandler,
    on_error: OnError,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r HandlerRegistry, env: HandlerEnv) -> Self {
        Self {
            registry,
            env,
            handlers: HashMap::new(),
            skip: SkipHandler::default(),
            on_error: OnError::default(),
        }
    }

    pub fn on_error(mut self, policy: OnError) -> Self {
        self.on_error = policy;
        self
    }

    /// Convert every record in `reader`
    pub fn run<R: Read>(&mut self, reader: R, lock: &mut dyn LockWriter) -> Report {
        let mut stream = Stream::new(reader);
        let mut report = Report::default();

        loop {
            let offset = stream.offset;
            let mut raw = [0u8; RECORD_HEADER_SIZE];
            let header = match stream.fill(&mut raw) {
                Ok(0) => break,
                Ok(n) if n < RECORD_HEADER_SIZE => {
                    let error = Error::TruncatedInput {
                        offset,
                        need: RECORD_HEADER_SIZE,
                        have: n,
                    };
                    tracing::warn!(offset, "archive ends inside a record header");
                    report.failures.push(RecordFailure {
                        index: report.records,
                        offset,
                        tag: partial_tag(&raw[..n]),
                        identity: None,
                        error,
                    });
                    report.truncated = true;
                    break;
                }
                Ok(_) => match RecordHeader::parse(&raw, report.records, offset) {
                    Ok(header) => header,
                    Err(error) => {
                        report.failures.push(RecordFailure {
                            index: report.records,
                            offset,
                            tag: partial_tag(&raw),
                            identity: None,
                            error,
                        });
                        break;
                    }
                },
                Err(error) => {
                    report.failures.push(RecordFailure {
                        index: report.records,
                        offset,
                        tag: Tag::from_code(0),
                        identity: None,
                        error: Error::Stream(error),
                    });
                    report.truncated = true;
                    break;
                }
            };

            report.records += 1;
            *report.counts.entry(header.tag).or_default() += 1;

            let registry = self.registry;
            let registered = registry.contains(header.tag);
            let handler: &mut dyn RecordHandler = match registry.get(header.tag) {
                Some(factory) => {
                    report.handled += 1;
                    let env = &self.env;
                    self.handlers
                        .entry(header.tag)
                        .or_insert_with(|| factory.create(env))
                        .as_mut()
                }
                None => {
                    report.skipped += 1;
                    &mut self.skip
                }
            };

            tracing::debug!(
                tag = %header.tag,
                index = header.index,
                offset = format_args!("{:#x}", header.offset),
                size = header.size,
                "dispatching record"
            );

            let mut remaining = u64::from(header.size);
            let result = feed(handler, &mut stream, &header, &mut remaining, lock);
            if result.is_ok() && registered {
                report.converted += 1;
            }
            if let Err(error) = result {
                let identity = handler.identity().map(str::to_string);
                handler.abort(&error);
                tracing::warn!(
                    tag = %header.tag,
                    index = header.index,
                    identity = identity.as_deref().unwrap_or("-"),
                    kind = %error.kind(),
                    "record failed: {}",
                    error
                );
                report.failures.push(RecordFailure {
                    index: header.index,
                    offset: header.offset,
                    tag: header.tag,
                    identity,
                    error,
                });

                if !stream.ended && !stream.skip(remaining) {
                    report.truncated = true;
                }
                if stream.ended {
                    report.truncated = true;
                    break;
                }
                if self.on_error == OnError::Abort {
                    report.aborted = true;
                    break;
                }
            }
        }

        report.bytes = stream.offset;
        self.close(&mut report);
        report
    }

    /// Explicit shutdown of every handler that still holds a session
    fn close(&mut self, report: &mut Report) {
        let mut handlers: Vec<_> = self.handlers.iter_mut().collect();
        handlers.sort_by_key(|(tag, _)| tag.to_string());

        for (tag, handler) in handlers {
            let identity = handler.identity().map(str::to_string);
            if let Err(error) = handler.close() {
                tracing::warn!(%tag, "closing handler failed: {}", error);
                handler.abort(&error);
                report.failures.push(RecordFailure {
                    index: report.records.saturating_sub(1),
                    offset: report.bytes,
                    tag: *tag,
                    identity,
                    error,
                });
            }
        }
    }
}

/// Deliver one record's subrecords, then end it
fn feed<R: Read>(
    handler: &mut dyn RecordHandler,
    stream: &mut Stream<R>,
    header: &RecordHeader,
    remaining: &mut u64,
    lock: &mut dyn LockWriter,
) -> Result<()> {
    handler.begin(header)?;

    let mut payload = Vec::new();
    while *remaining > 0 {
        let offset = stream.offset;
        if *remaining < SUBRECORD_HEADER_SIZE as u64 {
            return Err(Error::TruncatedInput {
                offset,
                need: SUBRECORD_HEADER_SIZE,
                have: *remaining as usize,
            });
        }

        let mut raw = [0u8; SUBRECORD_HEADER_SIZE];
        stream.read_exact(&mut raw, remaining)?;
        let mut cursor = Cursor::with_base(&raw, offset);
        let tag = cursor.read_tag()?;
        let size = cursor.read_u32_le()? as usize;

        if size as u64 > *remaining {
            return Err(Error::TruncatedInput {
                offset: stream.offset,
                need: size,
                have: *remaining as usize,
            });
        }

        let payload_offset = stream.offset;
        stream.read_payload(&mut payload, size, remaining)?;

        tracing::trace!(record = %header.tag, %tag, size, "subrecord");
        handler.subrecord(Subrecord::new(tag, &payload, payload_offset), lock)?;
    }

    handler.end()
}

/// Best-effort tag for a header that could not be fully read
fn partial_tag(bytes: &[u8]) -> Tag {
    let mut tag = [0u8; 4];
    let n = bytes.len().min(4);
    tag[..n].copy_from_slice(&bytes[..n]);
    Tag::new(tag)
}

/// Archive reader that tracks its offset and whether it ran dry
struct Stream<R> {
    inner: R,
    offset: u64,
    ended: bool,
}

impl<R: Read> Stream<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            ended: false,
        }
    }

    /// Read until `buf` is full or the stream ends; returns bytes read
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.ended = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.ended = true;
                    return Err(e);
                }
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    /// Fill `buf` completely from the current record's remaining bytes
    fn read_exact(&mut self, buf: &mut [u8], remaining: &mut u64) -> Result<()> {
        let offset = self.offset;
        let n = self.fill(buf)?;
        *remaining -= n as u64;
        if n < buf.len() {
            return Err(Error::TruncatedInput {
                offset,
                need: buf.len(),
                have: n,
            });
        }
        Ok(())
    }

    /// Read a `size`-byte payload into `buf`, growing it only as bytes arrive
    fn read_payload(&mut self, buf: &mut Vec<u8>, size: usize, remaining: &mut u64) -> Result<()> {
        let offset = self.offset;
        buf.clear();
        let n = match (&mut self.inner).take(size as u64).read_to_end(buf) {
            Ok(n) => n,
            Err(e) => {
                self.ended = true;
                return Err(Error::Stream(e));
            }
        };
        self.offset += n as u64;
        *remaining -= n as u64;
        if n < size {
            self.ended = true;
            return Err(Error::TruncatedInput {
                offset,
                need: size,
                have: n,
            });
        }
        Ok(())
    }

    /// Discard the rest of a failed record; false if the stream ran out
    fn skip(&mut self, n: u64) -> bool {
        match io::copy(&mut (&mut self.inner).take(n), &mut io::sink()) {
            Ok(copied) => {
                self.offset += copied;
                if copied < n {
                    self.ended = true;
                }
                copied == n
            }
            Err(_) => {
                self.ended = true;
                false
            }
        }
    }
}
