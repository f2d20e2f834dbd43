/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Compressed shared log archives.
//!
//! An archive is a shared log, header included, compressed with zstd. It is
//! read sequentially for offline analysis and replay; nothing here is on the
//! latency path.

use crate::clock::Clock;
use crate::descriptor::{Descriptor, StreamOptions};
use crate::error::StreamError;
use crate::shm::layout::{
    HEADER_SIZE, LOG_MAGIC, MAX_RECORD_SIZE, read_u64, record_header_len, record_span,
};
use crate::source::{Record, Source, Timestamp, WITHDRAWN, select};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Compression level used by [`compress_log`] when none is given.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Header fields of a log, as read from a byte copy of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderFields {
    magic: u64,
    record_size: u64,
    write_offset: u64,
}

impl HeaderFields {
    fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            magic: read_u64(bytes, 0)?,
            record_size: read_u64(bytes, 8)?,
            write_offset: read_u64(bytes, 16)?,
        })
    }

    fn validate(self, path: &Path) -> Result<Self, StreamError> {
        if self.magic != LOG_MAGIC {
            return Err(StreamError::BadMagic {
                path: path.to_path_buf(),
                found: self.magic,
                expected: LOG_MAGIC,
            });
        }
        if self.write_offset < HEADER_SIZE as u64 {
            return Err(StreamError::Truncated {
                path: path.to_path_buf(),
                what: "write offset inside header",
            });
        }
        Ok(self)
    }
}

fn read_header(reader: &mut impl Read, path: &Path) -> Result<HeaderFields, StreamError> {
    let mut header = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StreamError::Truncated {
            path: path.to_path_buf(),
            what: "header",
        },
        _ => StreamError::io(path.display().to_string(), e),
    })?;
    HeaderFields::parse(&header)
        .ok_or_else(|| StreamError::Truncated {
            path: path.to_path_buf(),
            what: "header",
        })?
        .validate(path)
}

/// Compresses the published part of the shared log at `src` into `dst`.
///
/// Only bytes below the header's write offset are archived. Returns the
/// number of uncompressed bytes written.
pub fn compress_log(src: &Path, dst: &Path, level: i32) -> Result<u64, StreamError> {
    let src_target = src.display().to_string();
    let dst_target = dst.display().to_string();
    let mut input = File::open(src).map_err(|e| StreamError::io(&src_target, e))?;
    let fields = read_header(&mut input, src)?;

    let input = File::open(src).map_err(|e| StreamError::io(&src_target, e))?;
    let output = File::create(dst).map_err(|e| StreamError::io(&dst_target, e))?;
    zstd::stream::copy_encode(input.take(fields.write_offset), output, level)
        .map_err(|e| StreamError::io(&dst_target, e))?;
    info!(
        src = %src_target,
        dst = %dst_target,
        bytes = fields.write_offset,
        "archived shared log"
    );
    Ok(fields.write_offset)
}

/// Sequential reader over a compressed shared log.
pub struct ArchiveReader<C: Clock> {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
    record_size: u64,
    remaining: u64,
    pending: Option<Timestamp>,
    pending_payload: Vec<u8>,
    current: Vec<u8>,
    done: bool,
    timed: bool,
    clock: C,
    path: PathBuf,
    description: String,
}

impl<C: Clock> ArchiveReader<C> {
    /// Opens the archive named by an `archive:` descriptor.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let path = Path::new(&descriptor.path);
        let target = path.display().to_string();
        let file = File::open(path).map_err(|e| StreamError::io(&target, e))?;
        let mut decoder =
            zstd::stream::read::Decoder::new(file).map_err(|e| StreamError::io(&target, e))?;
        let fields = read_header(&mut decoder, path)?;
        if let Some(requested) = descriptor.record_size {
            if requested != fields.record_size {
                return Err(StreamError::RecordSizeMismatch {
                    path: path.to_path_buf(),
                    requested,
                    actual: fields.record_size,
                });
            }
        }
        info!(
            path = %target,
            record_size = fields.record_size,
            bytes = fields.write_offset,
            "opened archive"
        );
        Ok(Self {
            decoder,
            record_size: fields.record_size,
            remaining: fields.write_offset - HEADER_SIZE as u64,
            pending: None,
            pending_payload: Vec::new(),
            current: Vec::new(),
            done: false,
            timed: descriptor.options.contains(StreamOptions::TIMED),
            clock,
            path: path.to_path_buf(),
            description: descriptor.to_string(),
        })
    }

    /// Fixed record size, or 0 for variable-size logs.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    /// Skips records with a timestamp strictly below `stop_ts`.
    pub fn fast_forward(&mut self, stop_ts: Timestamp) -> usize {
        let mut skipped = 0;
        while let Some(ts) = self.peek() {
            if ts >= stop_ts {
                break;
            }
            self.pending = None;
            skipped += 1;
        }
        debug!(archive = %self.description, stop_ts, skipped, "fast forwarded archive");
        skipped
    }

    /// Timestamp of the next record, decompressing it if needed.
    fn peek(&mut self) -> Option<Timestamp> {
        if self.pending.is_none() && !self.done {
            match self.fetch() {
                Ok(ts) => self.pending = ts,
                Err(e) => {
                    warn!(archive = %self.path.display(), error = %e, "archive read failed");
                    self.done = true;
                }
            }
        }
        self.pending
    }

    fn fetch(&mut self) -> io::Result<Option<Timestamp>> {
        if self.remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        let mut word = [0u8; 8];
        self.decoder.read_exact(&mut word)?;
        let ts = u64::from_ne_bytes(word);
        let len = if self.record_size == 0 {
            self.decoder.read_exact(&mut word)?;
            u64::from_ne_bytes(word) as usize
        } else {
            self.record_size as usize
        };
        if len > MAX_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {len} exceeds {MAX_RECORD_SIZE}"),
            ));
        }
        let span = record_span(self.record_size, len);
        if span as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record of {span} bytes overruns the archive"),
            ));
        }
        self.pending_payload.resize(len, 0);
        self.decoder.read_exact(&mut self.pending_payload)?;
        let padding = (span - record_header_len(self.record_size) - len) as u64;
        io::copy(&mut (&mut self.decoder).take(padding), &mut io::sink())?;
        self.remaining -= span as u64;
        Ok(Some(ts))
    }
}

impl<C: Clock> Source for ArchiveReader<C> {
    fn attest(&mut self, next_ts: &mut Timestamp) {
        let current = *next_ts;
        let value = match self.peek() {
            Some(ts) => ts,
            None => self.clock.now(),
        };
        *next_ts = select(current == WITHDRAWN, current, value);
    }

    fn read(&mut self) -> Option<Record<'_>> {
        let ts = self.peek()?;
        self.pending = None;
        std::mem::swap(&mut self.current, &mut self.pending_payload);
        if self.timed && self.clock.can_set() {
            self.clock.set(ts);
        }
        Some(Record::new(ts, &self.current))
    }

    fn describe(&self) -> &str {
        &self.description
    }
}
