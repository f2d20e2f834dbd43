/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Lock-free shared log reader.

use super::layout::{
    DEFAULT_MAPPING_SIZE, HEADER_SIZE, Header, LOG_MAGIC, MAX_RECORD_SIZE, MIN_MAPPING_SIZE,
    normalise_mapping_size, read_u64, record_header_len, record_span, window_offset_for,
};
use crate::clock::Clock;
use crate::descriptor::{Descriptor, StreamOptions};
use crate::error::StreamError;
use crate::source::{NOTHING_TO_READ, Record, Source, Timestamp, WITHDRAWN, select};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the next record sits inside the current window.
#[derive(Debug, Clone, Copy)]
struct Located {
    timestamp: Timestamp,
    payload_start: usize,
    len: usize,
    span: usize,
}

/// Reader over a shared log written by another process.
///
/// The header is mapped once for the lifetime of the reader. Records are read
/// through a separate window that slides forward by half its length whenever
/// the next record could straddle its end, so a reader can follow a log of
/// any size with a bounded address-space footprint.
pub struct SharedLogReader<C: Clock> {
    read_offset: u64,
    record_size: u64,
    follow: bool,
    timed: bool,
    window: Mmap,
    window_offset: u64,
    mapping_size: usize,
    header: Mmap,
    file: File,
    clock: C,
    path: PathBuf,
    description: String,
}

impl<C: Clock> SharedLogReader<C> {
    /// Opens the log named by a `shm:` descriptor.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        Self::open_with(
            clock,
            Path::new(&descriptor.path),
            descriptor.options,
            descriptor.record_size,
            descriptor.mapping_size,
            descriptor.to_string(),
        )
    }

    /// Opens a log by path with the given options and default sizes.
    pub fn open_path(
        clock: C,
        path: impl AsRef<Path>,
        options: StreamOptions,
    ) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let description = format!("shm:{}", path.display());
        Self::open_with(clock, path, options, None, None, description)
    }

    fn open_with(
        clock: C,
        path: &Path,
        options: StreamOptions,
        record_size: Option<u64>,
        mapping_size: Option<usize>,
        description: String,
    ) -> Result<Self, StreamError> {
        let mapping_size = mapping_size.unwrap_or(DEFAULT_MAPPING_SIZE);
        if mapping_size < MIN_MAPPING_SIZE {
            return Err(StreamError::MappingTooSmall {
                size: mapping_size,
                min: MIN_MAPPING_SIZE,
            });
        }
        let mapping_size = normalise_mapping_size(mapping_size);
        let target = path.display().to_string();

        if options.contains(StreamOptions::ANTICIPATE) {
            create_placeholder(path, record_size.unwrap_or(0))?;
        } else if options.contains(StreamOptions::WAIT) {
            wait_for(path);
        }

        let file = File::open(path).map_err(|e| StreamError::io(&target, e))?;
        let len = file
            .metadata()
            .map_err(|e| StreamError::io(&target, e))?
            .len();
        if len < HEADER_SIZE as u64 {
            return Err(StreamError::Truncated {
                path: path.to_path_buf(),
                what: "header",
            });
        }

        // SAFETY: the file is shared with a single writer that only appends
        // and publishes header fields atomically.
        let header = unsafe { MmapOptions::new().len(HEADER_SIZE).map(&file) }
            .map_err(|e| StreamError::io(&target, e))?;
        let (magic, actual_size) = {
            let view = Header::new(&header);
            (
                view.magic().load(Ordering::Acquire),
                view.record_size().load(Ordering::Acquire),
            )
        };
        if magic != LOG_MAGIC {
            return Err(StreamError::BadMagic {
                path: path.to_path_buf(),
                found: magic,
                expected: LOG_MAGIC,
            });
        }
        if let Some(requested) = record_size {
            if requested != actual_size {
                return Err(StreamError::RecordSizeMismatch {
                    path: path.to_path_buf(),
                    requested,
                    actual: actual_size,
                });
            }
        }
        if actual_size > 0
            && (actual_size > MAX_RECORD_SIZE as u64
                || record_span(actual_size, actual_size as usize) > MAX_RECORD_SIZE)
        {
            return Err(StreamError::RecordTooLarge {
                size: actual_size as usize,
                max: MAX_RECORD_SIZE - record_header_len(actual_size),
            });
        }

        // SAFETY: as above; pages past the current end of file are never
        // touched before the writer has extended the file and published them.
        let window = unsafe { MmapOptions::new().offset(0).len(mapping_size).map(&file) }
            .map_err(|e| StreamError::io(&target, e))?;

        let follow = options.intersects(StreamOptions::FOLLOW | StreamOptions::ANTICIPATE);
        let timed = options.contains(StreamOptions::TIMED);
        info!(
            path = %target,
            record_size = actual_size,
            mapping_size,
            follow,
            timed,
            "opened shared log"
        );

        Ok(Self {
            read_offset: HEADER_SIZE as u64,
            record_size: actual_size,
            follow,
            timed,
            window,
            window_offset: 0,
            mapping_size,
            header,
            file,
            clock,
            path: path.to_path_buf(),
            description,
        })
    }

    /// Offset of the next unread record.
    #[inline]
    #[must_use]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Fixed record size, or 0 for variable-size logs.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this reader tails the log instead of signalling end.
    #[must_use]
    pub fn follows(&self) -> bool {
        self.follow
    }

    /// Timestamp of the last record the writer published.
    #[inline]
    #[must_use]
    pub fn last_write_timestamp(&self) -> Timestamp {
        Header::new(&self.header)
            .write_timestamp()
            .load(Ordering::Acquire)
    }

    /// Skips records without surfacing them.
    ///
    /// Records with a timestamp strictly below `stop_ts` are skipped. A
    /// `stop_ts` of 0 means "catch up to live": everything up to and
    /// including the writer's last published timestamp is skipped. Returns
    /// the number of records skipped.
    pub fn fast_forward(&mut self, stop_ts: Timestamp) -> usize {
        let (stop, inclusive) = if stop_ts == 0 {
            (self.last_write_timestamp(), true)
        } else {
            (stop_ts, false)
        };
        let mut skipped = 0;
        while let Some(next) = self.locate() {
            if next.timestamp > stop || (next.timestamp == stop && !inclusive) {
                break;
            }
            self.read_offset += next.span as u64;
            skipped += 1;
        }
        debug!(
            log = %self.description,
            stop,
            skipped,
            read_offset = self.read_offset,
            "fast forwarded shared log"
        );
        skipped
    }

    /// Published write offset. The acquire load orders every later read of
    /// record bytes after the writer's release store.
    #[inline(always)]
    fn published_write_offset(&self) -> u64 {
        Header::new(&self.header)
            .write_offset()
            .load(Ordering::Acquire)
    }

    /// Makes sure a whole record starting at `read_offset` is mapped.
    #[inline(always)]
    fn ensure_window(&mut self) -> bool {
        let needed = self.read_offset + MAX_RECORD_SIZE as u64;
        if needed <= self.window_offset + self.mapping_size as u64 {
            return true;
        }
        match self.slide_window(needed) {
            Ok(()) => true,
            Err(err) => {
                warn!(log = %self.description, %err, "failed to slide mapping window");
                false
            }
        }
    }

    #[cold]
    fn slide_window(&mut self, needed: u64) -> Result<(), StreamError> {
        let offset = window_offset_for(self.window_offset, needed, self.mapping_size);
        // SAFETY: see `open_with`.
        let window = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(self.mapping_size)
                .map(&self.file)
        }
        .map_err(|e| StreamError::io(self.path.display().to_string(), e))?;
        debug!(
            log = %self.description,
            from = self.window_offset,
            to = offset,
            "slid shared log window"
        );
        self.window = window;
        self.window_offset = offset;
        Ok(())
    }

    /// Finds the next published record without consuming it.
    #[inline]
    fn locate(&mut self) -> Option<Located> {
        if self.read_offset >= self.published_write_offset() {
            return None;
        }
        if !self.ensure_window() {
            return None;
        }
        let start = (self.read_offset - self.window_offset) as usize;
        let timestamp = read_u64(&self.window, start)?;
        let len = if self.record_size == 0 {
            read_u64(&self.window, start + 8)? as usize
        } else {
            self.record_size as usize
        };
        if len > MAX_RECORD_SIZE {
            warn!(log = %self.description, offset = self.read_offset, len, "corrupt record length");
            return None;
        }
        let header_len = record_header_len(self.record_size);
        let span = record_span(self.record_size, len);
        if span > MAX_RECORD_SIZE {
            warn!(log = %self.description, offset = self.read_offset, len, "corrupt record length");
            return None;
        }
        Some(Located {
            timestamp,
            payload_start: start + header_len,
            len,
            span,
        })
    }
}

impl<C: Clock> Source for SharedLogReader<C> {
    #[inline]
    fn attest(&mut self, next_ts: &mut Timestamp) {
        let current = *next_ts;
        let value = match self.locate() {
            Some(next) => next.timestamp,
            None if self.follow => NOTHING_TO_READ,
            None => self.clock.now(),
        };
        *next_ts = select(current == WITHDRAWN, current, value);
    }

    #[inline]
    fn read(&mut self) -> Option<Record<'_>> {
        let next = self.locate()?;
        self.read_offset += next.span as u64;
        if self.timed && self.clock.can_set() {
            self.clock.set(next.timestamp);
        }
        let payload = self
            .window
            .get(next.payload_start..next.payload_start + next.len)?;
        Some(Record::new(next.timestamp, payload))
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

/// Creates an empty log at `path` unless something already exists there.
///
/// Two readers anticipating the same missing file concurrently is not
/// coordinated beyond `create_new`: the loser may observe the winner's file
/// before its header is written and fail with a bad magic.
fn create_placeholder(path: &Path, record_size: u64) -> Result<(), StreamError> {
    let target = path.display().to_string();
    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(StreamError::io(&target, e)),
    };
    file.set_len(HEADER_SIZE as u64)
        .map_err(|e| StreamError::io(&target, e))?;
    // SAFETY: freshly created file, exactly HEADER_SIZE long.
    let mut map = unsafe { MmapOptions::new().len(HEADER_SIZE).map_mut(&file) }
        .map_err(|e| StreamError::io(&target, e))?;
    init_header(&mut map, record_size);
    map.flush().map_err(|e| StreamError::io(&target, e))?;
    info!(path = %target, record_size, "created placeholder shared log");
    Ok(())
}

/// Writes a fresh header. The magic goes last so that a concurrent opener
/// never sees a valid magic over half-written fields.
pub(crate) fn init_header(map: &mut MmapMut, record_size: u64) {
    let header = Header::new_mut(map);
    header.record_size().store(record_size, Ordering::Relaxed);
    header
        .write_offset()
        .store(HEADER_SIZE as u64, Ordering::Relaxed);
    header.write_timestamp().store(0, Ordering::Relaxed);
    header.magic().store(LOG_MAGIC, Ordering::Release);
}

fn wait_for(path: &Path) {
    let mut announced = false;
    loop {
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() >= HEADER_SIZE as u64 {
                return;
            }
        }
        if !announced {
            info!(path = %path.display(), "waiting for shared log to appear");
            announced = true;
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}
