/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Single-writer side of a shared log.

use super::layout::{
    DEFAULT_MAPPING_SIZE, HEADER_SIZE, Header, LOG_MAGIC, MAX_RECORD_SIZE, MIN_MAPPING_SIZE,
    normalise_mapping_size, record_header_len, record_span, window_offset_for,
};
use super::reader::init_header;
use crate::clock::Clock;
use crate::descriptor::{Descriptor, StreamOptions};
use crate::error::StreamError;
use crate::source::Timestamp;
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

/// Appends records to a shared log.
///
/// Holds an exclusive advisory lock on the file for its whole lifetime, so a
/// second writer on the same log fails at open time instead of interleaving.
pub struct SharedLogWriter<C: Clock> {
    write_offset: u64,
    record_size: u64,
    file_size: u64,
    window: MmapMut,
    window_offset: u64,
    mapping_size: usize,
    header: MmapMut,
    file: File,
    clock: C,
    path: PathBuf,
}

impl<C: Clock> SharedLogWriter<C> {
    /// Creates or reopens the log named by a `shm:` descriptor.
    ///
    /// `recordsize` selects fixed-size records; `must_create` refuses a file
    /// that already holds data.
    pub fn create(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        Self::create_with(
            clock,
            Path::new(&descriptor.path),
            descriptor.record_size.unwrap_or(0),
            descriptor.mapping_size,
            descriptor.options.contains(StreamOptions::MUST_CREATE),
        )
    }

    /// Creates or reopens a log by path. A `record_size` of 0 means variable.
    pub fn create_path(
        clock: C,
        path: impl AsRef<Path>,
        record_size: u64,
    ) -> Result<Self, StreamError> {
        Self::create_with(clock, path.as_ref(), record_size, None, false)
    }

    fn create_with(
        clock: C,
        path: &Path,
        record_size: u64,
        mapping_size: Option<usize>,
        must_create: bool,
    ) -> Result<Self, StreamError> {
        let mapping_size = mapping_size.unwrap_or(DEFAULT_MAPPING_SIZE);
        if mapping_size < MIN_MAPPING_SIZE {
            return Err(StreamError::MappingTooSmall {
                size: mapping_size,
                min: MIN_MAPPING_SIZE,
            });
        }
        let mapping_size = normalise_mapping_size(mapping_size);
        if record_size > 0 && record_span(record_size, record_size as usize) > MAX_RECORD_SIZE {
            return Err(StreamError::RecordTooLarge {
                size: record_size as usize,
                max: MAX_RECORD_SIZE - record_header_len(record_size),
            });
        }
        let target = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StreamError::io(&target, e))?;
        file.try_lock_exclusive()
            .map_err(|e| StreamError::io(&target, e))?;

        let len = file
            .metadata()
            .map_err(|e| StreamError::io(&target, e))?
            .len();
        if must_create && len > 0 {
            return Err(StreamError::AlreadyExists {
                path: path.to_path_buf(),
                len,
            });
        }
        let fresh = len == 0;
        if !fresh && len < HEADER_SIZE as u64 {
            return Err(StreamError::Truncated {
                path: path.to_path_buf(),
                what: "header",
            });
        }
        if fresh {
            file.set_len(HEADER_SIZE as u64)
                .map_err(|e| StreamError::io(&target, e))?;
        }

        // SAFETY: the exclusive lock makes this the only writer; readers
        // only load header fields atomically.
        let mut header = unsafe { MmapOptions::new().len(HEADER_SIZE).map_mut(&file) }
            .map_err(|e| StreamError::io(&target, e))?;
        if fresh {
            init_header(&mut header, record_size);
        } else {
            let view = Header::new_mut(&mut header);
            let magic = view.magic().load(Ordering::Acquire);
            if magic != LOG_MAGIC {
                return Err(StreamError::BadMagic {
                    path: path.to_path_buf(),
                    found: magic,
                    expected: LOG_MAGIC,
                });
            }
            let actual = view.record_size().load(Ordering::Relaxed);
            if actual != record_size {
                return Err(StreamError::RecordSizeMismatch {
                    path: path.to_path_buf(),
                    requested: record_size,
                    actual,
                });
            }
        }
        let write_offset = Header::new_mut(&mut header)
            .write_offset()
            .load(Ordering::Acquire);

        let window_offset =
            window_offset_for(0, write_offset + MAX_RECORD_SIZE as u64, mapping_size);
        let file_size = grown_size(
            len.max(HEADER_SIZE as u64),
            window_offset + mapping_size as u64,
            mapping_size,
        );
        file.set_len(file_size)
            .map_err(|e| StreamError::io(&target, e))?;
        // SAFETY: the file now covers the whole window.
        let window = unsafe {
            MmapOptions::new()
                .offset(window_offset)
                .len(mapping_size)
                .map_mut(&file)
        }
        .map_err(|e| StreamError::io(&target, e))?;

        info!(
            path = %target,
            record_size,
            write_offset,
            fresh,
            "opened shared log for writing"
        );

        Ok(Self {
            write_offset,
            record_size,
            file_size,
            window,
            window_offset,
            mapping_size,
            header,
            file,
            clock,
            path: path.to_path_buf(),
        })
    }

    /// Appends `payload` stamped with the clock's current time.
    pub fn append(&mut self, payload: &[u8]) -> Result<Timestamp, StreamError> {
        let ts = self.clock.now();
        self.append_at(ts, payload)?;
        Ok(ts)
    }

    /// Appends `payload` with an explicit timestamp.
    ///
    /// Fixed-size logs accept payloads up to the record size; the remainder
    /// of the record is left zeroed.
    pub fn append_at(&mut self, ts: Timestamp, payload: &[u8]) -> Result<(), StreamError> {
        let header_len = record_header_len(self.record_size);
        let span = if self.record_size > 0 {
            if payload.len() as u64 > self.record_size {
                return Err(StreamError::RecordTooLarge {
                    size: payload.len(),
                    max: self.record_size as usize,
                });
            }
            record_span(self.record_size, self.record_size as usize)
        } else {
            record_span(0, payload.len())
        };
        if span > MAX_RECORD_SIZE {
            return Err(StreamError::RecordTooLarge {
                size: payload.len(),
                max: MAX_RECORD_SIZE - header_len,
            });
        }
        self.reserve()?;

        let start = (self.write_offset - self.window_offset) as usize;
        let body = start + header_len;
        self.window[body..body + payload.len()].copy_from_slice(payload);
        if self.record_size == 0 {
            self.window[start + 8..start + 16].copy_from_slice(&(payload.len() as u64).to_ne_bytes());
        }
        self.window[start..start + 8].copy_from_slice(&ts.to_ne_bytes());

        self.write_offset += span as u64;
        let header = Header::new_mut(&mut self.header);
        header.write_timestamp().store(ts, Ordering::Release);
        header
            .write_offset()
            .store(self.write_offset, Ordering::Release);
        Ok(())
    }

    /// Flushes the header and the current window to the file.
    pub fn flush(&self) -> Result<(), StreamError> {
        let target = self.path.display().to_string();
        self.window
            .flush()
            .map_err(|e| StreamError::io(&target, e))?;
        self.header.flush().map_err(|e| StreamError::io(&target, e))
    }

    /// Offset the next record will be written at.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.write_offset
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

    /// Grows the file and slides the window so that a maximum record fits at
    /// `write_offset`.
    #[inline]
    fn reserve(&mut self) -> Result<(), StreamError> {
        let needed = self.write_offset + MAX_RECORD_SIZE as u64;
        if needed <= self.window_offset + self.mapping_size as u64 {
            return Ok(());
        }
        let target = self.path.display().to_string();
        let offset = window_offset_for(self.window_offset, needed, self.mapping_size);
        let window_end = offset + self.mapping_size as u64;
        if window_end > self.file_size {
            let size = grown_size(self.file_size, window_end, self.mapping_size);
            self.file
                .set_len(size)
                .map_err(|e| StreamError::io(&target, e))?;
            debug!(path = %target, from = self.file_size, to = size, "grew shared log");
            self.file_size = size;
        }
        // SAFETY: the file covers the new window.
        let window = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(self.mapping_size)
                .map_mut(&self.file)
        }
        .map_err(|e| StreamError::io(&target, e))?;
        debug!(path = %target, from = self.window_offset, to = offset, "slid writer window");
        self.window = window;
        self.window_offset = offset;
        Ok(())
    }
}

/// Grows `current` in `step` increments until it reaches `needed`.
fn grown_size(current: u64, needed: u64, step: usize) -> u64 {
    let mut size = current;
    while size < needed {
        size += step as u64;
    }
    size
}
