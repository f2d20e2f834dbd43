/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! On-disk layout of a shared log.
//!
//! ```text
//! +--------------------------- 64 KiB header ---------------------------+
//! | magic u64 | record size u64 | write offset u64 | write ts u64 | pad |
//! +----------------------------------------------------------------------+
//! | ts u64 | [len u64] | payload ... | pad to 64 B |   record 0
//! | ts u64 | [len u64] | payload ... | pad to 64 B |   record 1
//! ```
//!
//! The length field is only present when the record size is 0 (variable).
//! Header fields are shared with the writer process and are only ever
//! touched through atomics.

use crate::source::round_up;
use std::sync::atomic::AtomicU64;

/// Magic number at the start of every shared log.
pub const LOG_MAGIC: u64 = 0x7865_7274_6e61_7571;

/// Size of the file header.
pub const HEADER_SIZE: usize = 64 * 1024;

/// Alignment of every record.
pub const CACHE_LINE: usize = 64;

/// Largest on-disk span of a single record, header included.
pub const MAX_RECORD_SIZE: usize = 2 * 1024 * 1024;

/// Smallest mapping window: two maximum records, so sliding by half a window
/// always leaves a whole record mapped.
pub const MIN_MAPPING_SIZE: usize = 2 * MAX_RECORD_SIZE;

/// Mapping window used when the descriptor gives none.
pub const DEFAULT_MAPPING_SIZE: usize = 8 * MAX_RECORD_SIZE;

/// Mapping sizes are kept a multiple of this so that half a window is
/// always a valid mapping offset.
pub(crate) const MAPPING_GRANULE: usize = 2 * HEADER_SIZE;

const MAGIC_OFFSET: usize = 0;
const RECORD_SIZE_OFFSET: usize = 8;
const WRITE_OFFSET_OFFSET: usize = 16;
const WRITE_TIMESTAMP_OFFSET: usize = 24;

/// Record header length for the given record size mode.
#[inline(always)]
#[must_use]
pub const fn record_header_len(record_size: u64) -> usize {
    if record_size == 0 { 16 } else { 8 }
}

/// Total on-disk span of a record carrying `payload_len` bytes.
#[inline(always)]
#[must_use]
pub const fn record_span(record_size: u64, payload_len: usize) -> usize {
    round_up(record_header_len(record_size) + payload_len, CACHE_LINE)
}

/// Normalises a requested mapping size to the granule.
#[must_use]
pub(crate) fn normalise_mapping_size(size: usize) -> usize {
    round_up(size, MAPPING_GRANULE)
}

/// First window offset at or after `from` whose window covers
/// `[needed - MAX_RECORD_SIZE, needed)`, advancing by half a window at a time.
#[must_use]
pub(crate) fn window_offset_for(from: u64, needed: u64, mapping_size: usize) -> u64 {
    let half = (mapping_size / 2) as u64;
    let mut offset = from;
    while offset + (mapping_size as u64) < needed {
        offset += half;
    }
    offset
}

/// Atomic view over the header fields of a mapped log.
pub(crate) struct Header<'a> {
    fields: &'a [AtomicU64; 4],
}

impl<'a> Header<'a> {
    /// Views the header through a read-only mapping.
    pub(crate) fn new(map: &'a [u8]) -> Self {
        assert!(map.len() >= HEADER_SIZE, "header mapping too short");
        let ptr = map.as_ptr();
        debug_assert_eq!(ptr.align_offset(std::mem::align_of::<AtomicU64>()), 0);
        // SAFETY: the mapping is page aligned, at least HEADER_SIZE long and
        // outlives 'a. AtomicU64 has the same layout as u64 and the writer
        // process only ever updates these words as whole aligned u64s.
        let fields = unsafe { &*(ptr as *const [AtomicU64; 4]) };
        Self { fields }
    }

    /// Views the header through a writable mapping.
    pub(crate) fn new_mut(map: &'a mut [u8]) -> Self {
        assert!(map.len() >= HEADER_SIZE, "header mapping too short");
        let ptr = map.as_mut_ptr();
        debug_assert_eq!(ptr.align_offset(std::mem::align_of::<AtomicU64>()), 0);
        // SAFETY: as in `new`; the pointer carries write provenance.
        let fields = unsafe { &*(ptr as *const [AtomicU64; 4]) };
        Self { fields }
    }

    #[inline(always)]
    pub(crate) fn magic(&self) -> &AtomicU64 {
        &self.fields[MAGIC_OFFSET / 8]
    }

    #[inline(always)]
    pub(crate) fn record_size(&self) -> &AtomicU64 {
        &self.fields[RECORD_SIZE_OFFSET / 8]
    }

    #[inline(always)]
    pub(crate) fn write_offset(&self) -> &AtomicU64 {
        &self.fields[WRITE_OFFSET_OFFSET / 8]
    }

    #[inline(always)]
    pub(crate) fn write_timestamp(&self) -> &AtomicU64 {
        &self.fields[WRITE_TIMESTAMP_OFFSET / 8]
    }
}

/// Reads a native-endian u64 at `offset`, if it lies inside `bytes`.
#[inline(always)]
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_ne_bytes)
}
