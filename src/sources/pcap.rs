/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Offline packet capture reader.
//!
//! Reads classic libpcap files in either byte order, with microsecond or
//! nanosecond timestamps. The file is mapped once, so peeking at the next
//! packet timestamp costs no syscall and the reader can sit in a
//! fixed-capacity arbiter next to shared logs.

use crate::clock::Clock;
use crate::descriptor::{Descriptor, StreamOptions};
use crate::error::StreamError;
use crate::source::{Record, Source, Timestamp, WITHDRAWN, select};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Magic of a capture with microsecond timestamps.
pub const MICRO_MAGIC: u32 = 0xa1b2_c3d4;
/// Magic of a capture with nanosecond timestamps.
pub const NANO_MAGIC: u32 = 0xa1b2_3c4d;

const GLOBAL_HEADER_LEN: usize = 24;
const PACKET_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Packet {
    timestamp: Timestamp,
    data_start: usize,
    len: usize,
}

/// Reader over a capture file.
pub struct PcapReader<C: Clock> {
    map: Mmap,
    cursor: usize,
    big_endian: bool,
    nanos: bool,
    timed: bool,
    clock: C,
    description: String,
}

impl<C: Clock> PcapReader<C> {
    /// Opens the capture named by a `pcap:` descriptor.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let path = Path::new(&descriptor.path);
        let target = path.display().to_string();
        let file = File::open(path).map_err(|e| StreamError::io(&target, e))?;
        let len = file
            .metadata()
            .map_err(|e| StreamError::io(&target, e))?
            .len();
        if len < GLOBAL_HEADER_LEN as u64 {
            return Err(StreamError::Truncated {
                path: path.to_path_buf(),
                what: "capture header",
            });
        }
        // SAFETY: capture files are not modified while being replayed.
        let map = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| StreamError::io(&target, e))?;

        let raw = u32::from_le_bytes([map[0], map[1], map[2], map[3]]);
        let (big_endian, nanos) = match raw {
            MICRO_MAGIC => (false, false),
            NANO_MAGIC => (false, true),
            m if m.swap_bytes() == MICRO_MAGIC => (true, false),
            m if m.swap_bytes() == NANO_MAGIC => (true, true),
            other => {
                return Err(StreamError::BadMagic {
                    path: path.to_path_buf(),
                    found: u64::from(other),
                    expected: u64::from(MICRO_MAGIC),
                });
            }
        };
        info!(path = %target, big_endian, nanos, "opened capture file");

        Ok(Self {
            map,
            cursor: GLOBAL_HEADER_LEN,
            big_endian,
            nanos,
            timed: descriptor.options.contains(StreamOptions::TIMED),
            clock,
            description: descriptor.to_string(),
        })
    }

    /// Whether packet timestamps carry nanoseconds.
    #[must_use]
    pub fn has_nanosecond_precision(&self) -> bool {
        self.nanos
    }

    #[inline]
    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.map.get(offset..offset + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    #[inline]
    fn peek(&self) -> Option<Packet> {
        let at = self.cursor;
        let seconds = u64::from(self.u32_at(at)?);
        let fraction = u64::from(self.u32_at(at + 4)?);
        let len = self.u32_at(at + 8)? as usize;
        let data_start = at + PACKET_HEADER_LEN;
        if data_start + len > self.map.len() {
            return None;
        }
        let fraction_nanos = if self.nanos { fraction } else { fraction * 1_000 };
        Some(Packet {
            timestamp: seconds * 1_000_000_000 + fraction_nanos,
            data_start,
            len,
        })
    }
}

impl<C: Clock> Source for PcapReader<C> {
    #[inline]
    fn attest(&mut self, next_ts: &mut Timestamp) {
        let current = *next_ts;
        let value = match self.peek() {
            Some(packet) => packet.timestamp,
            None => self.clock.now(),
        };
        *next_ts = select(current == WITHDRAWN, current, value);
    }

    fn read(&mut self) -> Option<Record<'_>> {
        let packet = self.peek()?;
        self.cursor = packet.data_start + packet.len;
        if self.timed && self.clock.can_set() {
            self.clock.set(packet.timestamp);
        }
        let data = self.map.get(packet.data_start..packet.data_start + packet.len)?;
        Some(Record::new(packet.timestamp, data))
    }

    fn describe(&self) -> &str {
        &self.description
    }
}
