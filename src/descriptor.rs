/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Source descriptors.
//!
//! A descriptor names a source and its options in one string:
//!
//! ```text
//! <kind>:<path-or-address>@<option>,<option>,<key>=<value>
//! ```
//!
//! # Examples
//!
//! ```
//! use arbiter_rs::descriptor::{Descriptor, SourceKind, StreamOptions};
//!
//! let desc: Descriptor = "shm:/dev/shm/md.log@follow,recordsize=1k".parse().unwrap();
//! assert_eq!(desc.kind, SourceKind::SharedLog);
//! assert_eq!(desc.path, "/dev/shm/md.log");
//! assert!(desc.options.contains(StreamOptions::FOLLOW));
//! assert_eq!(desc.record_size, Some(1024));
//! ```

use crate::error::StreamError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Mode flags parsed once from a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StreamOptions: u8 {
        /// Wait at open time until the file exists.
        const WAIT = 0x04;
        /// Tail a growing log instead of signalling end of stream.
        const FOLLOW = 0x08;
        /// Push each record timestamp into the clock when it is settable.
        const TIMED = 0x10;
        /// Writer refuses to append to an existing non-empty file.
        const MUST_CREATE = 0x40;
        /// Create an empty placeholder log if the file is missing.
        const ANTICIPATE = 0x80;
    }
}

/// The closed set of source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Memory-mapped single-writer log.
    SharedLog,
    /// Listening TCP socket; each read accepts one connection.
    TcpListener,
    /// Connected TCP socket.
    TcpStream,
    /// Bound UDP socket.
    Udp,
    /// Periodic timer.
    Timer,
    /// Timer that never fires.
    NullTimer,
    /// Compressed shared log archive.
    Archive,
    /// Offline packet capture file.
    Pcap,
}

impl SourceKind {
    /// Descriptor tag for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::SharedLog => "shm",
            Self::TcpListener => "tcp_listen",
            Self::TcpStream => "tcp",
            Self::Udp => "udp",
            Self::Timer => "timer",
            Self::NullTimer => "nulltimer",
            Self::Archive => "archive",
            Self::Pcap => "pcap",
        }
    }

    /// Whether sources of this kind need kernel readiness notification.
    #[must_use]
    pub fn is_kernel(&self) -> bool {
        matches!(self, Self::TcpListener | Self::TcpStream | Self::Udp)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SourceKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shm" => Ok(Self::SharedLog),
            "tcp_listen" => Ok(Self::TcpListener),
            "tcp" => Ok(Self::TcpStream),
            "udp" => Ok(Self::Udp),
            "timer" => Ok(Self::Timer),
            "nulltimer" => Ok(Self::NullTimer),
            "archive" => Ok(Self::Archive),
            "pcap" => Ok(Self::Pcap),
            other => Err(StreamError::UnknownKind(other.to_string())),
        }
    }
}

/// A parsed descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Descriptor {
    /// Source kind.
    pub kind: SourceKind,
    /// Path, address, or (for timers) interval.
    pub path: String,
    /// Mode flags.
    pub options: StreamOptions,
    /// Fixed record size override; `None` means variable or taken from the file.
    pub record_size: Option<u64>,
    /// Initial mapping window size.
    pub mapping_size: Option<usize>,
    raw: String,
}

impl Descriptor {
    /// The string this descriptor was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `follow` is set. `anticipate` implies it.
    #[inline]
    #[must_use]
    pub fn follows(&self) -> bool {
        self.options
            .intersects(StreamOptions::FOLLOW | StreamOptions::ANTICIPATE)
    }

    /// Whether `timed` is set.
    #[inline]
    #[must_use]
    pub fn is_timed(&self) -> bool {
        self.options.contains(StreamOptions::TIMED)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Descriptor {
    type Err = StreamError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (kind_str, rest) = match raw.split_once(':') {
            Some(parts) => parts,
            // a null timer needs nothing but its tag
            None if raw == SourceKind::NullTimer.tag() => (raw, ""),
            None => return Err(StreamError::malformed(raw, "missing ':' after kind")),
        };
        if kind_str.is_empty() {
            return Err(StreamError::malformed(raw, "empty kind"));
        }
        let kind: SourceKind = kind_str.parse()?;

        let (path, option_str) = rest.split_once('@').unwrap_or((rest, ""));

        let mut options = StreamOptions::empty();
        let mut record_size = None;
        let mut mapping_size = None;
        for option in option_str.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option.split_once('=') {
                Some(("recordsize", value)) => {
                    record_size = Some(parse_size(raw, value)? as u64);
                }
                Some(("mappingsize", value)) => {
                    mapping_size = Some(parse_size(raw, value)?);
                }
                Some((key, _)) => {
                    tracing::debug!(descriptor = raw, key, "ignoring unknown descriptor key");
                }
                None => match option {
                    "follow" => options |= StreamOptions::FOLLOW,
                    "timed" => options |= StreamOptions::TIMED,
                    "wait" => options |= StreamOptions::WAIT,
                    "must_create" => options |= StreamOptions::MUST_CREATE,
                    "anticipate" => options |= StreamOptions::ANTICIPATE | StreamOptions::FOLLOW,
                    other => {
                        tracing::debug!(descriptor = raw, option = other, "ignoring unknown option");
                    }
                },
            }
        }

        Ok(Self {
            kind,
            path: path.to_string(),
            options,
            record_size,
            mapping_size,
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<String> for Descriptor {
    type Error = StreamError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Descriptor> for String {
    fn from(value: Descriptor) -> Self {
        value.raw
    }
}

/// Parses a size with an optional `k`, `m` or `g` binary multiplier.
fn parse_size(descriptor: &str, value: &str) -> Result<usize, StreamError> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1024),
        Some('m' | 'M') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| StreamError::malformed(descriptor, format!("bad size {value:?}")))
}
