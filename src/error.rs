/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Error types for opening sources and registering them with arbiters.
//!
//! Everything here is detected at the point of violation. None of these
//! conditions is recoverable from the sequencing point of view: a caller
//! receiving one is expected to stop rather than continue with a stream
//! that would be silently mis-ordered.

use crate::arbiter::SlotId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing descriptors or opening sources.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The descriptor string could not be parsed.
    #[error("malformed descriptor {descriptor:?}: {reason}")]
    MalformedDescriptor {
        /// The offending descriptor.
        descriptor: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The descriptor names a source kind that does not exist.
    #[error("unknown source kind {0:?}")]
    UnknownKind(String),

    /// The source kind exists but cannot be built this way.
    #[error("source kind {kind} cannot be constructed {how}")]
    UnsupportedConstruction {
        /// The kind tag.
        kind: String,
        /// The construction path that was attempted.
        how: &'static str,
    },

    /// A file did not start with the expected magic number.
    #[error("{path:?} has magic {found:#x}, expected {expected:#x}")]
    BadMagic {
        /// File being opened.
        path: PathBuf,
        /// Value found in the file.
        found: u64,
        /// Value that was expected.
        expected: u64,
    },

    /// The record size given in the descriptor disagrees with the file.
    #[error("{path:?} was opened with record size {requested} but the file uses {actual}")]
    RecordSizeMismatch {
        /// File being opened.
        path: PathBuf,
        /// Record size from the descriptor.
        requested: u64,
        /// Record size stored in the header.
        actual: u64,
    },

    /// A record larger than the supported maximum was requested or found.
    #[error("record of {size} bytes exceeds the maximum of {max}")]
    RecordTooLarge {
        /// Size of the record.
        size: usize,
        /// Largest supported record.
        max: usize,
    },

    /// The mapping window is too small to hold the largest record twice.
    #[error("mapping size {size} is below the minimum of {min}")]
    MappingTooSmall {
        /// Requested mapping size.
        size: usize,
        /// Smallest allowed mapping size.
        min: usize,
    },

    /// `must_create` was requested but the file already holds data.
    #[error("{path:?} already exists with {len} bytes")]
    AlreadyExists {
        /// File being created.
        path: PathBuf,
        /// Its current length.
        len: u64,
    },

    /// A file ended before a complete structure could be read.
    #[error("{path:?} is truncated: {what}")]
    Truncated {
        /// File being read.
        path: PathBuf,
        /// What was being read.
        what: &'static str,
    },

    /// The descriptor for a timer did not carry a usable interval.
    #[error("timer {descriptor:?} has no valid interval")]
    InvalidInterval {
        /// The timer descriptor.
        descriptor: String,
    },

    /// `get_fd` was called on a source that has no kernel descriptor.
    #[error("{description} is not a kernel-backed source")]
    NotKernel {
        /// Description of the source.
        description: String,
    },

    /// An I/O error while operating on a path or address.
    #[error("I/O error on {target}: {source}")]
    Io {
        /// Path or address involved.
        target: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    pub(crate) fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            target: target.into(),
            source,
        }
    }

    pub(crate) fn malformed(descriptor: &str, reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while registering sources with an arbiter.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// More sources were submitted than the declared capacity.
    #[error("arbiter overfilled: capacity is {capacity}")]
    Overfilled {
        /// Declared capacity.
        capacity: usize,
    },

    /// Registration finished with a different number of sources than declared.
    #[error("arbiter declared capacity {capacity} but {submitted} sources were submitted")]
    CapacityMismatch {
        /// Declared capacity.
        capacity: usize,
        /// Sources actually submitted.
        submitted: usize,
    },

    /// A source still under arbitration was submitted again.
    #[error("source in slot {id} resubmitted without being withdrawn")]
    ResubmittedLive {
        /// Slot the source already occupies.
        id: SlotId,
    },

    /// A submission landed in a different slot than the caller expected.
    #[error("lost count in arbiter submission: wanted slot {desired}, got {returned}")]
    LostCount {
        /// Slot the caller asked for.
        desired: SlotId,
        /// Slot actually assigned.
        returned: SlotId,
    },

    /// No identifier is left in the slot id space.
    #[error("slot id space exhausted")]
    IdSpaceExhausted,

    /// The public id is already mapped to another source.
    #[error("public id {0} is already in use")]
    PublicIdInUse(SlotId),

    /// A sub-arbiter handed out an id whose previous public mapping was never
    /// retired.
    #[error("unified id {0} is still mapped to a public id")]
    UnifiedIdInUse(SlotId),

    /// Operating-system failure while registering a descriptor.
    #[error("readiness registration failed: {0}")]
    Io(#[from] std::io::Error),

    /// The source itself could not be opened or queried.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
