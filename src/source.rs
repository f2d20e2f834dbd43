/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Source capability shared by every participant in arbitration.
//!
//! A source is anything that can report the timestamp of its next record
//! without consuming it ([`Source::attest`]) and can then hand that record
//! over ([`Source::read`]). Arbiters only ever see this surface.

use std::cell::RefCell;
use std::rc::Rc;

/// Nanosecond tick value carried by every record.
pub type Timestamp = u64;

/// Largest representable timestamp.
pub const MAX_TIMESTAMP: Timestamp = Timestamp::MAX;

/// Reported by a source that has no record available yet.
pub const NOTHING_TO_READ: Timestamp = MAX_TIMESTAMP;

/// Forces a readiness-driven source to be polled again on its next attest.
pub const RECHECK: Timestamp = MAX_TIMESTAMP;

/// Marks an inactive slot. A withdrawn slot never wins arbitration.
pub const WITHDRAWN: Timestamp = MAX_TIMESTAMP - 1;

/// Shared, single-threaded handle to a source.
///
/// Arbiters identify a source by the identity of this handle, which is what
/// lets a withdrawn source be resubmitted into the slot it held before.
pub type Shared<S> = Rc<RefCell<S>>;

/// Wraps a source into a [`Shared`] handle.
#[must_use]
pub fn shared<S>(source: S) -> Shared<S> {
    Rc::new(RefCell::new(source))
}

/// A record handed out by [`Source::read`].
///
/// The payload borrows the source's own storage (for shared logs, the mapped
/// file itself) and is valid until the next call on that source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Timestamp of the record.
    pub timestamp: Timestamp,
    /// Raw payload bytes.
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    /// Creates a new record view.
    #[must_use]
    pub fn new(timestamp: Timestamp, payload: &'a [u8]) -> Self {
        Self { timestamp, payload }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Capability implemented by every kind of source.
pub trait Source {
    /// Reports the timestamp of the next available record into `next_ts`.
    ///
    /// Must not consume anything. Sources that cannot know their next
    /// timestamp without a syscall leave `next_ts` untouched and rely on the
    /// kernel-backed arbiter instead.
    fn attest(&mut self, next_ts: &mut Timestamp);

    /// Consumes exactly one record, or returns `None` at end of stream.
    fn read(&mut self) -> Option<Record<'_>>;

    /// Human readable description, normally the descriptor it was opened with.
    fn describe(&self) -> &str;
}

/// Branchless select: `a` when `cond` holds, otherwise `b`.
#[inline(always)]
pub(crate) fn select(cond: bool, a: u64, b: u64) -> u64 {
    let mask = (cond as u64).wrapping_neg();
    b ^ ((a ^ b) & mask)
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline(always)]
pub(crate) const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
