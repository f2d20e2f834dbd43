/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Timer sources.

use crate::clock::Clock;
use crate::descriptor::Descriptor;
use crate::error::StreamError;
use crate::source::{MAX_TIMESTAMP, Record, Source, Timestamp};

/// Periodic timer.
///
/// The descriptor path is the interval in nanoseconds, e.g. `timer:1000000`.
/// The timer is due once the clock reaches `last + interval`; reading it
/// re-arms from the current time and yields that time as the payload.
#[derive(Debug)]
pub struct Timer<C: Clock> {
    clock: C,
    interval: u64,
    next: Timestamp,
    last: Timestamp,
    last_bytes: [u8; 8],
    description: String,
}

impl<C: Clock> Timer<C> {
    /// Opens a timer from a `timer:` descriptor.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let interval = descriptor
            .path
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| StreamError::InvalidInterval {
                descriptor: descriptor.to_string(),
            })?;
        Ok(Self::with_interval(clock, interval, descriptor.to_string()))
    }

    /// Creates a timer firing every `interval` nanoseconds.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn with_interval(clock: C, interval: u64, description: String) -> Self {
        assert!(interval > 0, "timer interval must be positive");
        let last = clock.now();
        Self {
            clock,
            interval,
            next: last.saturating_add(interval),
            last,
            last_bytes: last.to_ne_bytes(),
            description,
        }
    }

    /// Interval in nanoseconds.
    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Time at which the timer is next due.
    #[must_use]
    pub fn next_due(&self) -> Timestamp {
        self.next
    }
}

impl<C: Clock> Source for Timer<C> {
    #[inline]
    fn attest(&mut self, next_ts: &mut Timestamp) {
        let now = self.clock.now();
        if now >= self.next {
            *next_ts = now;
        }
    }

    fn read(&mut self) -> Option<Record<'_>> {
        self.last = self.clock.now();
        self.next = self.last.saturating_add(self.interval);
        self.last_bytes = self.last.to_ne_bytes();
        Some(Record::new(self.last, &self.last_bytes))
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

/// Timer that never fires. Occupies the timer slot of an arbiter that does
/// not need one.
#[derive(Debug, Clone, Default)]
pub struct NullTimer;

impl NullTimer {
    /// Creates a null timer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Source for NullTimer {
    #[inline(always)]
    fn attest(&mut self, next_ts: &mut Timestamp) {
        *next_ts = MAX_TIMESTAMP;
    }

    #[inline(always)]
    fn read(&mut self) -> Option<Record<'_>> {
        None
    }

    fn describe(&self) -> &str {
        "nulltimer"
    }
}
