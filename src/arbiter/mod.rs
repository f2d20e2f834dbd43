/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Arbitration between sources.
//!
//! An arbiter answers one question in a tight loop: which registered source
//! holds the globally earliest record right now. Three arbiters cover the
//! two readiness models:
//!
//! - [`FixedArbiter`] holds a fixed number of sources that can report their
//!   next timestamp without a syscall, plus a timer in slot 0.
//! - [`KernelArbiter`] holds descriptors that need readiness notification and
//!   stamps them with the poll time.
//! - [`UnifiedArbiter`] composes the two behind one public id space.
//!
//! # Examples
//!
//! ```no_run
//! use arbiter_rs::arbiter::{FixedArbiter, Ruling};
//! use arbiter_rs::clock::RealClock;
//! use arbiter_rs::descriptor::StreamOptions;
//! use arbiter_rs::shm::SharedLogReader;
//! use arbiter_rs::source::{Source, shared};
//! use arbiter_rs::sources::NullTimer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = RealClock::new();
//! let a = shared(SharedLogReader::open_path(clock, "/dev/shm/a.log", StreamOptions::empty())?);
//! let b = shared(SharedLogReader::open_path(clock, "/dev/shm/b.log", StreamOptions::empty())?);
//!
//! let mut arbiter: FixedArbiter<_, _, 2> = FixedArbiter::new(clock, NullTimer::new());
//! arbiter.submit(a)?;
//! arbiter.submit(b)?;
//! arbiter.submission_complete()?;
//!
//! loop {
//!     match arbiter.ruling() {
//!         Ruling::Source(id) => {
//!             if let Some(source) = arbiter.source(id) {
//!                 let mut source = source.borrow_mut();
//!                 if let Some(record) = source.read() {
//!                     println!("{} {} bytes", record.timestamp, record.len());
//!                 }
//!             }
//!         }
//!         Ruling::End | Ruling::Empty => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod fixed;
pub mod kernel;
pub mod unified;

#[cfg(test)]
mod tests;

use std::fmt;

pub use fixed::FixedArbiter;
pub use kernel::KernelArbiter;
pub use unified::UnifiedArbiter;

/// Small integer handle for a registered source.
pub type SlotId = u8;

/// Outcome of a ruling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ruling {
    /// The source in this slot holds the earliest record.
    Source(SlotId),
    /// The embedded timer fired.
    Timeout,
    /// The readiness poll was interrupted by a signal.
    Interrupt,
    /// Every live source is exhausted.
    End,
    /// Nothing is registered, or everything was withdrawn.
    Empty,
}

impl Ruling {
    /// The winning slot, if a source won.
    #[inline]
    #[must_use]
    pub fn source(self) -> Option<SlotId> {
        match self {
            Self::Source(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Ruling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(id) => write!(f, "source {id}"),
            Self::Timeout => write!(f, "timeout"),
            Self::Interrupt => write!(f, "interrupt"),
            Self::End => write!(f, "end"),
            Self::Empty => write!(f, "empty"),
        }
    }
}
