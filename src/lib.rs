/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! # arbiter-rs
//!
//! A sequencing backbone for latency-sensitive trading processes. Many
//! independent producers (memory-mapped logs written by other processes,
//! sockets, capture files, compressed archives, timers) are merged into one
//! strictly time-ordered stream: at every step the caller asks an arbiter
//! which source holds the globally earliest record, reads exactly that
//! record, and asks again.
//!
//! ## Building blocks
//!
//! - [`shm`]: cross-process shared logs. One writer process, any number of
//!   lock-free readers that observe records through acquire/release
//!   publication of the write offset.
//! - [`arbiter::FixedArbiter`]: branchless minimum selection over a fixed
//!   number of sources that can report their next timestamp without a
//!   syscall, plus an embedded timer.
//! - [`arbiter::KernelArbiter`]: epoll-driven selection over sockets, which
//!   are stamped with the time at which readiness was observed.
//! - [`arbiter::UnifiedArbiter`]: both of the above behind one public id
//!   space.
//! - [`sources::AnySource`]: a run-time choice of source kind, built from a
//!   descriptor string such as `shm:/dev/shm/md.log@follow`.
//!
//! Everything here is single-threaded. Cross-process visibility of shared
//! logs is the only concurrency, and it never takes a lock on the read side.
//!
//! ## Example
//!
//! ```no_run
//! use arbiter_rs::arbiter::Ruling;
//! use arbiter_rs::config::{SessionArbiter, SessionConfig};
//! use arbiter_rs::source::Source;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_path("session.json")?;
//! let mut arbiter = SessionArbiter::from_config(&config)?;
//! loop {
//!     match arbiter.ruling() {
//!         Ruling::Source(id) => {
//!             if let Some(source) = arbiter.source(id).cloned() {
//!                 if let Some(record) = source.borrow_mut().read() {
//!                     println!("{id}: {} bytes at {}", record.len(), record.timestamp);
//!                 }
//!             }
//!             arbiter.read_complete(id);
//!         }
//!         Ruling::Timeout => {
//!             arbiter.timer_mut().read();
//!         }
//!         Ruling::Interrupt => continue,
//!         Ruling::End | Ruling::Empty => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("arbiter-rs relies on mmap and epoll and only builds on Linux");

pub mod arbiter;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod shm;
pub mod source;
pub mod sources;

pub use arbiter::{FixedArbiter, KernelArbiter, Ruling, SlotId, UnifiedArbiter};
pub use clock::{AnyClock, Clock, EventClock, RealClock, ReplayClock};
pub use config::{SessionArbiter, SessionConfig, SourceConfig};
pub use descriptor::{Descriptor, SourceKind, StreamOptions};
pub use error::{ArbiterError, StreamError};
pub use shm::{SharedLogReader, SharedLogWriter};
pub use source::{
    MAX_TIMESTAMP, NOTHING_TO_READ, RECHECK, Record, Shared, Source, Timestamp, WITHDRAWN, shared,
};
pub use sources::AnySource;
