/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Cross-process shared logs.
//!
//! A shared log is an append-only file with exactly one writer process and
//! any number of readers. Readers never take a lock and never make a
//! syscall in the steady state: the writer fills in a record, then
//! publishes the new `write_offset` with release ordering, and a reader
//! acquires that offset before touching any byte below it.
//!
//! # Examples
//!
//! ```no_run
//! use arbiter_rs::clock::RealClock;
//! use arbiter_rs::descriptor::StreamOptions;
//! use arbiter_rs::shm::{SharedLogReader, SharedLogWriter};
//! use arbiter_rs::source::Source;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = SharedLogWriter::create_path(RealClock::new(), "/dev/shm/md.log", 0)?;
//! writer.append(b"hello")?;
//!
//! let mut reader =
//!     SharedLogReader::open_path(RealClock::new(), "/dev/shm/md.log", StreamOptions::empty())?;
//! let record = reader.read().expect("one record");
//! assert_eq!(record.payload, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod layout;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod tests;

pub use layout::{
    CACHE_LINE, DEFAULT_MAPPING_SIZE, HEADER_SIZE, LOG_MAGIC, MAX_RECORD_SIZE, MIN_MAPPING_SIZE,
};
pub use reader::SharedLogReader;
pub use writer::SharedLogWriter;
