/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Concrete sources that take part in arbitration.
//!
//! Shared logs live in [`crate::shm`]. This module holds everything else a
//! descriptor can name: timers, sockets, compressed archives and capture
//! files, plus the run-time [`AnySource`] wrapper over all of them.

pub mod any;
pub mod archive;
pub mod net;
pub mod pcap;
pub mod timer;

#[cfg(test)]
mod tests;

pub use any::AnySource;
pub use archive::{ArchiveReader, compress_log};
pub use net::{TcpListenerSource, TcpStreamSource, UdpSource};
pub use pcap::PcapReader;
pub use timer::{NullTimer, Timer};
