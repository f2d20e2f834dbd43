/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Type-erased source handle.
//!
//! [`AnySource`] is a closed enum over every source kind, for when the kind
//! is only known from a descriptor at run time. Dispatch is a `match` on the
//! variant.

use super::archive::ArchiveReader;
use super::net::{TcpListenerSource, TcpStreamSource, UdpSource};
use super::pcap::PcapReader;
use super::timer::{NullTimer, Timer};
use crate::clock::Clock;
use crate::descriptor::{Descriptor, SourceKind};
use crate::error::StreamError;
use crate::shm::SharedLogReader;
use crate::source::{Record, Source, Timestamp};
use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use tracing::debug;

/// Any source, chosen at run time.
pub enum AnySource<C: Clock> {
    /// Shared log reader.
    SharedLog(SharedLogReader<C>),
    /// Listening TCP socket.
    TcpListener(TcpListenerSource<C>),
    /// Connected TCP socket.
    TcpStream(TcpStreamSource<C>),
    /// Bound UDP socket.
    Udp(UdpSource<C>),
    /// Periodic timer.
    Timer(Timer<C>),
    /// Timer that never fires.
    NullTimer(NullTimer),
    /// Compressed shared log.
    Archive(ArchiveReader<C>),
    /// Capture file.
    Pcap(PcapReader<C>),
}

macro_rules! dispatch {
    ($self:expr, $source:ident => $body:expr) => {
        match $self {
            AnySource::SharedLog($source) => $body,
            AnySource::TcpListener($source) => $body,
            AnySource::TcpStream($source) => $body,
            AnySource::Udp($source) => $body,
            AnySource::Timer($source) => $body,
            AnySource::NullTimer($source) => $body,
            AnySource::Archive($source) => $body,
            AnySource::Pcap($source) => $body,
        }
    };
}

impl<C: Clock> AnySource<C> {
    /// Opens the source a descriptor names.
    ///
    /// A `tcp` descriptor connects to its address; use
    /// [`from_fd`](AnySource::from_fd) or
    /// [`from_tcp_stream`](AnySource::from_tcp_stream) to wrap a connection
    /// that already exists.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        debug!(descriptor = %descriptor, "opening source");
        Ok(match descriptor.kind {
            SourceKind::SharedLog => Self::SharedLog(SharedLogReader::open(clock, descriptor)?),
            SourceKind::TcpListener => {
                Self::TcpListener(TcpListenerSource::open(clock, descriptor)?)
            }
            SourceKind::TcpStream => Self::TcpStream(TcpStreamSource::connect(clock, descriptor)?),
            SourceKind::Udp => Self::Udp(UdpSource::open(clock, descriptor)?),
            SourceKind::Timer => Self::Timer(Timer::open(clock, descriptor)?),
            SourceKind::NullTimer => Self::NullTimer(NullTimer::new()),
            SourceKind::Archive => Self::Archive(ArchiveReader::open(clock, descriptor)?),
            SourceKind::Pcap => Self::Pcap(PcapReader::open(clock, descriptor)?),
        })
    }

    /// Wraps an already open descriptor. Only `tcp` descriptors qualify.
    pub fn from_fd(clock: C, fd: OwnedFd, descriptor: &Descriptor) -> Result<Self, StreamError> {
        if descriptor.kind != SourceKind::TcpStream {
            return Err(StreamError::UnsupportedConstruction {
                kind: descriptor.kind.to_string(),
                how: "from a file descriptor",
            });
        }
        Ok(Self::from_tcp_stream(
            clock,
            TcpStream::from(fd),
            descriptor.to_string(),
        ))
    }

    /// Wraps a connected stream, e.g. one accepted by a listener source.
    #[must_use]
    pub fn from_tcp_stream(clock: C, stream: TcpStream, description: String) -> Self {
        Self::TcpStream(TcpStreamSource::from_stream(clock, stream, description))
    }

    /// Kind of the wrapped source.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::SharedLog(_) => SourceKind::SharedLog,
            Self::TcpListener(_) => SourceKind::TcpListener,
            Self::TcpStream(_) => SourceKind::TcpStream,
            Self::Udp(_) => SourceKind::Udp,
            Self::Timer(_) => SourceKind::Timer,
            Self::NullTimer(_) => SourceKind::NullTimer,
            Self::Archive(_) => SourceKind::Archive,
            Self::Pcap(_) => SourceKind::Pcap,
        }
    }

    /// Whether this source needs kernel readiness notification.
    #[inline]
    #[must_use]
    pub fn is_kernel(&self) -> bool {
        self.kind().is_kernel()
    }

    /// Borrows the kernel descriptor of a kernel-backed source.
    pub fn as_fd(&self) -> Result<BorrowedFd<'_>, StreamError> {
        match self {
            Self::TcpListener(s) => Ok(s.as_fd()),
            Self::TcpStream(s) => Ok(s.as_fd()),
            Self::Udp(s) => Ok(s.as_fd()),
            other => Err(StreamError::NotKernel {
                description: other.describe().to_string(),
            }),
        }
    }

    /// Raw kernel descriptor of a kernel-backed source.
    pub fn get_fd(&self) -> Result<RawFd, StreamError> {
        self.as_fd().map(|fd| fd.as_raw_fd())
    }

    /// Skips records below `stop_ts` on replayable sources. See
    /// [`SharedLogReader::fast_forward`] for the meaning of 0. Other kinds
    /// skip nothing.
    pub fn fast_forward(&mut self, stop_ts: Timestamp) -> usize {
        match self {
            Self::SharedLog(s) => s.fast_forward(stop_ts),
            Self::Archive(s) => s.fast_forward(stop_ts),
            _ => 0,
        }
    }

    /// Last timestamp published by the writer of a shared log.
    #[must_use]
    pub fn last_write_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::SharedLog(s) => Some(s.last_write_timestamp()),
            _ => None,
        }
    }

    /// Takes the connection accepted by a listener's last read.
    pub fn take_accepted(&mut self) -> Option<(TcpStream, std::net::SocketAddr)> {
        match self {
            Self::TcpListener(s) => s.take_accepted(),
            _ => None,
        }
    }
}

impl<C: Clock> Source for AnySource<C> {
    #[inline]
    fn attest(&mut self, next_ts: &mut Timestamp) {
        dispatch!(self, s => s.attest(next_ts))
    }

    #[inline]
    fn read(&mut self) -> Option<Record<'_>> {
        dispatch!(self, s => s.read())
    }

    fn describe(&self) -> &str {
        dispatch!(self, s => s.describe())
    }
}
