/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Socket sources.
//!
//! None of these can report a next timestamp without a syscall, so their
//! `attest` leaves the slot untouched and they are meant to be arbitrated by
//! the kernel-backed arbiter, which stamps them with the poll time. Records
//! they return carry the clock's time at the moment of the read.

use crate::clock::Clock;
use crate::descriptor::Descriptor;
use crate::error::StreamError;
use crate::source::{Record, Source, Timestamp};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use tracing::{info, warn};

/// Receive buffer size for stream and datagram sockets.
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Turns `*:port` into a bindable wildcard address.
fn bind_address(path: &str) -> String {
    match path.strip_prefix("*:") {
        Some(port) => format!("0.0.0.0:{port}"),
        None => path.to_string(),
    }
}

/// Listening TCP socket. Each read accepts one pending connection.
#[derive(Debug)]
pub struct TcpListenerSource<C: Clock> {
    listener: TcpListener,
    accepted: Option<(TcpStream, SocketAddr)>,
    peer: String,
    clock: C,
    description: String,
}

impl<C: Clock> TcpListenerSource<C> {
    /// Binds the address named by a `tcp_listen:<ip>:<port>` descriptor.
    /// An ip of `*` listens on every interface.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let address = bind_address(&descriptor.path);
        let listener =
            TcpListener::bind(&address).map_err(|e| StreamError::io(&address, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| StreamError::io(&address, e))?;
        info!(address = %address, "listening for tcp connections");
        Ok(Self {
            listener,
            accepted: None,
            peer: String::new(),
            clock,
            description: descriptor.to_string(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        self.listener
            .local_addr()
            .map_err(|e| StreamError::io(&self.description, e))
    }

    /// Takes the connection accepted by the last successful read.
    pub fn take_accepted(&mut self) -> Option<(TcpStream, SocketAddr)> {
        self.accepted.take()
    }
}

impl<C: Clock> Source for TcpListenerSource<C> {
    #[inline(always)]
    fn attest(&mut self, _next_ts: &mut Timestamp) {}

    fn read(&mut self) -> Option<Record<'_>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                info!(listener = %self.description, peer = %addr, "accepted connection");
                self.peer = addr.to_string();
                self.accepted = Some((stream, addr));
                Some(Record::new(self.clock.now(), self.peer.as_bytes()))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(listener = %self.description, error = %e, "accept failed");
                None
            }
        }
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

impl<C: Clock> AsFd for TcpListenerSource<C> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

/// Connected TCP socket. Each read returns the bytes of one `recv`.
#[derive(Debug)]
pub struct TcpStreamSource<C: Clock> {
    stream: TcpStream,
    buffer: Box<[u8]>,
    clock: C,
    description: String,
}

impl<C: Clock> TcpStreamSource<C> {
    /// Connects to the address named by a `tcp:<host>:<port>` descriptor.
    pub fn connect(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let stream = TcpStream::connect(&descriptor.path)
            .map_err(|e| StreamError::io(&descriptor.path, e))?;
        info!(address = %descriptor.path, "connected tcp stream");
        Ok(Self::from_stream(clock, stream, descriptor.to_string()))
    }

    /// Wraps an already connected stream, e.g. one taken from a listener.
    #[must_use]
    pub fn from_stream(clock: C, stream: TcpStream, description: String) -> Self {
        Self {
            stream,
            buffer: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            clock,
            description,
        }
    }

    /// The underlying stream.
    #[must_use]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl<C: Clock> Source for TcpStreamSource<C> {
    #[inline(always)]
    fn attest(&mut self, _next_ts: &mut Timestamp) {}

    /// `None` on orderly shutdown, on error, and when nothing is pending.
    fn read(&mut self) -> Option<Record<'_>> {
        match self.stream.read(&mut self.buffer) {
            Ok(0) => None,
            Ok(n) => Some(Record::new(self.clock.now(), &self.buffer[..n])),
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(stream = %self.description, error = %e, "tcp read failed");
                None
            }
        }
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

impl<C: Clock> AsFd for TcpStreamSource<C> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Bound UDP socket. Each read returns one datagram.
#[derive(Debug)]
pub struct UdpSource<C: Clock> {
    socket: UdpSocket,
    buffer: Box<[u8]>,
    clock: C,
    description: String,
}

impl<C: Clock> UdpSource<C> {
    /// Binds the address named by a `udp:<ip>:<port>` descriptor.
    pub fn open(clock: C, descriptor: &Descriptor) -> Result<Self, StreamError> {
        let address = bind_address(&descriptor.path);
        let socket = UdpSocket::bind(&address).map_err(|e| StreamError::io(&address, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| StreamError::io(&address, e))?;
        info!(address = %address, "bound udp socket");
        Ok(Self {
            socket,
            buffer: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            clock,
            description: descriptor.to_string(),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        self.socket
            .local_addr()
            .map_err(|e| StreamError::io(&self.description, e))
    }
}

impl<C: Clock> Source for UdpSource<C> {
    #[inline(always)]
    fn attest(&mut self, _next_ts: &mut Timestamp) {}

    fn read(&mut self) -> Option<Record<'_>> {
        match self.socket.recv(&mut self.buffer) {
            Ok(n) => Some(Record::new(self.clock.now(), &self.buffer[..n])),
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(socket = %self.description, error = %e, "udp recv failed");
                None
            }
        }
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

impl<C: Clock> AsFd for UdpSource<C> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}
