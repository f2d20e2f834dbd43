/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Readiness-driven arbiter over kernel descriptors.
//!
//! Registered descriptors are watched through an epoll instance. A poll only
//! happens once every previously ready slot has been consumed; each slot that
//! becomes ready is stamped with the clock reading taken right after the
//! poll returned, and keeps that stamp until `read_complete`.

use super::{Ruling, SlotId};
use crate::clock::Clock;
use crate::error::ArbiterError;
use crate::source::{MAX_TIMESTAMP, Timestamp};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use tracing::{debug, error, warn};

/// Events drained per poll.
pub const MAX_EVENTS: usize = 8;

/// Arbiter over sockets and other pollable descriptors.
///
/// The arbiter keeps its own duplicate of every registered descriptor, so
/// releasing a slot after a hangup never closes the caller's handle.
pub struct KernelArbiter<C: Clock> {
    epoll: OwnedFd,
    fds: Vec<Option<OwnedFd>>,
    next_timestamp: Vec<Timestamp>,
    live: usize,
    num_ready: usize,
    interrupted: bool,
    clock: C,
}

impl<C: Clock> KernelArbiter<C> {
    /// Creates an arbiter with its own epoll instance.
    pub fn new(clock: C) -> Result<Self, ArbiterError> {
        // SAFETY: plain syscall, the result is checked below.
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw == -1 {
            let err = io::Error::last_os_error();
            error!(error = %err, "epoll_create1 failed");
            return Err(err.into());
        }
        // SAFETY: `raw` is a fresh descriptor that nothing else owns.
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self {
            epoll,
            fds: Vec::new(),
            next_timestamp: Vec::new(),
            live: 0,
            num_ready: 0,
            interrupted: false,
            clock,
        })
    }

    /// Registers a descriptor in the first free slot.
    pub fn submit(&mut self, fd: BorrowedFd<'_>) -> Result<SlotId, ArbiterError> {
        self.submit_with_hint(fd, 0)
    }

    /// Registers a descriptor in the first free slot at or after `hint`.
    ///
    /// The descriptor is switched to non-blocking mode.
    pub fn submit_with_hint(
        &mut self,
        fd: BorrowedFd<'_>,
        hint: SlotId,
    ) -> Result<SlotId, ArbiterError> {
        let start = (hint as usize).min(self.fds.len());
        let idx = (start..self.fds.len())
            .find(|&i| self.fds[i].is_none() && self.next_timestamp[i] == MAX_TIMESTAMP)
            .unwrap_or(self.fds.len());
        if idx >= SlotId::MAX as usize {
            error!(slots = self.fds.len(), "kernel arbiter out of slot ids");
            return Err(ArbiterError::IdSpaceExhausted);
        }

        let owned = fd.try_clone_to_owned()?;
        set_nonblocking(&owned)?;
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: idx as u64,
        };
        // SAFETY: both descriptors are open and `event` outlives the call.
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                owned.as_raw_fd(),
                &mut event,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            error!(fd = owned.as_raw_fd(), error = %err, "epoll_ctl add failed");
            return Err(err.into());
        }

        if idx == self.fds.len() {
            self.fds.push(Some(owned));
            self.next_timestamp.push(MAX_TIMESTAMP);
        } else {
            self.fds[idx] = Some(owned);
            self.next_timestamp[idx] = MAX_TIMESTAMP;
        }
        self.live += 1;
        debug!(id = idx, fd = fd.as_raw_fd(), "registered descriptor");
        Ok(idx as SlotId)
    }

    /// Unregisters slot `id`. A slot that was ready but not yet consumed is
    /// dropped from the ready count.
    pub fn withdraw(&mut self, id: SlotId) {
        let idx = id as usize;
        let Some(ts) = self.next_timestamp.get_mut(idx) else {
            warn!(id, "ignoring withdraw of an unknown slot");
            return;
        };
        if *ts != MAX_TIMESTAMP {
            *ts = MAX_TIMESTAMP;
            self.num_ready = self.num_ready.saturating_sub(1);
        }
        if self.release(idx) {
            self.live -= 1;
            debug!(id, live = self.live, "withdrew descriptor");
        }
    }

    /// Marks slot `id` as consumed; it waits for the next poll.
    #[inline]
    pub fn read_complete(&mut self, id: SlotId) {
        if let Some(ts) = self.next_timestamp.get_mut(id as usize) {
            if *ts != MAX_TIMESTAMP {
                *ts = MAX_TIMESTAMP;
                self.num_ready = self.num_ready.saturating_sub(1);
            }
        }
    }

    /// Poll timestamp of slot `id`, or `MAX` when it is not ready.
    #[inline]
    #[must_use]
    pub fn winning_time(&self, id: SlotId) -> Timestamp {
        self.next_timestamp
            .get(id as usize)
            .copied()
            .unwrap_or(MAX_TIMESTAMP)
    }

    /// Whether slot `id` still holds a registered descriptor. A slot released
    /// after a hangup reads `false` while its final stamp is still pending.
    #[inline]
    #[must_use]
    pub fn is_registered(&self, id: SlotId) -> bool {
        self.fds.get(id as usize).is_some_and(Option::is_some)
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots stamped ready and not yet consumed.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.num_ready
    }

    /// Clock used to stamp readiness.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Picks the ready slot with the earliest stamp.
    ///
    /// Polls without blocking when nothing is pending. Returns
    /// [`Ruling::End`] when descriptors are registered but none is ready.
    pub fn ruling(&mut self) -> Ruling {
        if self.live == 0 && self.num_ready == 0 {
            return Ruling::Empty;
        }
        if self.num_ready == 0 {
            self.poll();
            if self.interrupted {
                self.interrupted = false;
                return Ruling::Interrupt;
            }
        }
        let mut winner = None;
        let mut best = MAX_TIMESTAMP;
        for (idx, &ts) in self.next_timestamp.iter().enumerate() {
            if ts < best {
                best = ts;
                winner = Some(idx as SlotId);
            }
        }
        winner.map_or(Ruling::End, Ruling::Source)
    }

    fn poll(&mut self) {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        // SAFETY: `events` has room for MAX_EVENTS entries; timeout 0 never blocks.
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                0,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                self.interrupted = true;
            } else {
                error!(error = %err, "epoll_wait failed");
            }
            return;
        }

        let now = self.clock.now();
        let mut ready = 0;
        for event in &events[..n as usize] {
            let flags = event.events;
            let idx = event.u64 as usize;
            let Some(ts) = self.next_timestamp.get_mut(idx) else {
                continue;
            };
            *ts = (*ts).min(now);
            ready += 1;
            if flags & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0 {
                warn!(id = idx, flags, "descriptor hung up, releasing slot");
                if self.release(idx) {
                    self.live -= 1;
                }
            }
        }
        self.num_ready = ready;
    }

    /// Unregisters and closes the arbiter's duplicate. Returns whether the
    /// slot held a descriptor.
    fn release(&mut self, idx: usize) -> bool {
        let Some(fd) = self.fds.get_mut(idx).and_then(Option::take) else {
            return false;
        };
        // SAFETY: both descriptors are open; a null event is accepted for DEL.
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd.as_raw_fd(),
                std::ptr::null_mut(),
            )
        };
        if rc == -1 {
            warn!(
                id = idx,
                error = %io::Error::last_os_error(),
                "epoll_ctl del failed"
            );
        }
        true
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: `fd` is open for the duration of both calls.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
