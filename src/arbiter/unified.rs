/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! One public id space over a fixed-capacity and a kernel-backed arbiter.
//!
//! Poll-free sources go to the fixed arbiter and keep its slot ids
//! (`1..=MMAP_CAPACITY`). Kernel sources go to the kernel arbiter and their
//! ids are shifted past `MMAP_CAPACITY`. Callers never see either numbering:
//! every submission is mapped to a public id of the caller's choosing.

use super::fixed::{FixedArbiter, TOURNAMENT_LIMIT};
use super::kernel::KernelArbiter;
use super::{Ruling, SlotId};
use crate::clock::Clock;
use crate::error::ArbiterError;
use crate::source::{Shared, Source};
use crate::sources::{AnySource, NullTimer};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Arbiter over sources of both readiness models.
pub struct UnifiedArbiter<C: Clock, const MMAP_CAPACITY: usize = 16, T: Source = NullTimer> {
    mmap: FixedArbiter<C, AnySource<C>, MMAP_CAPACITY, T>,
    kernel: KernelArbiter<C>,
    public_to_unified: HashMap<SlotId, SlotId>,
    unified_to_public: HashMap<SlotId, SlotId>,
    sources: HashMap<SlotId, Shared<AnySource<C>>>,
}

impl<C: Clock, const MMAP_CAPACITY: usize, T: Source> UnifiedArbiter<C, MMAP_CAPACITY, T> {
    const VALID_CAPACITY: () = assert!(
        MMAP_CAPACITY > TOURNAMENT_LIMIT,
        "unified arbiter needs a scanning fixed arbiter"
    );

    const KERNEL_BASE: usize = MMAP_CAPACITY + 1;

    /// Creates an empty arbiter with `timer` in the fixed arbiter's slot 0.
    pub fn new(clock: C, timer: T) -> Result<Self, ArbiterError> {
        let () = Self::VALID_CAPACITY;
        Ok(Self {
            mmap: FixedArbiter::new(clock.clone(), timer),
            kernel: KernelArbiter::new(clock)?,
            public_to_unified: HashMap::new(),
            unified_to_public: HashMap::new(),
            sources: HashMap::new(),
        })
    }

    /// Registers a source under public id `desired`, or under its unified
    /// id when `desired` is `None`. Returns the public id.
    pub fn submit(
        &mut self,
        desired: Option<SlotId>,
        source: Shared<AnySource<C>>,
    ) -> Result<SlotId, ArbiterError> {
        if let Some(public) = desired {
            if self.public_to_unified.contains_key(&public) {
                error!(public, "public id already mapped");
                return Err(ArbiterError::PublicIdInUse(public));
            }
        }

        let is_kernel = source.borrow().is_kernel();
        let unified = if is_kernel {
            let id = {
                let handle = source.borrow();
                let fd = handle.as_fd()?;
                self.kernel.submit(fd)?
            };
            let unified = id as usize + Self::KERNEL_BASE;
            if unified >= SlotId::MAX as usize {
                self.kernel.withdraw(id);
                error!(kernel_id = id, "unified id space exhausted");
                return Err(ArbiterError::IdSpaceExhausted);
            }
            unified as SlotId
        } else {
            self.mmap.submit(source.clone())?
        };

        if let Some(&holder) = self.unified_to_public.get(&unified) {
            self.withdraw_unified(unified);
            error!(holder, unified, "unified id still mapped to another public id");
            return Err(ArbiterError::UnifiedIdInUse(unified));
        }
        let public = desired.unwrap_or(unified);
        if self.public_to_unified.contains_key(&public) {
            self.withdraw_unified(unified);
            error!(public, unified, "public id already mapped");
            return Err(ArbiterError::PublicIdInUse(public));
        }
        debug!(
            public,
            unified,
            kernel = is_kernel,
            source = source.borrow().describe(),
            "submitted source"
        );
        self.public_to_unified.insert(public, unified);
        self.unified_to_public.insert(unified, public);
        self.sources.insert(public, source);
        Ok(public)
    }

    /// Ends the registration phase. Nothing to check at this capacity.
    pub fn submission_complete(&mut self) -> Result<(), ArbiterError> {
        Ok(())
    }

    /// Removes the source mapped to `public` and retires the id.
    pub fn withdraw(&mut self, public: SlotId) {
        let Some(unified) = self.retire(public) else {
            warn!(public, "ignoring withdraw of an unknown public id");
            return;
        };
        self.withdraw_unified(unified);
        debug!(public, unified, "withdrew source");
    }

    /// Marks the record of `public` as consumed.
    ///
    /// A kernel source whose descriptor hung up is retired here, once its
    /// last readiness has been consumed; its public id becomes free again.
    pub fn read_complete(&mut self, public: SlotId) {
        match self.public_to_unified.get(&public).copied() {
            Some(unified) if (unified as usize) < Self::KERNEL_BASE => {
                self.mmap.read_complete(unified);
            }
            Some(unified) => {
                let kernel_id = (unified as usize - Self::KERNEL_BASE) as SlotId;
                self.kernel.read_complete(kernel_id);
                if !self.kernel.is_registered(kernel_id) {
                    self.retire(public);
                    debug!(public, unified, "retired hung-up source");
                }
            }
            None => warn!(public, "ignoring read_complete of an unknown public id"),
        }
    }

    /// The source registered under `public`.
    #[must_use]
    pub fn source(&self, public: SlotId) -> Option<&Shared<AnySource<C>>> {
        self.sources.get(&public)
    }

    /// Clock shared with the sources.
    #[must_use]
    pub fn clock(&self) -> &C {
        self.mmap.clock()
    }

    /// The embedded timer, for consuming it after a [`Ruling::Timeout`].
    pub fn timer_mut(&mut self) -> &mut T {
        self.mmap.timer_mut()
    }

    /// Number of live sources across both sub-arbiters.
    #[must_use]
    pub fn live(&self) -> usize {
        self.mmap.live() + self.kernel.live()
    }

    /// Picks the source holding the earliest record across both families.
    ///
    /// A [`Ruling::Timeout`] means the timer fired; its slot is re-armed
    /// here and the caller consumes the timer through
    /// [`timer_mut`](Self::timer_mut).
    pub fn ruling(&mut self) -> Ruling {
        let mmap = self.mmap.slow_ruling();
        let kernel = self.kernel.ruling();
        let mmap_time = match mmap {
            Ruling::Source(id) => Some(self.mmap.winning_time(id)),
            Ruling::Timeout => Some(self.mmap.winning_time(0)),
            _ => None,
        };

        match (mmap, kernel) {
            (Ruling::Empty, Ruling::Empty) => Ruling::Empty,
            (Ruling::Empty | Ruling::End, Ruling::Empty | Ruling::End) => Ruling::End,
            (Ruling::Empty | Ruling::End, Ruling::Interrupt) => Ruling::Interrupt,
            (Ruling::Empty | Ruling::End, Ruling::Source(k)) => self.kernel_outcome(k),
            (_, Ruling::Source(k))
                if mmap_time.is_some_and(|t| self.kernel.winning_time(k) < t) =>
            {
                self.kernel_outcome(k)
            }
            (Ruling::Timeout, _) => {
                self.mmap.read_complete(0);
                Ruling::Timeout
            }
            (Ruling::Source(id), _) => self.public_outcome(id),
            (other, _) => other,
        }
    }

    fn kernel_outcome(&self, kernel_id: SlotId) -> Ruling {
        self.public_outcome((kernel_id as usize + Self::KERNEL_BASE) as SlotId)
    }

    fn public_outcome(&self, unified: SlotId) -> Ruling {
        match self.unified_to_public.get(&unified) {
            Some(&public) => Ruling::Source(public),
            None => {
                error!(unified, "winning slot has no public id");
                Ruling::End
            }
        }
    }

    /// Drops every mapping of `public`, returning the unified id it held.
    fn retire(&mut self, public: SlotId) -> Option<SlotId> {
        let unified = self.public_to_unified.remove(&public)?;
        self.unified_to_public.remove(&unified);
        self.sources.remove(&public);
        Some(unified)
    }

    fn withdraw_unified(&mut self, unified: SlotId) {
        if (unified as usize) < Self::KERNEL_BASE {
            self.mmap.withdraw(unified);
        } else {
            self.kernel
                .withdraw((unified as usize - Self::KERNEL_BASE) as SlotId);
        }
    }
}
