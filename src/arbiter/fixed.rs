/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Fixed-capacity, syscall-free arbiter.
//!
//! Slot 0 always holds the embedded timer; sources occupy slots
//! `1..=CAPACITY`. The timestamp table is padded to at least eight entries so
//! that small arbiters can run a branchless pairwise-minimum tournament over
//! a table of constant shape. Larger arbiters fall back to a linear scan.
//!
//! A slot whose timestamp is [`WITHDRAWN`] never wins: before comparison each
//! timestamp is folded into an eligibility key where both `WITHDRAWN` and
//! `MAX` collapse to `MAX`. Equal keys go to the lower slot id.

use super::{Ruling, SlotId};
use crate::clock::Clock;
use crate::error::ArbiterError;
use crate::source::{MAX_TIMESTAMP, RECHECK, Shared, Source, Timestamp, WITHDRAWN, select};
use crate::sources::NullTimer;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Capacities below this use the tournament and require every slot filled.
pub const TOURNAMENT_LIMIT: usize = 8;

const TIMER_SLOT: usize = 0;

const fn table_len(capacity: usize) -> usize {
    if capacity + 1 > TOURNAMENT_LIMIT {
        capacity + 1
    } else {
        TOURNAMENT_LIMIT
    }
}

/// Folds withdrawn and exhausted slots onto `MAX`.
#[inline(always)]
fn key(ts: Timestamp) -> Timestamp {
    ts | ((ts >= WITHDRAWN) as u64).wrapping_neg()
}

/// Arbiter over a fixed number of poll-free sources and one timer.
pub struct FixedArbiter<C: Clock, S: Source, const CAPACITY: usize, T: Source = NullTimer> {
    next_timestamp: Box<[Timestamp]>,
    streams: Box<[Option<Shared<S>>]>,
    free_ids: VecDeque<SlotId>,
    last_stream_index: usize,
    live: usize,
    submission_completed: bool,
    timer: T,
    clock: C,
}

impl<C: Clock, S: Source, const CAPACITY: usize, T: Source> FixedArbiter<C, S, CAPACITY, T> {
    const VALID_CAPACITY: () = assert!(
        CAPACITY > 0 && CAPACITY < SlotId::MAX as usize,
        "capacity must fit the slot id space"
    );

    /// Creates an empty arbiter with `timer` in slot 0.
    #[must_use]
    pub fn new(clock: C, timer: T) -> Self {
        let () = Self::VALID_CAPACITY;
        let len = table_len(CAPACITY);
        Self {
            next_timestamp: vec![MAX_TIMESTAMP; len].into_boxed_slice(),
            streams: (0..len).map(|_| None).collect(),
            free_ids: VecDeque::with_capacity(CAPACITY),
            last_stream_index: TIMER_SLOT + 1,
            live: 0,
            submission_completed: false,
            timer,
            clock,
        }
    }

    /// Declared capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Clock shared with the sources.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of sources currently under arbitration.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// The embedded timer.
    #[must_use]
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// The embedded timer, for consuming it after a [`Ruling::Timeout`].
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// The live source in slot `id`.
    #[must_use]
    pub fn source(&self, id: SlotId) -> Option<&Shared<S>> {
        let idx = id as usize;
        if idx == TIMER_SLOT || self.next_timestamp.get(idx) == Some(&WITHDRAWN) {
            return None;
        }
        self.streams.get(idx).and_then(Option::as_ref)
    }

    /// Registers a source and returns its slot.
    ///
    /// A source previously withdrawn from this arbiter gets its old slot
    /// back. Submitting a source that is still live is an error.
    pub fn submit(&mut self, source: Shared<S>) -> Result<SlotId, ArbiterError> {
        let previous = (TIMER_SLOT + 1..self.last_stream_index).find(|&i| {
            self.streams[i]
                .as_ref()
                .is_some_and(|s| Rc::ptr_eq(s, &source))
        });
        if let Some(idx) = previous {
            let id = idx as SlotId;
            if self.next_timestamp[idx] != WITHDRAWN {
                error!(id, source = source.borrow().describe(), "resubmitting without withdraw");
                return Err(ArbiterError::ResubmittedLive { id });
            }
            self.free_ids.retain(|free| *free != id);
            self.next_timestamp[idx] = RECHECK;
            self.live += 1;
            debug!(id, source = source.borrow().describe(), "resubmitted source");
            return Ok(id);
        }

        let idx = match self.free_ids.pop_front() {
            Some(id) => id as usize,
            None => {
                if self.last_stream_index > CAPACITY {
                    error!(capacity = CAPACITY, "arbiter overfilled");
                    return Err(ArbiterError::Overfilled { capacity: CAPACITY });
                }
                self.last_stream_index += 1;
                self.last_stream_index - 1
            }
        };
        debug!(id = idx, source = source.borrow().describe(), "submitted source");
        self.streams[idx] = Some(source);
        self.next_timestamp[idx] = RECHECK;
        self.live += 1;
        Ok(idx as SlotId)
    }

    /// Registers a source and checks that it landed in `desired`.
    pub fn submit_as(&mut self, desired: SlotId, source: Shared<S>) -> Result<SlotId, ArbiterError> {
        let returned = self.submit(source)?;
        if returned != desired {
            error!(desired, returned, "lost count in arbiter submission");
            self.withdraw(returned);
            return Err(ArbiterError::LostCount { desired, returned });
        }
        Ok(returned)
    }

    /// Removes a source from arbitration and frees its slot.
    ///
    /// The slot remembers the source, so submitting the same handle again
    /// restores it. Withdrawing the timer slot, an unknown slot or an already
    /// withdrawn one does nothing.
    pub fn withdraw(&mut self, id: SlotId) {
        let idx = id as usize;
        if idx == TIMER_SLOT
            || idx >= self.last_stream_index
            || self.next_timestamp[idx] == WITHDRAWN
        {
            warn!(id, "ignoring withdraw of a slot that is not live");
            return;
        }
        self.next_timestamp[idx] = WITHDRAWN;
        self.free_ids.push_back(id);
        self.live -= 1;
        debug!(id, live = self.live, "withdrew source");
    }

    /// Forces slot `id` to be attested afresh on the next ruling.
    #[inline]
    pub fn read_complete(&mut self, id: SlotId) {
        if let Some(ts) = self.next_timestamp.get_mut(id as usize) {
            *ts = select(*ts == WITHDRAWN, WITHDRAWN, RECHECK);
        }
    }

    /// Last timestamp recorded for slot `id`.
    #[inline]
    #[must_use]
    pub fn winning_time(&self, id: SlotId) -> Timestamp {
        self.next_timestamp
            .get(id as usize)
            .copied()
            .unwrap_or(MAX_TIMESTAMP)
    }

    /// Ends the registration phase.
    ///
    /// Below [`TOURNAMENT_LIMIT`] every declared slot must have been filled.
    pub fn submission_complete(&mut self) -> Result<(), ArbiterError> {
        let submitted = self.last_stream_index - 1;
        if CAPACITY < TOURNAMENT_LIMIT && submitted != CAPACITY {
            error!(capacity = CAPACITY, submitted, "arbiter capacity mismatch");
            return Err(ArbiterError::CapacityMismatch {
                capacity: CAPACITY,
                submitted,
            });
        }
        self.submission_completed = true;
        Ok(())
    }

    /// Picks the source holding the earliest record.
    ///
    /// # Panics
    ///
    /// Below [`TOURNAMENT_LIMIT`], panics if
    /// [`submission_complete`](Self::submission_complete) has not succeeded.
    #[inline]
    pub fn ruling(&mut self) -> Ruling {
        if self.live == 0 {
            return Ruling::Empty;
        }
        self.timer.attest(&mut self.next_timestamp[TIMER_SLOT]);
        let winner = if CAPACITY < TOURNAMENT_LIMIT {
            if !self.submission_completed {
                error!(capacity = CAPACITY, "ruling requested before submission_complete");
                panic!("submission_complete() must succeed before ruling()");
            }
            for idx in 1..=CAPACITY {
                self.attest_slot(idx);
            }
            self.tournament()
        } else {
            for idx in 1..self.last_stream_index {
                self.attest_slot(idx);
            }
            self.scan()
        };
        self.outcome(winner)
    }

    /// Linear-scan ruling with no registration requirement.
    pub fn slow_ruling(&mut self) -> Ruling {
        if self.live == 0 {
            return Ruling::Empty;
        }
        self.timer.attest(&mut self.next_timestamp[TIMER_SLOT]);
        for idx in 1..self.last_stream_index {
            self.attest_slot(idx);
        }
        let winner = self.scan();
        self.outcome(winner)
    }

    /// Refreshes one slot. A withdrawn slot stays withdrawn whatever the
    /// source reports.
    #[inline(always)]
    fn attest_slot(&mut self, idx: usize) {
        if let Some(stream) = &self.streams[idx] {
            let ts = &mut self.next_timestamp[idx];
            let before = *ts;
            stream.borrow_mut().attest(ts);
            *ts = select(before == WITHDRAWN, before, *ts);
        }
    }

    #[inline(always)]
    fn min_of_2(&self, i: usize, j: usize) -> usize {
        let take_j = key(self.next_timestamp[j]) < key(self.next_timestamp[i]);
        select(take_j, j as u64, i as u64) as usize
    }

    #[inline(always)]
    fn tournament(&self) -> usize {
        if CAPACITY == 1 {
            self.min_of_2(0, 1)
        } else if CAPACITY <= 3 {
            let a = self.min_of_2(0, 1);
            let b = self.min_of_2(2, 3);
            self.min_of_2(a, b)
        } else {
            let a = self.min_of_2(0, 1);
            let b = self.min_of_2(2, 3);
            let c = self.min_of_2(4, 5);
            let d = self.min_of_2(6, 7);
            let e = self.min_of_2(a, b);
            let f = self.min_of_2(c, d);
            self.min_of_2(e, f)
        }
    }

    #[inline]
    fn scan(&self) -> usize {
        let mut winner = TIMER_SLOT;
        for idx in 1..self.last_stream_index {
            if key(self.next_timestamp[idx]) < key(self.next_timestamp[winner]) {
                winner = idx;
            }
        }
        winner
    }

    #[inline(always)]
    fn outcome(&self, winner: usize) -> Ruling {
        if key(self.next_timestamp[winner]) == MAX_TIMESTAMP {
            Ruling::End
        } else if winner == TIMER_SLOT {
            Ruling::Timeout
        } else {
            Ruling::Source(winner as SlotId)
        }
    }
}
