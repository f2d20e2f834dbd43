/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Clocks consumed by sources and arbiters.
//!
//! Every clock exposes the same capability surface: read the current time,
//! and, for the settable variants, move it forward. Settable clocks are
//! cheap handles: clones share the same underlying time, so a log reader
//! running in `timed` mode and the arbiter polling sockets observe the
//! same instant.

use crate::error::StreamError;
use crate::source::Timestamp;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Instant;

/// Identifies a clock implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Wall clock, not settable.
    Real,
    /// Driven entirely by the timestamps pushed into it.
    Event,
    /// Deterministic replay, optionally paced against real time.
    Replay,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "real_clock"),
            Self::Event => write!(f, "event_clock"),
            Self::Replay => write!(f, "replay_clock"),
        }
    }
}

/// Uniform clock capability.
pub trait Clock: Clone {
    /// Current time in nanoseconds.
    fn now(&self) -> Timestamp;

    /// Moves the clock to `ts`. A no-op for clocks that cannot be set.
    fn set(&self, ts: Timestamp);

    /// Whether [`set`](Clock::set) has any effect.
    fn can_set(&self) -> bool;

    /// Which implementation this is.
    fn kind(&self) -> ClockKind;
}

/// Returns the current time in nanoseconds since the Unix epoch.
#[inline]
pub fn nanos_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    #[inline]
    fn now(&self) -> Timestamp {
        nanos_since_epoch()
    }

    fn set(&self, ts: Timestamp) {
        tracing::warn!(ts, "attempt to set a real clock ignored");
    }

    #[inline]
    fn can_set(&self) -> bool {
        false
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Real
    }
}

/// Clock whose time only moves when an event pushes it forward.
#[derive(Debug, Clone)]
pub struct EventClock {
    last: Rc<Cell<Timestamp>>,
}

impl EventClock {
    /// Creates an event clock starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an event clock starting at `ts`.
    #[must_use]
    pub fn starting_at(ts: Timestamp) -> Self {
        Self {
            last: Rc::new(Cell::new(ts)),
        }
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for EventClock {
    #[inline]
    fn now(&self) -> Timestamp {
        self.last.get()
    }

    #[inline]
    fn set(&self, ts: Timestamp) {
        if ts > self.last.get() {
            self.last.set(ts);
        }
    }

    #[inline]
    fn can_set(&self) -> bool {
        true
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Event
    }
}

#[derive(Debug)]
struct ReplayState {
    last: Cell<Timestamp>,
    discrete: Cell<bool>,
    speedup_factor: f64,
}

/// Deterministic replay clock.
///
/// In discrete mode (the default) `set` jumps straight to the new time. When
/// pacing is enabled with [`be_paced`](ReplayClock::be_paced), `set`
/// busy-waits for the gap between the old and new time, divided by the
/// speed-up factor, so that a recording plays back at a realistic rate.
#[derive(Debug, Clone)]
pub struct ReplayClock {
    state: Rc<ReplayState>,
}

impl ReplayClock {
    /// Creates a discrete replay clock running at real speed when paced.
    #[must_use]
    pub fn new() -> Self {
        Self::with_speedup(1.0)
    }

    /// Creates a replay clock with the given speed-up factor.
    ///
    /// # Panics
    ///
    /// Panics if `speedup_factor` is not strictly positive.
    #[must_use]
    pub fn with_speedup(speedup_factor: f64) -> Self {
        assert!(
            speedup_factor > 0.0,
            "speedup_factor must be positive, got {speedup_factor}"
        );
        Self {
            state: Rc::new(ReplayState {
                last: Cell::new(1),
                discrete: Cell::new(true),
                speedup_factor,
            }),
        }
    }

    /// Switches to discrete mode: `set` jumps without waiting.
    pub fn be_discrete(&self) {
        self.state.discrete.set(true);
    }

    /// Switches to paced mode: `set` waits out the real gap.
    pub fn be_paced(&self) {
        self.state.discrete.set(false);
    }

    /// Speed-up factor applied when paced.
    #[must_use]
    pub fn speedup_factor(&self) -> f64 {
        self.state.speedup_factor
    }
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ReplayClock {
    #[inline]
    fn now(&self) -> Timestamp {
        self.state.last.get()
    }

    fn set(&self, ts: Timestamp) {
        let last = self.state.last.get();
        if ts <= last {
            return;
        }
        if !self.state.discrete.get() {
            let gap = (ts - last) as f64;
            let start = Instant::now();
            while (start.elapsed().as_nanos() as f64) * self.state.speedup_factor < gap {
                std::hint::spin_loop();
            }
        }
        self.state.last.set(ts);
    }

    #[inline]
    fn can_set(&self) -> bool {
        true
    }

    fn kind(&self) -> ClockKind {
        ClockKind::Replay
    }
}

/// Clock chosen at run time, dispatched by tag.
#[derive(Debug, Clone)]
pub enum AnyClock {
    /// Wall clock.
    Real(RealClock),
    /// Event-driven clock.
    Event(EventClock),
    /// Replay clock.
    Replay(ReplayClock),
}

impl Clock for AnyClock {
    #[inline]
    fn now(&self) -> Timestamp {
        match self {
            Self::Real(c) => c.now(),
            Self::Event(c) => c.now(),
            Self::Replay(c) => c.now(),
        }
    }

    #[inline]
    fn set(&self, ts: Timestamp) {
        match self {
            Self::Real(c) => c.set(ts),
            Self::Event(c) => c.set(ts),
            Self::Replay(c) => c.set(ts),
        }
    }

    #[inline]
    fn can_set(&self) -> bool {
        match self {
            Self::Real(c) => c.can_set(),
            Self::Event(c) => c.can_set(),
            Self::Replay(c) => c.can_set(),
        }
    }

    fn kind(&self) -> ClockKind {
        match self {
            Self::Real(c) => c.kind(),
            Self::Event(c) => c.kind(),
            Self::Replay(c) => c.kind(),
        }
    }
}

impl FromStr for AnyClock {
    type Err = StreamError;

    /// Parses `real_clock`, `event_clock` or `replay_clock[@speedup_factor=<f>]`.
    fn from_str(desc: &str) -> Result<Self, Self::Err> {
        let (name, options) = match desc.split_once('@') {
            Some((name, options)) => (name, Some(options)),
            None => (desc, None),
        };
        match name.trim() {
            "real_clock" => Ok(Self::Real(RealClock::new())),
            "event_clock" => Ok(Self::Event(EventClock::new())),
            "replay_clock" => {
                let factor = options
                    .into_iter()
                    .flat_map(|o| o.split(','))
                    .find_map(|o| o.trim().strip_prefix("speedup_factor="))
                    .map(|v| {
                        v.parse::<f64>()
                            .ok()
                            .filter(|f| *f > 0.0)
                            .ok_or_else(|| StreamError::malformed(desc, "bad speedup_factor"))
                    })
                    .transpose()?
                    .unwrap_or(1.0);
                Ok(Self::Replay(ReplayClock::with_speedup(factor)))
            }
            other => Err(StreamError::UnknownKind(other.to_string())),
        }
    }
}
