/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Session configuration.
//!
//! A session is described by a JSON document naming the clock, an optional
//! timer and every source with the public id it should be reported under:
//!
//! ```json
//! {
//!   "clock": "replay_clock@speedup_factor=2",
//!   "timer": "timer:1000000",
//!   "sources": [
//!     { "id": 1, "descriptor": "shm:/dev/shm/md.log@follow", "fast_forward": 0 },
//!     { "descriptor": "udp:0.0.0.0:9000" }
//!   ]
//! }
//! ```

use crate::arbiter::{SlotId, UnifiedArbiter};
use crate::clock::AnyClock;
use crate::descriptor::{Descriptor, SourceKind};
use crate::error::{ArbiterError, StreamError};
use crate::source::shared;
use crate::sources::{AnySource, NullTimer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Unified arbiter whose clock and timer are chosen at run time.
pub type SessionArbiter = UnifiedArbiter<AnyClock, 16, AnySource<AnyClock>>;

fn default_clock() -> String {
    "real_clock".to_string()
}

/// One source of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Public id to report the source under; the unified id when absent.
    #[serde(default)]
    pub id: Option<SlotId>,
    /// What to open.
    pub descriptor: Descriptor,
    /// Skip records below this timestamp before arbitration starts. 0
    /// catches up to the writer's last published record.
    #[serde(default)]
    pub fast_forward: Option<u64>,
}

/// Everything needed to build a unified arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Clock descriptor, see [`AnyClock`].
    #[serde(default = "default_clock")]
    pub clock: String,
    /// Timer placed in the memory-mapped arbiter's slot 0.
    #[serde(default)]
    pub timer: Option<Descriptor>,
    /// Sources in submission order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SessionConfig {
    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ArbiterError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ArbiterError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StreamError::io(path.display().to_string(), e))?;
        Self::from_json(&json)
    }

    /// Builds the configured clock.
    pub fn build_clock(&self) -> Result<AnyClock, ArbiterError> {
        Ok(self.clock.parse::<AnyClock>()?)
    }
}

impl<const MMAP_CAPACITY: usize> UnifiedArbiter<AnyClock, MMAP_CAPACITY, AnySource<AnyClock>> {
    /// Opens every configured source and submits it.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ArbiterError> {
        let clock = config.build_clock()?;
        let timer = match &config.timer {
            Some(desc) if matches!(desc.kind, SourceKind::Timer | SourceKind::NullTimer) => {
                AnySource::open(clock.clone(), desc)?
            }
            Some(desc) => {
                return Err(StreamError::UnsupportedConstruction {
                    kind: desc.kind.to_string(),
                    how: "as the session timer",
                }
                .into());
            }
            None => AnySource::NullTimer(NullTimer::new()),
        };

        let mut arbiter = Self::new(clock.clone(), timer)?;
        for source in &config.sources {
            let mut opened = AnySource::open(clock.clone(), &source.descriptor)?;
            if let Some(stop_ts) = source.fast_forward {
                let skipped = opened.fast_forward(stop_ts);
                debug!(descriptor = %source.descriptor, stop_ts, skipped, "fast forwarded source");
            }
            arbiter.submit(source.id, shared(opened))?;
        }
        arbiter.submission_complete()?;
        info!(
            clock = %config.clock,
            sources = config.sources.len(),
            "session arbiter ready"
        );
        Ok(arbiter)
    }
}
