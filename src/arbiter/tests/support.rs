/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! In-memory source used to drive arbiters through exact timestamps.

use crate::source::{NOTHING_TO_READ, Record, Source, Timestamp};
use std::collections::VecDeque;

/// Serves a fixed list of records in order.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    pending: VecDeque<(Timestamp, Vec<u8>)>,
    current: Vec<u8>,
    name: String,
}

impl ScriptedSource {
    pub fn new(name: &str, timestamps: &[Timestamp]) -> Self {
        Self {
            pending: timestamps
                .iter()
                .map(|ts| (*ts, format!("{name}@{ts}").into_bytes()))
                .collect(),
            current: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Source for ScriptedSource {
    fn attest(&mut self, next_ts: &mut Timestamp) {
        *next_ts = self.pending.front().map_or(NOTHING_TO_READ, |(ts, _)| *ts);
    }

    fn read(&mut self) -> Option<Record<'_>> {
        let (ts, payload) = self.pending.pop_front()?;
        self.current = payload;
        Some(Record::new(ts, &self.current))
    }

    fn describe(&self) -> &str {
        &self.name
    }
}
