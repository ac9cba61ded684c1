//! Bounded, time-ordered append log.
//!
//! A [`TimeStore`] keeps entries sorted by timestamp and enforces two bounds on
//! every push: an age span (`period`) between newest and oldest entry, and a
//! maximum entry count (`limit`). Pushes with a timestamp at or after the
//! newest entry append in O(1); older timestamps are placed by binary search.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::value::Record;
use serde_json::Value;

/// One `(timestamp, fields)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Epoch milliseconds
    pub ts: i64,
    pub values: Record,
}

impl Entry {
    pub fn new(ts: i64, values: Record) -> Self {
        Self { ts, values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Stored,
    /// Stored, but the size bound forced out the oldest entry.
    Limit,
}

#[derive(Debug, Clone)]
pub struct TimeStore {
    entries: VecDeque<Entry>,
    config: StoreConfig,
}

impl TimeStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entries: VecDeque::with_capacity(config.limit.min(1024) + 1),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Inserts an entry in timestamp order, then applies the age bound and the
    /// size bound, in that order.
    ///
    /// Both bounds evict oldest-first until they hold again, so a push after a
    /// long pause can drop several aged entries at once. Only size evictions
    /// are reported as [`PushStatus::Limit`].
    pub fn push(&mut self, ts: i64, values: Record) -> PushStatus {
        let entry = Entry::new(ts, values);

        match self.entries.back() {
            Some(last) if last.ts > ts => {
                let idx = self.entries.partition_point(|e| e.ts <= ts);
                self.entries.insert(idx, entry);
            }
            _ => self.entries.push_back(entry),
        }

        self.enforce_bounds()
    }

    fn enforce_bounds(&mut self) -> PushStatus {
        let period_ms = self.config.period_ms();
        let mut aged = 0usize;
        while self.span_ms() > period_ms {
            self.entries.pop_front();
            aged += 1;
        }

        let mut status = PushStatus::Stored;
        while self.entries.len() > self.config.limit {
            self.entries.pop_front();
            status = PushStatus::Limit;
        }

        if aged > 0 || status == PushStatus::Limit {
            log::debug!(
                "time store evicted {} aged entries (size bound hit: {})",
                aged,
                status == PushStatus::Limit
            );
        }
        status
    }

    /// Newest minus oldest timestamp; zero with fewer than two entries.
    pub fn span_ms(&self) -> i64 {
        match (self.entries.front(), self.entries.back()) {
            (Some(first), Some(last)) => last.ts.saturating_sub(first.ts),
            _ => 0,
        }
    }

    /// Every stored value of `key`, oldest first, skipping entries without it.
    pub fn values(&self, key: &str) -> Vec<&Value> {
        self.entries.iter().filter_map(|e| e.get(key)).collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.ts).collect()
    }

    pub fn entries(&self) -> &VecDeque<Entry> {
        &self.entries
    }

    pub fn latest(&self) -> Option<&Entry> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Swaps in new bounds and trims the current entries to them.
    pub fn reconfigure(&mut self, config: StoreConfig) -> Result<PushStatus> {
        config.validate()?;
        self.config = config;
        Ok(self.enforce_bounds())
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Default for TimeStore {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            config: StoreConfig::default(),
        }
    }
}
