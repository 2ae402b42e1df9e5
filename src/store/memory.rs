//! In-process fixed-window counter store.
//!
//! Serializes increments within a single process only; counters reset on
//! restart and are not shared across server instances. Suitable for
//! single-instance deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{now_unix, result_from_count, window_start, LimiterResult, Store};
use crate::config::RateSpec;
use crate::error::Result;

/// A counter window for one key.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: i64,
    count: i64,
}

/// In-memory counter store backed by a concurrent hash map.
///
/// Stale windows are rolled over lazily on the next touch of the same key,
/// so the map never holds more than one window per distinct key.
#[derive(Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, primarily useful for tests.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn check(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult> {
        let now = now_unix();
        let start = window_start(now, spec.period_secs);

        // The entry guard holds the shard lock, making roll-over and
        // increment atomic with respect to concurrent checks of the same key.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { start, count: 0 });
        if entry.start != start {
            entry.start = start;
            entry.count = 0;
        }
        entry.count += 1;
        let count = entry.count;
        drop(entry);

        Ok(result_from_count(count, spec, start))
    }

    async fn peek(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult> {
        let now = now_unix();
        let start = window_start(now, spec.period_secs);

        let count = match self.windows.get(key) {
            Some(window) if window.start == start => window.count,
            _ => 0,
        };

        Ok(result_from_count(count, spec, start))
    }
}
