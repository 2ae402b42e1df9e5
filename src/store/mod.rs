//! Pluggable fixed-window counter backends.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RateSpec;
use crate::error::Result;

/// The outcome of a single counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterResult {
    /// Quota ceiling for the resolved scope.
    pub limit: i64,
    /// Remaining units in the current window. May go negative under
    /// concurrent bursts; callers clamp before emitting it.
    pub remaining: i64,
    /// Unix seconds at which the current window resets.
    pub reset: i64,
    /// Whether the limit was exceeded by this check.
    pub reached: bool,
}

/// Trait for fixed-window counter backends.
///
/// One counter exists per (key, window-start) pair. `check` performs an
/// atomic increment-and-read; `reached` is true when the post-increment
/// count exceeds the limit. Backend failures surface as errors so the
/// fail-open/fail-closed decision stays with the caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically increment the counter for `key` and report the result.
    async fn check(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult>;

    /// Read the counter for `key` without incrementing it.
    async fn peek(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult>;
}

/// Current Unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Start of the fixed window containing `now` for the given period.
///
/// Windows are aligned to the Unix epoch so that every process sharing a
/// distributed store agrees on window boundaries.
pub(crate) fn window_start(now: i64, period_secs: u64) -> i64 {
    let period = period_secs as i64;
    (now / period) * period
}

/// Build a `LimiterResult` from a post-increment (or observed) count.
pub(crate) fn result_from_count(count: i64, spec: &RateSpec, start: i64) -> LimiterResult {
    LimiterResult {
        limit: spec.limit,
        remaining: spec.limit - count,
        reset: start + spec.period_secs as i64,
        reached: count > spec.limit,
    }
}
