//! Redis-backed fixed-window counter store.
//!
//! Counters are shared by every process pointing at the same Redis, giving a
//! true global quota across horizontally-scaled server instances. Increments
//! are serialized by a single Lua script, so concurrent checks against the
//! same key never lose updates.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Script;
use tracing::debug;

use super::{now_unix, result_from_count, window_start, LimiterResult, Store};
use crate::config::{RateSpec, StoreConfig};
use crate::error::Result;

/// Atomic increment-and-expire. The expiry is only set when the counter is
/// created, one second past the window so late readers still see it.
const CHECK_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Distributed counter store backed by Redis.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisStore {
    /// Connect to Redis and build the store.
    ///
    /// Fails when the connection cannot be established; reconnects after
    /// transient failures are bounded by `config.max_retry`.
    pub async fn connect(client: redis::Client, config: &StoreConfig) -> Result<Self> {
        let manager_config =
            ConnectionManagerConfig::new().set_number_of_retries(config.max_retry as usize);
        let conn = ConnectionManager::new_with_config(client, manager_config).await?;

        debug!(prefix = %config.prefix, max_retry = config.max_retry, "Connected Redis counter store");

        Ok(Self {
            conn,
            prefix: config.prefix.clone(),
            script: Script::new(CHECK_SCRIPT),
        })
    }

    fn counter_key(&self, key: &str, start: i64) -> String {
        format!("{}{}:{}", self.prefix, key, start)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn check(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult> {
        let now = now_unix();
        let start = window_start(now, spec.period_secs);
        let counter_key = self.counter_key(key, start);

        let mut conn = self.conn.clone();
        let count: i64 = self
            .script
            .key(&counter_key)
            .arg(spec.period_secs + 1)
            .invoke_async(&mut conn)
            .await?;

        Ok(result_from_count(count, spec, start))
    }

    async fn peek(&self, key: &str, spec: &RateSpec) -> Result<LimiterResult> {
        let now = now_unix();
        let start = window_start(now, spec.period_secs);
        let counter_key = self.counter_key(key, start);

        let mut conn = self.conn.clone();
        let count: Option<i64> = redis::cmd("GET")
            .arg(&counter_key)
            .query_async(&mut conn)
            .await?;

        Ok(result_from_count(count.unwrap_or(0), spec, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_includes_prefix_and_window() {
        let key = format!("{}{}:{}", "ratelimit:", "apikey:abc", 1200);
        assert_eq!(key, "ratelimit:apikey:abc:1200");
    }

    #[test]
    fn test_script_parses() {
        // Script::new hashes the body eagerly; this guards against typos.
        let script = Script::new(CHECK_SCRIPT);
        assert!(!script.get_hash().is_empty());
    }
}
