//! A rate spec bound to a shared counter store.

use std::sync::Arc;

use crate::config::RateSpec;
use crate::error::Result;
use crate::store::{LimiterResult, Store};

/// One quota scope: a [`RateSpec`] paired with the store that holds its
/// counters. Cheap to construct, immutable once built, safe to share.
pub struct Limiter {
    spec: RateSpec,
    store: Arc<dyn Store>,
}

impl Limiter {
    /// Bind a spec to a store.
    pub fn new(spec: RateSpec, store: Arc<dyn Store>) -> Self {
        Self { spec, store }
    }

    /// The spec this limiter enforces.
    pub fn spec(&self) -> &RateSpec {
        &self.spec
    }

    /// Consume one unit of quota for `key` and report the outcome.
    pub async fn check(&self, key: &str) -> Result<LimiterResult> {
        self.store.check(key, &self.spec).await
    }

    /// Report the current quota state for `key` without consuming any.
    pub async fn peek(&self, key: &str) -> Result<LimiterResult> {
        self.store.peek(key, &self.spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limiters_share_one_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let strict = Limiter::new(RateSpec::new(1, Duration::from_secs(60)), Arc::clone(&store));
        let loose = Limiter::new(RateSpec::new(100, Duration::from_secs(60)), Arc::clone(&store));

        // Same key through both limiters hits the same counter.
        strict.check("shared").await.unwrap();
        let seen = loose.peek("shared").await.unwrap();
        assert_eq!(seen.remaining, 99);
    }

    #[tokio::test]
    async fn test_check_enforces_spec_limit() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = Limiter::new(RateSpec::new(2, Duration::from_secs(60)), store);

        assert!(!limiter.check("k").await.unwrap().reached);
        assert!(!limiter.check("k").await.unwrap().reached);
        assert!(limiter.check("k").await.unwrap().reached);
    }
}
