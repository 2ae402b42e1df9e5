//! Request-to-limiter orchestration.
//!
//! The [`Manager`] owns the configured limiters and answers, for every
//! request: is it excluded, which key is it charged against, and which
//! limiter governs it. The HTTP glue around these answers lives in
//! [`crate::middleware`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{RateLimitConfig, RateSpec};
use crate::error::{Result, TollgateError};
use crate::key::{self, DerivedKey, Identity, KeyScope};
use crate::limiter::Limiter;
use crate::store::{LimiterResult, MemoryStore, RedisStore, Store};

/// Orchestrates exclusion checks, key derivation, and limiter resolution.
///
/// Safe to share across all in-flight requests. The route map is the only
/// mutable state; it is guarded by a reader/writer lock because runtime
/// route updates are rare relative to per-request reads. Limiters are
/// immutable once constructed, so a request that captured a limiter before
/// an update keeps using the old one safely.
pub struct Manager {
    config: RateLimitConfig,
    store: Arc<dyn Store>,
    global: Option<Arc<Limiter>>,
    api_key: Option<Arc<Limiter>>,
    routes: RwLock<HashMap<String, Arc<Limiter>>>,
}

impl Manager {
    /// Build a manager from validated configuration.
    ///
    /// Uses the Redis counter store when a client handle is given, otherwise
    /// the in-process store. Fails on invalid configuration or when the
    /// Redis connection cannot be established; callers must treat either as
    /// fatal and refuse to start.
    pub async fn new(config: RateLimitConfig, redis: Option<redis::Client>) -> Result<Self> {
        let store: Arc<dyn Store> = match redis {
            Some(client) => Arc::new(RedisStore::connect(client, &config.store).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Build a manager against an explicit store implementation.
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;

        let global = Self::build_limiter(&config.global_rate, &store);
        let api_key = Self::build_limiter(&config.api_key_rate, &store);

        let mut routes = HashMap::new();
        for (prefix, spec) in &config.route_rates {
            if let Some(limiter) = Self::build_limiter(spec, &store) {
                routes.insert(prefix.clone(), limiter);
            }
        }

        info!(
            global = config.global_rate.is_enabled(),
            api_key = config.api_key_rate.is_enabled(),
            routes = routes.len(),
            fail_open = config.fail_open,
            "Rate limit manager initialized"
        );

        Ok(Self {
            config,
            store,
            global,
            api_key,
            routes: RwLock::new(routes),
        })
    }

    fn build_limiter(spec: &RateSpec, store: &Arc<dyn Store>) -> Option<Arc<Limiter>> {
        spec.is_enabled()
            .then(|| Arc::new(Limiter::new(*spec, Arc::clone(store))))
    }

    /// Whether the request bypasses rate limiting entirely.
    ///
    /// True when any configured excluded path is a prefix of the request
    /// path, or the derived client IP matches an excluded IP exactly.
    pub fn is_excluded(&self, path: &str, client_ip: Option<&str>) -> bool {
        if self
            .config
            .excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return true;
        }
        if let Some(ip) = client_ip {
            if self.config.excluded_ips.contains(ip) {
                return true;
            }
        }
        false
    }

    /// Derive the quota key for a request.
    pub fn derive_key(
        &self,
        identity: &Identity,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
    ) -> DerivedKey {
        key::derive_key(identity, headers, peer)
    }

    /// Resolve the limiter governing a request.
    ///
    /// Priority: exact route match, longest matching route prefix, the
    /// API-key limiter for `apikey`-scoped keys, then the global limiter.
    /// Returns `None` when no configured limiter applies, in which case the
    /// request is allowed without consuming quota.
    pub fn resolve_limiter(&self, path: &str, scope: KeyScope) -> Option<Arc<Limiter>> {
        if let Some(limiter) = self.resolve_route(path) {
            return Some(limiter);
        }
        if scope == KeyScope::ApiKey {
            if let Some(limiter) = &self.api_key {
                return Some(Arc::clone(limiter));
            }
        }
        self.global.as_ref().map(Arc::clone)
    }

    /// Find the route limiter for a path, preferring an exact match and then
    /// the longest matching prefix.
    ///
    /// Linear scan over the route map: route counts are bounded by
    /// configuration size, so a prefix tree would be premature here.
    fn resolve_route(&self, path: &str) -> Option<Arc<Limiter>> {
        let routes = self.routes.read();
        if let Some(limiter) = routes.get(path) {
            return Some(Arc::clone(limiter));
        }

        let mut best: Option<(&str, &Arc<Limiter>)> = None;
        for (prefix, limiter) in routes.iter() {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            if best.map_or(true, |(current, _)| prefix.len() > current.len()) {
                best = Some((prefix, limiter));
            }
        }
        best.map(|(_, limiter)| Arc::clone(limiter))
    }

    /// Replace or remove the limiter for a route prefix at runtime.
    ///
    /// A disabled spec removes the route's dedicated limiter so subsequent
    /// requests fall back to the API-key or global scope. Safe to call
    /// concurrently with in-flight requests: each request sees either the
    /// old or the new limiter, never a partially-built one.
    pub fn update_route_limit(&self, prefix: &str, spec: RateSpec) -> Result<()> {
        if !spec.is_enabled() {
            let removed = self.routes.write().remove(prefix).is_some();
            debug!(route = %prefix, removed, "Route rate limit disabled");
            return Ok(());
        }

        spec.validate(&format!("route_rates[{prefix}]"))?;
        let limiter = Arc::new(Limiter::new(spec, Arc::clone(&self.store)));
        self.routes.write().insert(prefix.to_string(), limiter);
        debug!(route = %prefix, limit = spec.limit, period_secs = spec.period_secs, "Route rate limit updated");
        Ok(())
    }

    /// Read-only quota status for a request, consuming nothing.
    ///
    /// Uses the same key derivation and limiter resolution as the request
    /// path, for diagnostic and status endpoints.
    pub async fn get_limit_info(
        &self,
        path: &str,
        identity: &Identity,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
    ) -> Result<LimiterResult> {
        let key = self.derive_key(identity, headers, peer);
        let limiter = self
            .resolve_limiter(path, key.scope)
            .ok_or(TollgateError::NoLimiter)?;
        limiter.peek(&key.storage_key()).await
    }

    /// Whether store failures let requests through.
    pub fn fail_open(&self) -> bool {
        self.config.fail_open
    }

    /// Whether rate limit response headers are suppressed.
    pub fn headers_disabled(&self) -> bool {
        self.config.disable_headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(limit: i64) -> RateSpec {
        RateSpec::new(limit, Duration::from_secs(60))
    }

    fn manager(config: RateLimitConfig) -> Manager {
        Manager::with_store(config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_construction_rejects_invalid_config() {
        let config = RateLimitConfig {
            global_rate: RateSpec {
                limit: 10,
                period_secs: 0,
                disabled: false,
            },
            ..Default::default()
        };
        assert!(Manager::with_store(config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn test_excluded_path_prefix_match() {
        let config = RateLimitConfig {
            global_rate: spec(1),
            excluded_paths: vec!["/health".to_string(), "/metrics".to_string()],
            ..Default::default()
        };
        let manager = manager(config);

        assert!(manager.is_excluded("/health", None));
        assert!(manager.is_excluded("/health/live", None));
        assert!(!manager.is_excluded("/api/test", None));
    }

    #[test]
    fn test_excluded_ip_exact_match() {
        let config = RateLimitConfig {
            global_rate: spec(1),
            excluded_ips: ["10.0.0.1".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let manager = manager(config);

        assert!(manager.is_excluded("/api/test", Some("10.0.0.1")));
        // Exact string equality only, no CIDR expansion.
        assert!(!manager.is_excluded("/api/test", Some("10.0.0.2")));
    }

    #[test]
    fn test_resolution_prefers_route_over_api_key() {
        let config = RateLimitConfig {
            global_rate: spec(100),
            api_key_rate: spec(50),
            route_rates: [("/api/limited".to_string(), spec(2))].into_iter().collect(),
            ..Default::default()
        };
        let manager = manager(config);

        let limiter = manager
            .resolve_limiter("/api/limited", KeyScope::ApiKey)
            .unwrap();
        assert_eq!(limiter.spec().limit, 2);

        let limiter = manager
            .resolve_limiter("/api/other", KeyScope::ApiKey)
            .unwrap();
        assert_eq!(limiter.spec().limit, 50);

        let limiter = manager.resolve_limiter("/api/other", KeyScope::Ip).unwrap();
        assert_eq!(limiter.spec().limit, 100);
    }

    #[test]
    fn test_resolution_longest_prefix_wins() {
        let config = RateLimitConfig {
            global_rate: spec(100),
            route_rates: [
                ("/api".to_string(), spec(50)),
                ("/api/v0/memory".to_string(), spec(20)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let manager = manager(config);

        let limiter = manager
            .resolve_limiter("/api/v0/memory/x", KeyScope::Ip)
            .unwrap();
        assert_eq!(limiter.spec().limit, 20);

        let limiter = manager
            .resolve_limiter("/api/v0/tasks", KeyScope::Ip)
            .unwrap();
        assert_eq!(limiter.spec().limit, 50);
    }

    #[test]
    fn test_no_limiter_configured_resolves_none() {
        let manager = manager(RateLimitConfig::default());
        assert!(manager.resolve_limiter("/api/test", KeyScope::Ip).is_none());
    }

    #[test]
    fn test_disabled_route_spec_is_not_prebuilt() {
        let config = RateLimitConfig {
            global_rate: spec(100),
            route_rates: [(
                "/api/off".to_string(),
                RateSpec {
                    disabled: true,
                    ..spec(1)
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let manager = manager(config);

        let limiter = manager.resolve_limiter("/api/off", KeyScope::Ip).unwrap();
        assert_eq!(limiter.spec().limit, 100, "Should fall back to global");
    }

    #[test]
    fn test_update_route_limit_replaces_and_removes() {
        let config = RateLimitConfig {
            global_rate: spec(100),
            route_rates: [("/api/v0/".to_string(), spec(10))].into_iter().collect(),
            ..Default::default()
        };
        let manager = manager(config);

        manager.update_route_limit("/api/v0/", spec(5)).unwrap();
        let limiter = manager.resolve_limiter("/api/v0/x", KeyScope::Ip).unwrap();
        assert_eq!(limiter.spec().limit, 5);

        let disabled = RateSpec {
            disabled: true,
            ..spec(5)
        };
        manager.update_route_limit("/api/v0/", disabled).unwrap();
        let limiter = manager.resolve_limiter("/api/v0/x", KeyScope::Ip).unwrap();
        assert_eq!(limiter.spec().limit, 100, "Should fall back to global");
    }

    #[test]
    fn test_update_route_limit_rejects_invalid_spec() {
        let manager = manager(RateLimitConfig {
            global_rate: spec(100),
            ..Default::default()
        });
        let invalid = RateSpec {
            limit: -1,
            period_secs: 60,
            disabled: false,
        };
        assert!(manager.update_route_limit("/api/v0/", invalid).is_err());
    }

    #[tokio::test]
    async fn test_get_limit_info_does_not_consume() {
        let config = RateLimitConfig {
            global_rate: spec(50),
            api_key_rate: spec(100),
            ..Default::default()
        };
        let manager = manager(config);

        let info = manager
            .get_limit_info("/api/test", &Identity::api_key("k1"), &HeaderMap::new(), None)
            .await
            .unwrap();
        assert_eq!(info.limit, 100, "API key requests see the API key limit");
        assert_eq!(info.remaining, 100);

        let info = manager
            .get_limit_info("/api/test", &Identity::default(), &HeaderMap::new(), None)
            .await
            .unwrap();
        assert_eq!(info.limit, 50, "Anonymous requests see the global limit");
    }

    #[tokio::test]
    async fn test_get_limit_info_prefers_route_limit() {
        let config = RateLimitConfig {
            global_rate: spec(50),
            api_key_rate: spec(100),
            route_rates: [("/api/special".to_string(), spec(10))].into_iter().collect(),
            ..Default::default()
        };
        let manager = manager(config);

        let info = manager
            .get_limit_info(
                "/api/special",
                &Identity::api_key("k1"),
                &HeaderMap::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(info.limit, 10);
    }

    #[tokio::test]
    async fn test_get_limit_info_without_limiter_errors() {
        let manager = manager(RateLimitConfig::default());
        let err = manager
            .get_limit_info("/api/test", &Identity::default(), &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::NoLimiter));
    }
}
