//! Configuration for the Tollgate middleware.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// A single rate limit definition: at most `limit` requests per `period_secs`
/// seconds, counted in fixed windows aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSpec {
    /// Maximum number of requests allowed per window.
    #[serde(default)]
    pub limit: i64,

    /// Window length in seconds.
    #[serde(default)]
    pub period_secs: u64,

    /// Disables this limit entirely when true.
    #[serde(default)]
    pub disabled: bool,
}

impl RateSpec {
    /// Create an enabled spec from a limit and period.
    pub fn new(limit: i64, period: Duration) -> Self {
        Self {
            limit,
            period_secs: period.as_secs(),
            disabled: false,
        }
    }

    /// The window length as a `Duration`.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Whether this spec participates in limiting.
    ///
    /// A fully zero-valued spec counts as unset, so optional sections of the
    /// configuration can simply be omitted.
    pub fn is_enabled(&self) -> bool {
        !self.disabled && !(self.limit == 0 && self.period_secs == 0)
    }

    /// Validate the spec, using `scope` to label the error.
    ///
    /// Enabled specs must have a positive limit and a positive period.
    /// Disabled or unset specs are always valid.
    pub fn validate(&self, scope: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.limit <= 0 {
            return Err(TollgateError::Config(format!(
                "{scope}: limit must be greater than 0, got {}",
                self.limit
            )));
        }
        if self.period_secs == 0 {
            return Err(TollgateError::Config(format!(
                "{scope}: period must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Connection parameters for the counter store, passed through opaquely
/// to store construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace prefix for counter keys.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Maximum reconnect attempts for the distributed backend.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Health check interval in seconds for the distributed backend.
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_retry: default_max_retry(),
            health_check_secs: default_health_check_secs(),
        }
    }
}

fn default_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_max_retry() -> u32 {
    3
}

fn default_health_check_secs() -> u64 {
    30
}

/// Rate limiting configuration.
///
/// Immutable after construction; the only runtime mutation is through
/// [`Manager::update_route_limit`](crate::manager::Manager::update_route_limit),
/// which swaps whole limiters rather than editing this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Rate applied to all requests that match no more specific scope.
    #[serde(default)]
    pub global_rate: RateSpec,

    /// Rate applied per API key.
    #[serde(default)]
    pub api_key_rate: RateSpec,

    /// Rates applied per route prefix; longest matching prefix wins.
    #[serde(default)]
    pub route_rates: HashMap<String, RateSpec>,

    /// Path prefixes exempt from rate limiting.
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Client IPs exempt from rate limiting (exact match only).
    #[serde(default)]
    pub excluded_ips: HashSet<String>,

    /// When the store is unavailable: allow requests through (true) or
    /// reject with 500 (false).
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,

    /// Suppress rate limit response headers when true.
    #[serde(default)]
    pub disable_headers: bool,

    /// Counter store connection parameters.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_fail_open() -> bool {
    true
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rate: RateSpec::default(),
            api_key_rate: RateSpec::default(),
            route_rates: HashMap::new(),
            excluded_paths: Vec::new(),
            excluded_ips: HashSet::new(),
            fail_open: default_fail_open(),
            disable_headers: false,
            store: StoreConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Validate all rate specs.
    ///
    /// Violations are fatal: the caller must refuse to start rather than run
    /// with an invalid limiter.
    pub fn validate(&self) -> Result<()> {
        self.global_rate.validate("global_rate")?;
        self.api_key_rate.validate("api_key_rate")?;
        for (route, spec) in &self.route_rates {
            spec.validate(&format!("route_rates[{route}]"))?;
        }
        Ok(())
    }
}

/// Top-level configuration for the Tollgate server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Redis connection URL; the in-process store is used when unset.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            redis_url: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TollgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.rate_limit.validate()?;
        Ok(config)
    }
}
