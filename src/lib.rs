//! Tollgate - Tiered Rate Limiting Middleware
//!
//! This crate implements a fail-aware admission-control layer for
//! multi-tenant HTTP APIs. Requests are charged against overlapping quota
//! scopes (global, per-API-key, per-route-prefix with longest-prefix
//! resolution) backed by a pluggable fixed-window counter store, with an
//! in-process backend for single instances and a Redis backend for
//! horizontally-scaled deployments.

pub mod config;
pub mod error;
pub mod key;
pub mod limiter;
pub mod manager;
pub mod metrics;
pub mod middleware;
pub mod store;

pub use config::{RateLimitConfig, RateSpec, StoreConfig, TollgateConfig};
pub use error::{Result, TollgateError};
pub use key::{DerivedKey, Identity, KeyScope};
pub use limiter::Limiter;
pub use manager::Manager;
pub use middleware::rate_limit;
pub use store::{LimiterResult, MemoryStore, RedisStore, Store};
