//! HTTP middleware glue: the per-request entry point, quota headers, and
//! problem responses.
//!
//! Mount with `axum::middleware::from_fn_with_state(manager, rate_limit)`
//! after whatever auth middleware populates the [`Identity`] extension.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, warn};

use crate::key::{self, Identity};
use crate::manager::Manager;
use crate::metrics;
use crate::store::{now_unix, LimiterResult};

/// Problem type URI for a 429 response.
pub const RATE_LIMIT_PROBLEM_TYPE: &str = "https://tollgate.dev/problems/rate-limit-exceeded";
/// Problem type URI for a fail-closed 500 response.
pub const STORE_PROBLEM_TYPE: &str = "https://tollgate.dev/problems/rate-limit-store-unavailable";

/// RFC 7807 problem details body.
#[derive(Debug, Serialize)]
pub struct Problem {
    pub status: u16,
    pub title: String,
    pub detail: String,
    #[serde(rename = "type")]
    pub problem_type: String,
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Value>,
}

/// The per-request admission check.
///
/// Excluded requests pass through untouched. Everything else is charged
/// against its derived key: allowed requests continue with quota headers
/// attached, over-limit requests short-circuit with 429, and store failures
/// resolve per the fail-open policy.
pub async fn rate_limit(
    State(manager): State<Arc<Manager>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let client_ip = key::client_ip(request.headers(), peer);

    if manager.is_excluded(&path, client_ip.as_deref()) {
        return next.run(request).await;
    }

    let derived = manager.derive_key(&identity, request.headers(), peer);
    let Some(limiter) = manager.resolve_limiter(&path, derived.scope) else {
        // Nothing configured for this request; let it through.
        return next.run(request).await;
    };

    let result = match limiter.check(&derived.storage_key()).await {
        Ok(result) => result,
        Err(error) => {
            warn!(
                key_type = %derived.scope,
                fail_open = manager.fail_open(),
                %error,
                "Rate limit store check failed"
            );
            if manager.fail_open() {
                // Allowed through without quota headers: the counter state
                // is unknown, so advertising quota would be a lie.
                return next.run(request).await;
            }
            return store_unavailable(&path);
        }
    };

    let reset_after = (result.reset - now_unix()).max(0);

    if result.reached {
        debug!(key_type = %derived.scope, path = %path, "Rate limit exceeded");
        metrics::record_blocked(&path, derived.scope);

        let mut response = too_many_requests(&path, reset_after);
        if !manager.headers_disabled() {
            apply_quota_headers(response.headers_mut(), &result, reset_after);
        }
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(reset_after));
        return response;
    }

    let mut response = next.run(request).await;
    if !manager.headers_disabled() {
        apply_quota_headers(response.headers_mut(), &result, reset_after);
    }
    response
}

/// Set both the modern `RateLimit-*` and legacy `X-RateLimit-*` families.
///
/// `Remaining` is clamped to zero: the fixed-window counter can overshoot
/// under concurrent bursts, and a negative remaining quota must never be
/// emitted. Modern `Reset` carries seconds-until-reset; the legacy variant
/// carries the absolute Unix reset time.
fn apply_quota_headers(headers: &mut HeaderMap, result: &LimiterResult, reset_after: i64) {
    let remaining = result.remaining.max(0);
    headers.insert("ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset_after));
    headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(result.reset));
}

fn too_many_requests(path: &str, retry_after: i64) -> Response {
    let problem = Problem {
        status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        title: "Too Many Requests".to_string(),
        detail: format!("Rate limit exceeded. Retry after {retry_after} seconds"),
        problem_type: RATE_LIMIT_PROBLEM_TYPE.to_string(),
        instance: path.to_string(),
        extras: Some(serde_json::json!({ "retry_after": retry_after })),
    };
    problem_response(StatusCode::TOO_MANY_REQUESTS, problem)
}

fn store_unavailable(path: &str) -> Response {
    let problem = Problem {
        status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        title: "Internal Server Error".to_string(),
        detail: "rate limiting backend unavailable".to_string(),
        problem_type: STORE_PROBLEM_TYPE.to_string(),
        instance: path.to_string(),
        extras: None,
    };
    problem_response(StatusCode::INTERNAL_SERVER_ERROR, problem)
}

fn problem_response(status: StatusCode, problem: Problem) -> Response {
    let mut response = (status, Json(problem)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/problem+json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_headers_clamp_negative_remaining() {
        let result = LimiterResult {
            limit: 5,
            remaining: -3,
            reset: 1_000,
            reached: true,
        };
        let mut headers = HeaderMap::new();
        apply_quota_headers(&mut headers, &result, 42);

        assert_eq!(headers["ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["ratelimit-limit"], "5");
        assert_eq!(headers["ratelimit-reset"], "42");
        assert_eq!(headers["x-ratelimit-reset"], "1000");
    }

    #[test]
    fn test_problem_body_shape() {
        let problem = Problem {
            status: 429,
            title: "Too Many Requests".to_string(),
            detail: "Rate limit exceeded. Retry after 7 seconds".to_string(),
            problem_type: RATE_LIMIT_PROBLEM_TYPE.to_string(),
            instance: "/api/v0/memory".to_string(),
            extras: Some(serde_json::json!({ "retry_after": 7 })),
        };
        let body = serde_json::to_value(&problem).unwrap();

        assert_eq!(body["status"], 429);
        assert_eq!(body["type"], RATE_LIMIT_PROBLEM_TYPE);
        assert_eq!(body["instance"], "/api/v0/memory");
        assert_eq!(body["extras"]["retry_after"], 7);
    }

    #[test]
    fn test_store_problem_has_no_extras() {
        let response = store_unavailable("/api/test");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }
}
