//! Blocked-request counter emission.
//!
//! Emits through the `metrics` facade; when no recorder is installed the
//! calls are no-ops, so monitoring wiring stays entirely external.

use ::metrics::counter;

use crate::key::KeyScope;

/// Name of the monotonic counter of denied requests.
pub const BLOCKS_COUNTER: &str = "rate_limit_blocks_total";

/// Record one denied request, tagged by route and key type.
pub fn record_blocked(route: &str, scope: KeyScope) {
    counter!(
        BLOCKS_COUNTER,
        "route" => route.to_string(),
        "key_type" => scope.as_str()
    )
    .increment(1);
}
