//! Identity key derivation.
//!
//! Every request is charged against a single string key derived from its
//! identity signals. Upstream auth middleware places an [`Identity`] in the
//! request extensions; the middleware here only consumes it and never
//! authenticates anything itself.

use axum::http::HeaderMap;
use std::fmt;
use std::net::IpAddr;

/// Identity values resolved by upstream auth middleware, read from the
/// request extensions.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// API key identifier, when the request carried a valid key.
    pub api_key: Option<String>,
    /// Authenticated user identifier.
    pub user_id: Option<String>,
}

impl Identity {
    /// Identity for a request authenticated by API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            user_id: None,
        }
    }

    /// Identity for a request authenticated as a user session.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            api_key: None,
            user_id: Some(id.into()),
        }
    }
}

/// The scope a derived key belongs to, used as the key prefix and as the
/// `key_type` metric attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    ApiKey,
    User,
    Ip,
    Unknown,
}

impl KeyScope {
    /// Stable label for key prefixes and metric attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::ApiKey => "apikey",
            KeyScope::User => "user",
            KeyScope::Ip => "ip",
            KeyScope::Unknown => "unknown",
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived identity key, ephemeral per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub scope: KeyScope,
    pub value: String,
}

impl DerivedKey {
    /// The string the store charges quota against, e.g. `apikey:abc123`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.scope, self.value)
    }
}

/// Resolve the client IP from proxy headers, falling back to the transport
/// peer address.
///
/// Priority: `X-Real-IP`, then the first comma-separated `X-Forwarded-For`
/// entry, then the peer address. Malformed headers degrade to the next
/// source rather than failing.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return Some(real_ip.to_string());
    }
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    peer.map(|ip| ip.to_string())
}

/// Derive the quota key for a request.
///
/// Priority, first match wins: API key, authenticated user, client IP.
/// A request with no identity signals at all derives an `unknown` key so
/// anonymous traffic still shares one bucket.
pub fn derive_key(identity: &Identity, headers: &HeaderMap, peer: Option<IpAddr>) -> DerivedKey {
    if let Some(api_key) = &identity.api_key {
        return DerivedKey {
            scope: KeyScope::ApiKey,
            value: api_key.clone(),
        };
    }
    if let Some(user_id) = &identity.user_id {
        return DerivedKey {
            scope: KeyScope::User,
            value: user_id.clone(),
        };
    }
    if let Some(ip) = client_ip(headers, peer) {
        return DerivedKey {
            scope: KeyScope::Ip,
            value: ip,
        };
    }
    DerivedKey {
        scope: KeyScope::Unknown,
        value: "anonymous".to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
