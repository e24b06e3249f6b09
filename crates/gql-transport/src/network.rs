use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:4000/graphql";

/// Default request timeout in seconds (`GQL_TIMEOUT_SECS`).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connect timeout in seconds (`GQL_CONNECT_TIMEOUT_SECS`).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Pick the GraphQL endpoint: explicit value, then `GQL_ENDPOINT`, then the default.
pub fn resolve_endpoint(explicit: Option<&str>) -> String {
    if let Some(url) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return url.to_string();
    }
    if let Ok(value) = std::env::var("GQL_ENDPOINT") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_ENDPOINT.to_string()
}

pub fn is_secure_endpoint(url: &str) -> bool {
    url.to_ascii_lowercase().starts_with("https://")
}

/// `(request timeout, connect timeout)`, overridable by environment.
pub fn default_timeouts() -> (Duration, Duration) {
    let timeout_secs = std::env::var("GQL_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let connect_secs = std::env::var("GQL_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    (
        Duration::from_secs(timeout_secs),
        Duration::from_secs(connect_secs),
    )
}
