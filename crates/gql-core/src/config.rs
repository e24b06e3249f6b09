//! Client configuration.
//!
//! Values come from code (`ClientConfig::default()` plus setters) or from the
//! environment:
//!
//! - `GQL_QUERY_DEDUPLICATION` - share in-flight queries with identical
//!   document and variables (default: on)
//! - `GQL_SSR_MODE` - server-rendering mode; polling is disabled (default: off)
//!
//! Boolean variables accept `1`, `true`, `yes`, `on` (any case) as true.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub query_deduplication: bool,
    pub ssr_mode: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            query_deduplication: true,
            ssr_mode: false,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            query_deduplication: env_flag("GQL_QUERY_DEDUPLICATION")
                .unwrap_or(defaults.query_deduplication),
            ssr_mode: env_flag("GQL_SSR_MODE").unwrap_or(defaults.ssr_mode),
        }
    }

    pub fn with_query_deduplication(mut self, enabled: bool) -> Self {
        self.query_deduplication = enabled;
        self
    }

    pub fn with_ssr_mode(mut self, enabled: bool) -> Self {
        self.ssr_mode = enabled;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `None` when unset, so callers can keep their default.
fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_flag(&v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.query_deduplication);
        assert!(!config.ssr_mode);
    }

    #[test]
    fn test_parse_flag() {
        for truthy in ["1", "true", "YES", " on "] {
            assert!(parse_flag(truthy), "{truthy}");
        }
        for falsy in ["0", "false", "off", ""] {
            assert!(!parse_flag(falsy), "{falsy}");
        }
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("GQL_SSR_MODE", "true");
        std::env::set_var("GQL_QUERY_DEDUPLICATION", "0");
        let config = ClientConfig::from_env();
        assert!(config.ssr_mode);
        assert!(!config.query_deduplication);
        std::env::remove_var("GQL_SSR_MODE");
        std::env::remove_var("GQL_QUERY_DEDUPLICATION");

        assert!(env_flag("GQL_NONEXISTENT_FLAG_12345").is_none());
    }

    #[test]
    fn test_setters() {
        let config = ClientConfig::default()
            .with_query_deduplication(false)
            .with_ssr_mode(true);
        assert_eq!(
            config,
            ClientConfig {
                query_deduplication: false,
                ssr_mode: true
            }
        );
    }
}
