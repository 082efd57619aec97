//! Enricher configuration
//!
//! Defaults match the host site's current markup and API. A TOML file can
//! override any field; `FEEDLOC_ENDPOINT` and `FEEDLOC_BOOTSTRAP_MS` are
//! applied last.

use crate::error::CoreError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Built-in bearer credential used by the web client for API calls
pub const DEFAULT_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

/// Profile lookup endpoint
pub const DEFAULT_ENDPOINT: &str =
    "https://x.com/i/api/graphql/zs_jFPFT78rBpXv9Z3U2YQ/AboutAccountQuery";

/// Top-level storage key holding the whole handle -> record map
pub const DEFAULT_STORAGE_KEY: &str = "xt_locations";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    /// Storage key for the persisted cache
    pub storage_key: String,

    /// Delay between attempts to find the feed container
    pub bootstrap_delay_ms: u64,

    pub dom: DomContract,

    pub bridge: BridgeConfig,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            bootstrap_delay_ms: 500,
            dom: DomContract::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl EnricherConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        debug!(path = %path.display(), "Loaded enricher config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content).map_err(|e| CoreError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FEEDLOC_*` overrides using the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("FEEDLOC_ENDPOINT") {
            self.bridge.endpoint = endpoint;
        }
        if let Some(ms) = lookup("FEEDLOC_BOOTSTRAP_MS") {
            self.bootstrap_delay_ms = ms.parse().map_err(|_| CoreError::InvalidConfig {
                message: format!("FEEDLOC_BOOTSTRAP_MS must be an integer, got '{}'", ms),
            })?;
        }
        self.validate()
    }

    pub fn bootstrap_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_delay_ms)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.storage_key.is_empty() {
            return Err(CoreError::InvalidConfig {
                message: "storage_key must not be empty".to_string(),
            });
        }
        if self.bootstrap_delay_ms == 0 {
            return Err(CoreError::InvalidConfig {
                message: "bootstrap_delay_ms must be positive".to_string(),
            });
        }
        self.bridge.endpoint_url()?;
        Ok(())
    }
}

/// Markers the host page uses for the pieces the scanner cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomContract {
    /// Attribute carrying the structural markers below
    pub marker_attr: String,
    /// Marker value of the feed container
    pub container_marker: String,
    /// Marker value of a single post
    pub unit_marker: String,
    /// Marker value of the block holding the author's name links
    pub name_marker: String,
    /// Attribute set on units once processed
    pub processed_attr: String,
    /// Class carried by inserted annotation nodes
    pub annotation_class: String,
    pub timestamp_tag: String,
    pub anchor_tag: String,
    pub href_attr: String,
    pub annotation_tag: String,
}

impl Default for DomContract {
    fn default() -> Self {
        Self {
            marker_attr: "data-testid".to_string(),
            container_marker: "primaryColumn".to_string(),
            unit_marker: "tweet".to_string(),
            name_marker: "User-Name".to_string(),
            processed_attr: "data-xtension-processed".to_string(),
            annotation_class: "xtension-location-time".to_string(),
            timestamp_tag: "time".to_string(),
            anchor_tag: "a".to_string(),
            href_attr: "href".to_string(),
            annotation_tag: "span".to_string(),
        }
    }
}

/// Settings for the privileged HTTP lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub endpoint: String,

    /// Fixed bearer credential sent with every lookup
    pub bearer_token: String,

    /// Cookie holding the CSRF token
    pub csrf_cookie: String,

    /// Optional per-request timeout; unset means wait indefinitely
    pub request_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bearer_token: DEFAULT_BEARER_TOKEN.to_string(),
            csrf_cookie: "ct0".to_string(),
            request_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Parsed endpoint; only http and https are accepted
    pub fn endpoint_url(&self) -> Result<Url, CoreError> {
        let url = Url::parse(&self.endpoint).map_err(|e| CoreError::InvalidConfig {
            message: format!("bridge.endpoint '{}': {}", self.endpoint, e),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(CoreError::InvalidConfig {
                message: format!(
                    "bridge.endpoint '{}': unsupported scheme {}",
                    self.endpoint, scheme
                ),
            }),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EnricherConfig::default();
        assert_eq!(config.storage_key, "xt_locations");
        assert_eq!(config.bootstrap_delay(), Duration::from_millis(500));
        assert_eq!(config.dom.unit_marker, "tweet");
        assert_eq!(config.bridge.csrf_cookie, "ct0");
        assert!(config.bridge.request_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EnricherConfig::from_toml(
            r#"
            bootstrap_delay_ms = 250

            [dom]
            unit_marker = "post"

            [bridge]
            request_timeout_ms = 10000
            "#,
        )
        .unwrap();

        assert_eq!(config.bootstrap_delay_ms, 250);
        assert_eq!(config.dom.unit_marker, "post");
        assert_eq!(config.dom.container_marker, "primaryColumn");
        assert_eq!(
            config.bridge.request_timeout(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(config.bridge.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = EnricherConfig::from_toml("bootstrap_delay_ms = 0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));

        let err = EnricherConfig::from_toml("storage_key = [1, 2]").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FEEDLOC_ENDPOINT", "http://localhost:9000/lookup"),
            ("FEEDLOC_BOOTSTRAP_MS", "50"),
        ]
        .into_iter()
        .collect();

        let mut config = EnricherConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bridge.endpoint, "http://localhost:9000/lookup");
        assert_eq!(config.bootstrap_delay_ms, 50);

        let mut config = EnricherConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "FEEDLOC_BOOTSTRAP_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn test_endpoint_must_parse_as_url() {
        let err = EnricherConfig::from_toml("[bridge]\nendpoint = \"httpbin\"").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));

        let err =
            EnricherConfig::from_toml("[bridge]\nendpoint = \"ftp://x.com/lookup\"").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));

        let mut config = EnricherConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "FEEDLOC_ENDPOINT").then(|| "http://".to_string()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }
}
