//! Hetzner Cloud client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Configuration for [`HcloudClient`](crate::HcloudClient).
#[derive(Clone, Serialize, Deserialize)]
pub struct HcloudConfig {
    /// API token.
    pub token: String,
    /// API base URL without trailing slash.
    #[serde(default = "HcloudConfig::default_endpoint")]
    pub endpoint: String,
    /// Interval between action status polls in milliseconds.
    #[serde(default = "HcloudConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "HcloudConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl HcloudConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    const fn default_poll_interval_ms() -> u64 {
        500
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Create a config for `token` with default settings.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: Self::default_endpoint(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }

    /// Override the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `HCLOUD_TOKEN`: API token (required)
    /// - `HCLOUD_ENDPOINT`: API base URL
    /// - `HCLOUD_POLL_INTERVAL_MS`: action poll interval
    /// - `HCLOUD_REQUEST_TIMEOUT_SECONDS`: per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if `HCLOUD_TOKEN` is missing or empty.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("HCLOUD_TOKEN").unwrap_or_default();
        let mut config = Self::new(token);

        if let Ok(val) = std::env::var("HCLOUD_ENDPOINT") {
            config = config.with_endpoint(val);
        }
        if let Ok(val) = std::env::var("HCLOUD_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.poll_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("HCLOUD_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.request_timeout_seconds = n;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(ProviderError::Config("HCLOUD_TOKEN is not set".to_string()));
        }
        Ok(())
    }

    /// Action poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

// The token never shows up in logs.
impl std::fmt::Debug for HcloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HcloudConfig")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HcloudConfig::new("secret");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let config = HcloudConfig::new("secret").with_endpoint("http://localhost:4000/v1/");
        assert_eq!(config.endpoint, "http://localhost:4000/v1");
    }

    #[test]
    fn empty_token_rejected() {
        assert!(HcloudConfig::new("  ").validate().is_err());
        assert!(HcloudConfig::new("secret").validate().is_ok());
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", HcloudConfig::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
