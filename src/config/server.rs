//! Server Configuration
//!
//! Production configuration for the headless server.
//! Values come from environment variables (optionally via `.env`) and can be
//! overridden by CLI flags.

use crate::kv::UpstashConfig;
use crate::memory::sync::{DEFAULT_DEBOUNCE, DEFAULT_WRITE_TIMEOUT};
use crate::proxy::ShopifyConfig;
use crate::scheduler::DEFAULT_PASS_INTERVAL;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

/// Longest accepted spacing between dedup passes (one year)
pub const MAX_DEDUP_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// API key required on `/api/*` routes
    pub api_key: Option<String>,
    /// Enable CORS
    pub enable_cors: bool,
    /// Directory with the built dashboard
    pub public_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Maximum upload size in bytes
    pub max_upload_bytes: usize,
    /// Upstash Redis REST endpoint
    pub upstash_url: Option<String>,
    /// Upstash Redis REST bearer token
    pub upstash_token: Option<String>,
    /// Timeout for a single remote store request
    pub kv_timeout_secs: u64,
    /// Quiet period before a state change is saved
    pub debounce_ms: u64,
    /// Spacing between autonomous dedup passes
    pub dedup_interval_secs: u64,
    pub shopify_store_url: Option<String>,
    pub shopify_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("LUMINOUS_HOST").unwrap_or(defaults.host),
            port: var("LUMINOUS_PORT")
                .or_else(|| var("PORT"))
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            api_key: non_empty("LUMINOUS_API_KEY"),
            enable_cors: var("LUMINOUS_ENABLE_CORS")
                .map(|v| v != "false")
                .unwrap_or(defaults.enable_cors),
            public_dir: var("LUMINOUS_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            log_level: var("LUMINOUS_LOG_LEVEL").unwrap_or(defaults.log_level),
            max_upload_bytes: parsed("LUMINOUS_MAX_UPLOAD_BYTES")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_upload_bytes),
            upstash_url: non_empty("UPSTASH_REDIS_REST_URL"),
            upstash_token: non_empty("UPSTASH_REDIS_REST_TOKEN"),
            kv_timeout_secs: parsed("LUMINOUS_KV_TIMEOUT_SECS").unwrap_or(defaults.kv_timeout_secs),
            debounce_ms: parsed("LUMINOUS_DEBOUNCE_MS").unwrap_or(defaults.debounce_ms),
            dedup_interval_secs: parsed("LUMINOUS_DEDUP_INTERVAL_SECS")
                .unwrap_or(defaults.dedup_interval_secs),
            shopify_store_url: non_empty("SHOPIFY_STORE_URL"),
            shopify_token: non_empty("SHOPIFY_ADMIN_API_TOKEN"),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err(format!("Invalid port: {}", self.port));
        }
        if self.kv_timeout_secs == 0 {
            return Err("Remote store timeout must be at least one second".to_string());
        }
        if self.dedup_interval_secs == 0 {
            return Err("Dedup interval must be at least one second".to_string());
        }
        if self.dedup_interval_secs > MAX_DEDUP_INTERVAL_SECS {
            return Err(format!(
                "Dedup interval must be at most {} seconds",
                MAX_DEDUP_INTERVAL_SECS
            ));
        }
        if self.upstash_url.is_some() != self.upstash_token.is_some() {
            return Err(
                "UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN must be set together"
                    .to_string(),
            );
        }

        if self.upstash_url.is_none() {
            tracing::warn!("Upstash credentials not configured. State will not be persisted.");
        }
        if self.api_key.is_none() {
            tracing::warn!("No API key configured. Server will accept all requests.");
        }

        Ok(())
    }

    /// Set the dedup interval from minutes. An overflowing value is kept out
    /// of range so `validate` rejects it.
    pub fn set_dedup_interval_mins(&mut self, mins: u64) {
        self.dedup_interval_secs = mins.checked_mul(60).unwrap_or(u64::MAX);
    }

    /// Default tracing filter for the configured level
    pub fn log_filter(&self) -> String {
        let level = self.log_level.trim();
        let level = if level.is_empty() { "info" } else { level };
        format!("luminous_lib={level},luminous_server={level}")
    }

    /// Get bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if authentication is required
    pub fn auth_required(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn upstash(&self) -> Option<UpstashConfig> {
        UpstashConfig::from_parts(
            self.upstash_url.clone(),
            self.upstash_token.clone(),
            self.kv_timeout(),
        )
    }

    pub fn shopify(&self) -> Option<ShopifyConfig> {
        ShopifyConfig::from_parts(self.shopify_store_url.clone(), self.shopify_token.clone())
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_secs(self.kv_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn dedup_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_interval_secs)
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &redact(&self.api_key))
            .field("enable_cors", &self.enable_cors)
            .field("public_dir", &self.public_dir)
            .field("log_level", &self.log_level)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("upstash_url", &self.upstash_url)
            .field("upstash_token", &redact(&self.upstash_token))
            .field("kv_timeout_secs", &self.kv_timeout_secs)
            .field("debounce_ms", &self.debounce_ms)
            .field("dedup_interval_secs", &self.dedup_interval_secs)
            .field("shopify_store_url", &self.shopify_store_url)
            .field("shopify_token", &redact(&self.shopify_token))
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            api_key: None,
            enable_cors: true,
            public_dir: PathBuf::from("public"),
            log_level: "info".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            upstash_url: None,
            upstash_token: None,
            kv_timeout_secs: DEFAULT_WRITE_TIMEOUT.as_secs(),
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            dedup_interval_secs: DEFAULT_PASS_INTERVAL.as_secs(),
            shopify_store_url: None,
            shopify_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.debounce(), Duration::from_millis(1000));
        assert_eq!(config.dedup_interval(), Duration::from_secs(1800));
        assert!(config.enable_cors);
        assert!(config.upstash().is_none());
    }

    #[test]
    fn test_reads_environment() {
        let config = from_vars(&[
            ("PORT", "9000"),
            ("UPSTASH_REDIS_REST_URL", "https://eu1.upstash.io"),
            ("UPSTASH_REDIS_REST_TOKEN", "secret"),
            ("LUMINOUS_DEDUP_INTERVAL_SECS", "60"),
            ("LUMINOUS_ENABLE_CORS", "false"),
            ("SHOPIFY_STORE_URL", ""),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.dedup_interval(), Duration::from_secs(60));
        assert!(!config.enable_cors);
        assert!(config.shopify_store_url.is_none());
        assert_eq!(config.upstash().unwrap().url, "https://eu1.upstash.io");
        assert!(config.validate().is_ok());
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_luminous_port_wins_over_port() {
        let config = from_vars(&[("PORT", "9000"), ("LUMINOUS_PORT", "9100")]);
        assert_eq!(config.port, 9100);
    }

    #[test]
    fn test_half_configured_upstash_is_rejected() {
        let config = from_vars(&[("UPSTASH_REDIS_REST_URL", "https://eu1.upstash.io")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dedup_interval_from_minutes() {
        let mut config = ServerConfig::default();
        config.set_dedup_interval_mins(5);
        assert_eq!(config.dedup_interval(), Duration::from_secs(300));
        assert!(config.validate().is_ok());

        config.set_dedup_interval_mins(u64::MAX);
        assert_eq!(config.dedup_interval_secs, u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_filter_follows_level() {
        assert_eq!(
            ServerConfig::default().log_filter(),
            "luminous_lib=info,luminous_server=info"
        );
        let config = from_vars(&[("LUMINOUS_LOG_LEVEL", "debug")]);
        assert_eq!(config.log_filter(), "luminous_lib=debug,luminous_server=debug");
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }
}
