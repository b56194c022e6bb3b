//! API server configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:5001").
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path prefix of command routes.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Headers added to every response.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:5001".to_string()
}

fn default_api_prefix() -> String {
    "/api/v0".to_string()
}

fn default_max_body_size() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_prefix: default_api_prefix(),
            headers: BTreeMap::new(),
            max_body_size: default_max_body_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("IPFS_API_LISTEN") {
            config.listen_addr = addr;
        }

        if let Some(max) = lookup("IPFS_API_MAX_BODY") {
            config.max_body_size = max
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid IPFS_API_MAX_BODY '{max}': {e}"))?;
        }

        Ok(config)
    }

    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// Route prefix without a trailing slash.
    pub fn prefix(&self) -> &str {
        self.api_prefix.trim_end_matches('/')
    }
}
