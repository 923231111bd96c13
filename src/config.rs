//! Configuration structures and loading logic

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Registry client configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Registry API root; endpoint paths are joined onto it
    pub base_url: String,
    /// Cache root holding `<author>/<model>/...`
    pub cache_dir: PathBuf,
    /// Size of each block written by the download manager
    pub block_size_bytes: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Compatibility tag sent with pushed artifacts
    pub schema_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_dir: default_cache_dir(),
            block_size_bytes: default_block_size(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            schema_version: default_schema_version(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(base_url) = std::env::var("BAZAAR_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(cache_dir) = std::env::var("BAZAAR_CACHE_DIR") {
            config.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(block_size) = std::env::var("BAZAAR_BLOCK_SIZE") {
            config.block_size_bytes = block_size
                .parse()
                .context("Invalid BAZAAR_BLOCK_SIZE value")?;
        }
        if let Ok(timeout) = std::env::var("BAZAAR_REQUEST_TIMEOUT") {
            config.request_timeout_secs = timeout
                .parse()
                .context("Invalid BAZAAR_REQUEST_TIMEOUT value")?;
        }

        config.base_url = normalize_base_url(&config.base_url);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url: {}", self.base_url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("base_url '{}' cannot be used as a base", self.base_url);
        }
        if self.block_size_bytes == 0 {
            anyhow::bail!("block_size_bytes must be > 0");
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            anyhow::bail!("timeouts must be > 0");
        }
        if self.cache_dir.as_os_str().is_empty() {
            anyhow::bail!("cache_dir cannot be empty");
        }

        Ok(())
    }

    /// Parsed registry root, always ending in `/`
    pub fn base(&self) -> Result<Url> {
        Url::parse(&normalize_base_url(&self.base_url))
            .with_context(|| format!("Invalid base_url: {}", self.base_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Default location of the config file: `<config dir>/model-bazaar/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("model-bazaar").join("config.toml"))
    }
}

/// Relative joins drop the last path segment unless the base ends in `/`
fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

// Default functions
fn default_base_url() -> String {
    "https://staging-modelzoo.azurewebsites.net/api/".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./bazaar_cache")
}
fn default_block_size() -> usize {
    4 * 1024 * 1024
}
fn default_request_timeout() -> u64 {
    300
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_schema_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
