//! Node configuration
//!
//! Loaded from a TOML file when one is given, with CLI flags layered
//! on top. Every field has a default so a bare `peercache-node` run
//! comes up as a standalone root.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root node addresses (`host:port`). Empty means this node is a
    /// root itself and fetches straight from origin.
    #[serde(default)]
    pub roots: Vec<String>,

    /// Serving port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address advertised to sibling selectors (`host:port`).
    /// Autodetected from the outbound interface when empty.
    #[serde(default)]
    pub advertise_addr: String,

    /// Address dialed (UDP, no traffic) to discover the outbound IP
    #[serde(default = "default_detect_addr")]
    pub detect_addr: String,

    /// On-disk media root for cached blocks
    #[serde(default = "default_media")]
    pub media: PathBuf,

    /// Cache byte bound
    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: u64,

    /// Cache entry bound
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Prefetch worker-pool size; 0 disables prefetch
    #[serde(default = "default_prefetch_workers")]
    pub prefetch_workers: usize,

    /// Per-candidate fetch attempt budget in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Shared cluster credential; empty disables authentication
    #[serde(default)]
    pub auth_token: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    19145
}

fn default_detect_addr() -> String {
    "8.8.8.8:80".to_string()
}

fn default_media() -> PathBuf {
    PathBuf::from("/tmp/cache")
}

fn default_cache_bytes() -> u64 {
    8 * 1024 * 1024 * 1024 // 8 GiB
}

fn default_max_entries() -> u64 {
    1_000_000
}

fn default_prefetch_workers() -> usize {
    64
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            port: default_port(),
            advertise_addr: String::new(),
            detect_addr: default_detect_addr(),
            media: default_media(),
            cache_bytes: default_cache_bytes(),
            max_entries: default_max_entries(),
            prefetch_workers: default_prefetch_workers(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            auth_token: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port cannot be 0");
        }
        if self.cache_bytes == 0 {
            bail!("cache_bytes must be > 0");
        }
        if self.max_entries == 0 {
            bail!("max_entries must be > 0");
        }
        if self.media.as_os_str().is_empty() {
            bail!("media path cannot be empty");
        }
        if self.advertise_addr.is_empty() && self.detect_addr.is_empty() {
            bail!("either advertise_addr or detect_addr must be set");
        }
        if self.attempt_timeout_secs == 0 {
            bail!("attempt_timeout_secs must be > 0");
        }
        Ok(())
    }
}
