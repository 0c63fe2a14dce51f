//! Configuration loading for the hub service
//!
//! Resolution priority:
//! 1. Explicit config path from the command line (must load, errors surface)
//! 2. `BINSIGHT_CONFIG` environment variable (must load, errors surface)
//! 3. Platform config dir (`binsight/config.toml`), skipped with a warning
//!    when unreadable
//! 4. Compiled defaults
//!
//! Individual CLI flags (port, database path) are applied on top by the
//! binary after loading.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hub service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// HTTP/WebSocket listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Decoded image ceiling; larger captures keep metadata only
    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: usize,
    /// TTL for cached listings and statistics
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Bounded in-memory alert ring size, oldest evicted first
    #[serde(default = "default_alert_ring_capacity")]
    pub alert_ring_capacity: usize,
    /// Hub connections silent for longer than this are treated as dead
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Producer services probed for liveness
    #[serde(default)]
    pub upstreams: Vec<UpstreamTarget>,
    /// Interval between upstream probe rounds
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,
    /// Interval between periodic StatsUpdate/SystemStatus broadcasts
    #[serde(default = "default_stats_interval_seconds")]
    pub stats_interval_seconds: u64,
}

/// One upstream producer to health-probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamTarget {
    pub name: String,
    pub url: String,
}

fn default_port() -> u16 {
    8420
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("binsight.db")
}

fn default_image_max_bytes() -> usize {
    512 * 1024
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_alert_ring_capacity() -> usize {
    200
}

fn default_idle_timeout_seconds() -> u64 {
    30
}

fn default_probe_interval_seconds() -> u64 {
    15
}

fn default_stats_interval_seconds() -> u64 {
    30
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_path: default_database_path(),
            image_max_bytes: default_image_max_bytes(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            alert_ring_capacity: default_alert_ring_capacity(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            upstreams: Vec::new(),
            probe_interval_seconds: default_probe_interval_seconds(),
            stats_interval_seconds: default_stats_interval_seconds(),
        }
    }
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("binsight"))
        .unwrap_or_else(|| PathBuf::from("./binsight_data"))
}

/// Load hub configuration following the priority order above
pub fn load_hub_config(cli_config: Option<&Path>) -> Result<HubConfig> {
    // Priority 1: explicit command-line path
    if let Some(path) = cli_config {
        return parse_config_file(path);
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var("BINSIGHT_CONFIG") {
        return parse_config_file(Path::new(&path));
    }

    // Priority 3: platform config dir
    if let Some(path) = platform_config_file() {
        if path.exists() {
            match parse_config_file(&path) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                }
            }
        }
    }

    // Priority 4: compiled defaults
    Ok(HubConfig::default())
}

fn parse_config_file(path: &Path) -> Result<HubConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))
}

fn platform_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("binsight").join("config.toml"))
}
