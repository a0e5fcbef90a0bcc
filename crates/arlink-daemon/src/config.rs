//! Daemon configuration (`arlink.toml`)
//!
//! Every section is optional; missing keys take their defaults.

use anyhow::{Context, Result};
use arlink_core::{CoordinateCorrection, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub assets: AssetsConfig,
    pub engine: EngineSection,
    /// Session options applied at startup (same keys as `initSession`)
    pub session: SessionConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    /// Serve HTTPS with this PEM certificate pair
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

/// Where models come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory bundled asset paths are resolved against
    pub root: String,
    /// Directory for downloaded models
    pub cache_dir: String,
    pub http_timeout_secs: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: "assets".to_string(),
            cache_dir: "cache".to_string(),
            http_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Rotation applied when decomposing incoming transforms
    pub coordinate_correction: CoordinateCorrection,
}

/// Read `path`, or use the defaults when there is no such file
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.is_file() {
        info!(path = %path.display(), "No configuration file, using defaults");
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
}
