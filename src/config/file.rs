//! TOML configuration file loading
//!
//! Supports `~/.config/mediarelay/config.toml` (or `$MEDIARELAY_CONFIG`) as a
//! persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MediaRelayConfigFile {
    /// Session gateway connection
    #[serde(default)]
    pub gateway: GatewayFileConfig,

    /// Archive and cache storage
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Shared identity behavior
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Per-platform responder overrides, keyed by platform name
    #[serde(default)]
    pub responders: HashMap<String, ResponderFileConfig>,
}

/// Gateway configuration
#[derive(Debug, Default, Deserialize)]
pub struct GatewayFileConfig {
    /// Base URL (e.g. "http://localhost:8081")
    pub url: Option<String>,
    /// Access token
    pub token: Option<String>,
    /// Storage chat the archive lives in
    pub storage_chat_id: Option<i64>,
    /// Outbound request rate
    pub requests_per_second: Option<u32>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
    /// Retries for transient failures
    pub max_retries: Option<u32>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Data directory
    pub data_dir: Option<String>,
    /// Cache database path (defaults to `<data_dir>/cache.db`)
    pub database: Option<String>,
    /// Attribution line appended to archived captions
    pub attribution: Option<String>,
}

/// Shared identity configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Pause between disconnect and reconnect during recovery
    pub reconnect_pause_secs: Option<u64>,
}

/// Overrides for one responder
#[derive(Debug, Default, Deserialize)]
pub struct ResponderFileConfig {
    /// Responder username
    pub username: Option<String>,
    /// Send `/start` before each request
    pub prime: Option<bool>,
    /// Media wait in seconds
    pub timeout_secs: Option<u64>,
    /// Pause between polls in seconds
    pub poll_interval_secs: Option<u64>,
    /// Interaction attempts
    pub attempts: Option<u32>,
    /// Pause between attempts in seconds
    pub retry_delay_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `MediaRelayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MediaRelayConfigFile {
    let Some(path) = config_file_path() else {
        return MediaRelayConfigFile::default();
    };

    if !path.exists() {
        return MediaRelayConfigFile::default();
    }

    match load_from(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            MediaRelayConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_from(path: &Path) -> Result<MediaRelayConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `$MEDIARELAY_CONFIG` or `~/.config/mediarelay/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MEDIARELAY_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("mediarelay").join("config.toml"))
}
