//! Configuration management for the media relay
//!
//! Values merge as env > TOML file > defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::gateway::{GatewaySettings, RetryPolicy};
use crate::platform::Platform;
use crate::responder::ResponderProfile;
use crate::{Error, Result};

use file::{MediaRelayConfigFile, ResponderFileConfig};

/// Default gateway base URL
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8081";

/// Default attribution line on archived captions
const DEFAULT_ATTRIBUTION: &str = "via mediarelay";

/// Media relay configuration
#[derive(Debug)]
pub struct Config {
    /// Session gateway connection
    pub gateway: GatewayConfig,

    /// Path to data directory
    pub data_dir: PathBuf,

    /// Cache database path
    pub database_path: PathBuf,

    /// Attribution line appended to archived captions
    pub attribution: String,

    /// Pause between disconnect and reconnect during recovery
    pub reconnect_pause: Duration,

    /// Responder protocol parameters, one per platform
    pub responders: Vec<ResponderProfile>,
}

/// Gateway connection configuration
#[derive(Debug)]
pub struct GatewayConfig {
    /// Base URL
    pub url: String,

    /// Access token (from `MEDIARELAY_GATEWAY_TOKEN`)
    pub token: Option<SecretString>,

    /// Storage chat the archive lives in
    pub storage_chat_id: Option<i64>,

    /// Outbound request rate
    pub requests_per_second: u32,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Retry behavior for transient failures
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from env, the config file and defaults
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Merge env over an already parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn from_file(fc: MediaRelayConfigFile) -> Result<Self> {
        let retry = RetryPolicy {
            max_retries: fc
                .gateway
                .max_retries
                .unwrap_or(RetryPolicy::default().max_retries),
            ..RetryPolicy::default()
        };

        // Gateway (env > toml > default)
        let gateway = GatewayConfig {
            url: std::env::var("MEDIARELAY_GATEWAY_URL")
                .ok()
                .or(fc.gateway.url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            token: std::env::var("MEDIARELAY_GATEWAY_TOKEN")
                .ok()
                .or(fc.gateway.token)
                .map(SecretString::from),
            storage_chat_id: std::env::var("MEDIARELAY_STORAGE_CHAT_ID")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.gateway.storage_chat_id),
            requests_per_second: std::env::var("MEDIARELAY_REQUESTS_PER_SECOND")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.gateway.requests_per_second)
                .unwrap_or(5),
            request_timeout: Duration::from_secs(fc.gateway.request_timeout_secs.unwrap_or(30)),
            retry,
        };

        // Data directory (~/.local/share/mediarelay on Linux)
        let data_dir = std::env::var("MEDIARELAY_DATA_DIR")
            .ok()
            .or(fc.storage.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new().map_or_else(
                        || PathBuf::from(".local/share/mediarelay"),
                        |d| d.data_dir().join("mediarelay"),
                    )
                },
                PathBuf::from,
            );
        std::fs::create_dir_all(&data_dir)?;

        let database_path = fc
            .storage
            .database
            .map_or_else(|| data_dir.join("cache.db"), PathBuf::from);

        let attribution = std::env::var("MEDIARELAY_ATTRIBUTION")
            .ok()
            .or(fc.storage.attribution)
            .unwrap_or_else(|| DEFAULT_ATTRIBUTION.to_string());

        let reconnect_pause = Duration::from_secs(fc.session.reconnect_pause_secs.unwrap_or(5));

        let mut overrides = fc.responders;
        let responders = Platform::ALL
            .into_iter()
            .map(|platform| {
                let profile = ResponderProfile::for_platform(platform);
                match overrides.remove(platform.as_str()) {
                    Some(over) => apply_overrides(profile, over),
                    None => profile,
                }
            })
            .collect();
        for unknown in overrides.keys() {
            tracing::warn!(responder = %unknown, "ignoring overrides for unknown platform");
        }

        Ok(Self {
            gateway,
            data_dir,
            database_path,
            attribution,
            reconnect_pause,
            responders,
        })
    }

    /// Settings for the gateway client
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the token or storage chat is missing
    pub fn gateway_settings(&self) -> Result<GatewaySettings> {
        let token = self
            .gateway
            .token
            .as_ref()
            .map(|token| SecretString::from(token.expose_secret().to_string()))
            .ok_or_else(|| Error::Config("MEDIARELAY_GATEWAY_TOKEN is not set".to_string()))?;
        let storage_chat_id = self.gateway.storage_chat_id.ok_or_else(|| {
            Error::Config("MEDIARELAY_STORAGE_CHAT_ID is not set".to_string())
        })?;

        Ok(GatewaySettings {
            base_url: self.gateway.url.clone(),
            token,
            storage_chat_id,
            requests_per_second: self.gateway.requests_per_second,
            request_timeout: self.gateway.request_timeout,
            retry: self.gateway.retry.clone(),
        })
    }
}

fn apply_overrides(mut profile: ResponderProfile, over: ResponderFileConfig) -> ResponderProfile {
    if let Some(username) = over.username {
        profile.username = username.trim_start_matches('@').to_string();
    }
    if let Some(prime) = over.prime {
        profile.prime = prime;
    }
    if let Some(secs) = over.timeout_secs {
        profile.poll.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = over.poll_interval_secs {
        profile.poll.interval = Duration::from_secs(secs.max(1));
    }
    if let Some(attempts) = over.attempts {
        profile.attempts = attempts.max(1);
    }
    if let Some(secs) = over.retry_delay_secs {
        profile.retry_delay = Duration::from_secs(secs);
    }
    profile
}
