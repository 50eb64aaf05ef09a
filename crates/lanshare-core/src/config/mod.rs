//! Configuration management for Lanshare.
//!
//! This module handles loading, saving, and validating Lanshare configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/lanshare/config.toml` |
//! | macOS | `~/Library/Application Support/Lanshare/config.toml` |
//! | Windows | `%APPDATA%\Lanshare\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [general]
//! device_name = "desk"
//!
//! [network]
//! discovery_port = 48480
//! transfer_port = 48481
//! web_port = 4848
//! peer_ttl = "5m"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Lanshare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Direct transfer settings
    pub transfer: TransferConfig,
    /// HTTP staging settings
    pub staging: StagingConfig,
    /// Port supervisor settings
    pub supervisor: SupervisorConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name announced on the network
    pub device_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
        }
    }
}

/// Hostname of this machine, or a fixed fallback.
#[must_use]
pub fn default_device_name() -> String {
    hostname::get().map_or_else(
        |_| "Lanshare Device".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Discovery port (UDP)
    pub discovery_port: u16,
    /// Direct transfer port (TCP)
    pub transfer_port: u16,
    /// Web/staging port (TCP)
    pub web_port: u16,
    /// Bind the web server to localhost only
    pub localhost_only: bool,
    /// Forget peers not heard from for this long (None keeps them forever)
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub peer_ttl: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            transfer_port: crate::DEFAULT_TRANSFER_PORT,
            web_port: crate::DEFAULT_WEB_PORT,
            localhost_only: false,
            peer_ttl: None,
        }
    }
}

/// Direct transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Body chunk size in bytes (at most 8192)
    pub chunk_size: usize,
    /// Maximum concurrent incoming transfers
    pub max_connections: usize,
    /// Stall timeout for a single read or write on a transfer connection
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// Accept incoming transfers without asking
    pub auto_accept: bool,
    /// Directory incoming files are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::MAX_CHUNK_SIZE,
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
            io_timeout: Duration::from_secs(30),
            auto_accept: false,
            download_dir: None,
        }
    }
}

impl TransferConfig {
    /// Directory incoming files land in.
    ///
    /// Falls back to the user's download directory, then the current directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            directories::UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

/// HTTP staging configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory uploaded files are stored in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    /// Maximum accepted upload body in bytes
    pub max_upload_size: usize,
    /// Maximum concurrent HTTP requests
    pub max_concurrent_requests: usize,
    /// Maximum transfer history entries kept (None keeps all)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            max_upload_size: 1024 * 1024 * 1024,
            max_concurrent_requests: 32,
            history_limit: None,
        }
    }
}

impl StagingConfig {
    /// Directory staged uploads are stored in.
    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "lanshare", "Lanshare").map_or_else(
                || std::env::temp_dir().join("lanshare-staging"),
                |dirs| dirs.data_dir().join("staging"),
            )
        })
    }
}

/// Port supervisor configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Interval between port checks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Timeout for a single port probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check the configuration for values the services cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.network.web_port != 0 && self.network.web_port == self.network.transfer_port {
            return Err(invalid(
                "network.web_port",
                "must differ from network.transfer_port",
            ));
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(invalid(
                "transfer.chunk_size",
                &format!("must be between 1 and {}", crate::MAX_CHUNK_SIZE),
            ));
        }
        if self.transfer.max_connections == 0 {
            return Err(invalid("transfer.max_connections", "must be at least 1"));
        }
        if self.staging.max_concurrent_requests == 0 {
            return Err(invalid(
                "staging.max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if self.supervisor.interval.is_zero() {
            return Err(invalid("supervisor.interval", "must be non-zero"));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanshare", "Lanshare")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, multiplier) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 60 * 60)
        } else {
            return Err(format!("invalid duration format: '{s}'"));
        };
        let n = digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?;
        n.checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Parse a human duration such as `30s`, `5m` or `1h`.
///
/// # Errors
///
/// Returns a description of the problem if the text is not a valid duration.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::parse(s)
}
