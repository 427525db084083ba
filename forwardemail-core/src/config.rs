//! Profile configuration.
//!
//! Profiles are persisted as TOML in the platform configuration directory:
//! `~/.config/forwardemail/config.toml` on Linux,
//! `~/Library/Application Support/net.forwardemail.forwardemail/config.toml`
//! on macOS and `%APPDATA%\forwardemail\forwardemail\config\config.toml` on
//! Windows.
//!
//! # Example
//!
//! ```toml
//! current_profile = "default"
//!
//! [profiles.default]
//! base_url = "https://api.forwardemail.net"
//! timeout_secs = 30
//! output = "table"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::store::Secret;

/// Name of the profile used when none is specified.
pub const DEFAULT_PROFILE: &str = "default";

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.forwardemail.net";

/// Request timeout applied when a profile does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The named profile does not exist.
    #[error("profile '{profile}' not found")]
    ProfileNotFound { profile: String },

    /// The profile's base URL cannot be parsed.
    #[error("invalid base URL '{url}' for profile '{profile}'")]
    InvalidBaseUrl {
        profile: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The current profile cannot be removed.
    #[error("cannot remove the current profile '{profile}'")]
    RemoveCurrent { profile: String },

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,

    /// I/O error reading or writing the config file.
    #[error("failed to read or write config file")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize config")]
    Serialize(#[from] toml::ser::Error),
}

/// Preferred output format of a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Csv => "csv",
        };
        write!(f, "{label}")
    }
}

/// Settings for one environment/account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Base URL of the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Preferred output format.
    #[serde(default)]
    pub output: OutputFormat,

    /// Inline API key. Discouraged; prefer the secure store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            output: OutputFormat::default(),
            api_key: None,
        }
    }
}

impl Profile {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The inline API key, if one is set and non-empty.
    pub fn inline_api_key(&self) -> Option<&Secret> {
        self.api_key.as_ref().filter(|key| !key.is_empty())
    }
}

/// The full configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Profile used when none is given on the command line.
    #[serde(default = "default_profile_name")]
    pub current_profile: String,

    /// All profiles by name.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

fn default_profile_name() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
        Self {
            current_profile: default_profile_name(),
            profiles,
        }
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("net", "forwardemail", "forwardemail")
            .ok_or(ConfigError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load the config from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::default_path()?)
    }

    /// Load the config from a specific path, or defaults if the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save the config to a specific path with owner-only permissions.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        write_private(path, contents.as_bytes())?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                profile: name.to_string(),
            })
    }

    /// Look up a profile by name for modification.
    pub fn profile_mut(&mut self, name: &str) -> Result<&mut Profile, ConfigError> {
        self.profiles
            .get_mut(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                profile: name.to_string(),
            })
    }

    /// Insert or replace a profile.
    pub fn upsert_profile(&mut self, name: impl Into<String>, profile: Profile) {
        self.profiles.insert(name.into(), profile);
    }

    /// Remove a profile. The current profile cannot be removed.
    pub fn remove_profile(&mut self, name: &str) -> Result<Profile, ConfigError> {
        if name == self.current_profile {
            return Err(ConfigError::RemoveCurrent {
                profile: name.to_string(),
            });
        }
        self.profiles
            .remove(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                profile: name.to_string(),
            })
    }

    /// Make an existing profile the current one.
    pub fn set_current(&mut self, name: &str) -> Result<(), ConfigError> {
        self.profile(name)?;
        self.current_profile = name.to_string();
        Ok(())
    }

    /// Store an API key inline in a profile.
    ///
    /// This writes the key in plain text to the config file and is a last
    /// resort when no secure store is available.
    pub fn set_inline_api_key(&mut self, name: &str, key: Secret) -> Result<(), ConfigError> {
        tracing::warn!(
            "Storing API key for profile '{}' in plain text in the config file",
            name
        );
        self.profile_mut(name)?.api_key = Some(key);
        Ok(())
    }

    /// Remove an inline API key. Returns whether one was present.
    pub fn clear_inline_api_key(&mut self, name: &str) -> Result<bool, ConfigError> {
        Ok(self.profile_mut(name)?.api_key.take().is_some())
    }

    /// Parsed base URL of a profile.
    pub fn base_url(&self, name: &str) -> Result<Url, ConfigError> {
        let profile = self.profile(name)?;
        Url::parse(&profile.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            profile: name.to_string(),
            url: profile.base_url.clone(),
            source,
        })
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    use std::io::Write;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // The create mode only applies to new files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    Ok(())
}
