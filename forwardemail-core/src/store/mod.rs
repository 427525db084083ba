//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends, keyed by profile name
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`DisabledStore`] - Backend that refuses every operation
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`EncryptedFileStore`] - Passphrase-encrypted files (with `file-store` feature)
//! - [`create_store`] - Builds the backend chosen by [`StoreBackend`]
//!
//! # Entry Convention
//!
//! Every entry is addressed by `(service, profile)` where the service is
//! always [`SERVICE_NAME`] and the account is the profile name.
//!
//! # Example
//!
//! ```rust,ignore
//! use forwardemail_core::store::{create_store, Secret, StoreSettings};
//!
//! let store = create_store(&StoreSettings::default());
//! store.set("default", &Secret::new("api-key")).await?;
//! assert_eq!(store.get("default").await?.expose(), "api-key");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::resolve::EnvSource;

mod disabled;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;
#[cfg(feature = "file-store")]
mod file;

pub use disabled::DisabledStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
#[cfg(feature = "file-store")]
pub use file::EncryptedFileStore;

/// Service name every secure-store entry is filed under.
pub const SERVICE_NAME: &str = "forward-email";

/// Environment variable selecting the secure-store backend.
pub const BACKEND_ENV: &str = "FORWARDEMAIL_KEYRING_BACKEND";

/// Environment variable holding the passphrase for the file backend.
pub const PASSPHRASE_ENV: &str = "FORWARDEMAIL_KEYRING_PASSWORD";

/// Upper bound for a single keyring call, which may wait on an OS prompt.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No secret is stored for the profile.
    #[error("no secret stored for profile '{profile}'")]
    NotFound { profile: String },

    /// The store is disabled or could not be initialised.
    #[error("secure store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The backend did not answer within the configured bound.
    #[error("secure store did not respond within {after:?}")]
    Timeout { after: Duration },

    /// The profile name cannot be used as a storage key.
    #[error("invalid profile name for secure store: '{profile}'")]
    InvalidProfile { profile: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Encryption or decryption failed (including a wrong passphrase).
    #[error("crypto error: {message}")]
    Crypto { message: String },

    /// No passphrase could be obtained for the encrypted file store.
    #[error("passphrase unavailable: {message}")]
    Passphrase { message: String },

    /// I/O error reading or writing store files.
    #[error("secure store I/O failed")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("failed to encode or decode stored data")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the error means "nothing stored", as opposed to a broken store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the store refused to operate at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Abstraction over secret storage backends.
///
/// Entries are keyed by profile name under [`SERVICE_NAME`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short backend label for logs and status output.
    fn backend_name(&self) -> &'static str;

    /// Retrieve the secret for a profile.
    ///
    /// Returns [`StoreError::NotFound`] if nothing is stored.
    async fn get(&self, profile: &str) -> Result<Secret, StoreError>;

    /// Store a secret for a profile, overwriting any existing value.
    async fn set(&self, profile: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete the secret for a profile.
    ///
    /// Returns [`StoreError::NotFound`] if nothing was stored.
    async fn delete(&self, profile: &str) -> Result<(), StoreError>;

    /// List profiles that have a stored secret, sorted by name.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Check if a profile has a stored secret without exposing it.
    async fn exists(&self, profile: &str) -> Result<bool, StoreError> {
        match self.get(profile).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Callback producing the passphrase for the encrypted file store.
pub type PassphraseFn = Arc<dyn Fn() -> Result<Secret, StoreError> + Send + Sync>;

/// Secure-store backend, decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Platform keyring (Keychain, Secret Service, Credential Manager).
    Keyring,
    /// Passphrase-encrypted files in a directory.
    File { dir: PathBuf },
    /// In-process store; nothing survives the process.
    Memory,
    /// Every operation fails with [`StoreError::Unavailable`].
    Disabled,
}

impl StoreBackend {
    /// Select the backend from [`BACKEND_ENV`].
    ///
    /// `none`/`disabled` disable the store, `file` uses the default data
    /// directory, `memory` keeps secrets in-process, anything else picks the
    /// platform keyring.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        match env.var(BACKEND_ENV).as_deref().map(str::trim) {
            Some("none") | Some("disabled") => Self::Disabled,
            Some("file") => Self::File {
                dir: default_file_store_dir(),
            },
            Some("memory") => Self::Memory,
            _ => Self::Keyring,
        }
    }
}

/// Default directory for the encrypted file backend.
pub fn default_file_store_dir() -> PathBuf {
    directories::ProjectDirs::from("net", "forwardemail", "forwardemail")
        .map(|dirs| dirs.data_dir().join("keyring"))
        .unwrap_or_else(|| PathBuf::from(".forwardemail-keyring"))
}

/// Passphrase callback reading [`PASSPHRASE_ENV`] from the given environment.
pub fn env_passphrase(env: Arc<dyn EnvSource>) -> PassphraseFn {
    Arc::new(move || match env.var(PASSPHRASE_ENV) {
        Some(value) if !value.is_empty() => Ok(Secret::new(value)),
        _ => Err(StoreError::Passphrase {
            message: format!("set {} to unlock the file keyring", PASSPHRASE_ENV),
        }),
    })
}

/// Everything needed to construct a secure store.
#[derive(Clone)]
pub struct StoreSettings {
    /// Backend to construct.
    pub backend: StoreBackend,

    /// Passphrase source for [`StoreBackend::File`].
    pub passphrase: Option<PassphraseFn>,

    /// Upper bound for blocking backend calls.
    pub timeout: Duration,
}

impl StoreSettings {
    /// Settings for the given backend with the default timeout and no passphrase.
    pub fn new(backend: StoreBackend) -> Self {
        Self {
            backend,
            passphrase: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Derive settings from the environment (backend selector and passphrase).
    pub fn from_env(env: Arc<dyn EnvSource>) -> Self {
        let backend = StoreBackend::from_env(env.as_ref());
        Self {
            backend,
            passphrase: Some(env_passphrase(env)),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the passphrase callback.
    pub fn with_passphrase(mut self, passphrase: PassphraseFn) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    /// Set the blocking-call bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::new(StoreBackend::Keyring)
    }
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend)
            .field("passphrase", &self.passphrase.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Create the secure store described by `settings`.
///
/// A keyring that cannot be initialised, or a backend whose feature is not
/// compiled in, yields a [`DisabledStore`] carrying the reason so that every
/// later call fails with [`StoreError::Unavailable`] instead of pretending to
/// be empty.
pub fn create_store(settings: &StoreSettings) -> Arc<dyn SecretStore> {
    match &settings.backend {
        StoreBackend::Disabled => {
            tracing::debug!("Secure store disabled by configuration");
            Arc::new(DisabledStore::new("secure store disabled"))
        }
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory secret storage");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Keyring => create_keyring_store(settings),
        StoreBackend::File { dir } => create_file_store(dir, settings),
    }
}

#[cfg(feature = "keyring-store")]
fn create_keyring_store(settings: &StoreSettings) -> Arc<dyn SecretStore> {
    match KeyringStore::try_new(SERVICE_NAME) {
        Ok(store) => {
            tracing::debug!("Using OS keyring for secret storage");
            Arc::new(store.with_timeout(settings.timeout))
        }
        Err(e) => {
            tracing::warn!("Keyring unavailable ({}), secure store disabled", e);
            Arc::new(DisabledStore::new(e.to_string()))
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn create_keyring_store(_settings: &StoreSettings) -> Arc<dyn SecretStore> {
    tracing::warn!("Keyring storage requested but keyring-store feature not enabled");
    Arc::new(DisabledStore::new("keyring-store feature not enabled"))
}

#[cfg(feature = "file-store")]
fn create_file_store(dir: &std::path::Path, settings: &StoreSettings) -> Arc<dyn SecretStore> {
    match &settings.passphrase {
        Some(passphrase) => {
            tracing::debug!("Using encrypted file store at {:?}", dir);
            Arc::new(EncryptedFileStore::new(dir, passphrase.clone()).with_timeout(settings.timeout))
        }
        None => {
            tracing::warn!("File store selected without a passphrase source, secure store disabled");
            Arc::new(DisabledStore::new("file store requires a passphrase"))
        }
    }
}

#[cfg(not(feature = "file-store"))]
fn create_file_store(_dir: &std::path::Path, _settings: &StoreSettings) -> Arc<dyn SecretStore> {
    tracing::warn!("File storage requested but file-store feature not enabled");
    Arc::new(DisabledStore::new("file-store feature not enabled"))
}

/// Account name the keyring backend uses for its profile index.
pub(crate) const INDEX_ACCOUNT: &str = "__profiles__";

/// Reject profile names that cannot be used as storage keys.
pub(crate) fn validate_profile(profile: &str) -> Result<(), StoreError> {
    let valid = !profile.is_empty()
        && profile != INDEX_ACCOUNT
        && !profile.starts_with('.')
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidProfile {
            profile: profile.to_string(),
        })
    }
}
