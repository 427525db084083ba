//! # Forward Email Core
//!
//! Credential handling and API plumbing for the Forward Email CLI.
//!
//! This crate provides:
//! - Secure storage of API keys per profile (OS keyring, encrypted files, or disabled)
//! - Resolution of the API key from environment, secure store and config, in a fixed order
//! - Basic authentication of requests and validation of keys against the API
//! - Classification of API error responses into a typed taxonomy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use forwardemail_core::{AuthProvider, Client, Config, ProviderConfig, create_store, StoreSettings, ProcessEnv};
//!
//! async fn list_domains() -> Result<serde_json::Value, forwardemail_core::ClientError> {
//!     let config = Arc::new(Config::load()?);
//!     let store = create_store(&StoreSettings::from_env(Arc::new(ProcessEnv)));
//!     let auth = AuthProvider::new(ProviderConfig::from_env("default", config, store));
//!     Client::new(auth)?.get("/v1/domains").await
//! }
//! ```

pub mod api_error;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod resolve;
pub mod store;

// Re-export commonly used types at crate root
pub use api_error::{
    ApiError,
    ErrorKind,
    error_code,
    is_kind,
    is_retryable,
    status_code,
};

pub use auth::{
    AuthProvider,
    ProviderConfig,
    basic_auth_value,
};

pub use client::{
    Client,
    ClientError,
};

pub use config::{
    Config,
    ConfigError,
    OutputFormat,
    Profile,
};

pub use resolve::{
    Credential,
    CredentialError,
    CredentialResolver,
    CredentialSource,
    EnvSource,
    ProcessEnv,
};

pub use store::{
    DisabledStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreBackend,
    StoreError,
    StoreSettings,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

#[cfg(feature = "file-store")]
pub use store::EncryptedFileStore;

pub use error::ForwardEmailError;
