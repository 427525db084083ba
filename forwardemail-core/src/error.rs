//! Top-level error types for the Forward Email client core.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::resolve::CredentialError;
use crate::store::StoreError;

/// Top-level error type encompassing all core errors.
#[derive(Debug, Error)]
pub enum ForwardEmailError {
    /// Error from secure store operations.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No usable credential for the profile.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Error loading or editing the configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error from an API call.
    #[error(transparent)]
    Client(#[from] ClientError),
}
