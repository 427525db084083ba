//! Authentication for requests to the Forward Email API.
//!
//! The API uses HTTP Basic authentication with the API key as the user name
//! and an empty password, i.e. `Authorization: Basic base64(key + ":")`.
//!
//! # Example
//!
//! ```rust,ignore
//! use forwardemail_core::auth::{AuthProvider, ProviderConfig};
//!
//! let provider = AuthProvider::new(ProviderConfig::from_env("default", config, store));
//! let credential = provider.get_api_key().await?;
//! println!("using key from {}", credential.source);
//! provider.validate_with(&credential).await?;
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, StatusCode};
use std::sync::Arc;
use url::Url;

use crate::api_error::ApiError;
use crate::client::{Client, ClientError, Result};
use crate::config::Config;
use crate::resolve::{Credential, CredentialError, CredentialResolver, EnvSource, ProcessEnv, PromptFn};
use crate::store::{Secret, SecretStore};

/// Endpoint used by [`AuthProvider::validate`].
pub const VALIDATE_PATH: &str = "/v1/account";

/// Injected dependencies of an [`AuthProvider`].
#[derive(Clone)]
pub struct ProviderConfig {
    /// Profile whose key is resolved.
    pub profile: String,
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Secure store consulted after the environment.
    pub store: Arc<dyn SecretStore>,
    /// Environment variables.
    pub env: Arc<dyn EnvSource>,
}

impl ProviderConfig {
    /// Provider config reading the real process environment.
    pub fn from_env(
        profile: impl Into<String>,
        config: Arc<Config>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            profile: profile.into(),
            config,
            store,
            env: Arc::new(ProcessEnv),
        }
    }
}

/// Holds the resolution inputs for one profile and authenticates requests.
///
/// The provider itself resolves the key on every call. [`Client`] and
/// [`validate_with`](Self::validate_with) bind a single resolved credential.
#[derive(Clone)]
pub struct AuthProvider {
    profile: String,
    config: Arc<Config>,
    resolver: CredentialResolver,
}

impl AuthProvider {
    /// Create a provider from injected dependencies.
    pub fn new(provider: ProviderConfig) -> Self {
        let resolver = CredentialResolver::new(
            Arc::clone(&provider.config),
            provider.store,
            provider.env,
        );
        Self {
            profile: provider.profile,
            config: provider.config,
            resolver,
        }
    }

    /// Enable an interactive prompt as the last credential source.
    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.resolver = self.resolver.with_prompt(prompt);
        self
    }

    /// Profile this provider authenticates as.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the API key for the profile.
    pub async fn get_api_key(&self) -> std::result::Result<Credential, CredentialError> {
        self.resolver.resolve(&self.profile).await
    }

    /// Set the `Authorization` header on a request.
    pub async fn apply(&self, request: &mut Request) -> std::result::Result<(), CredentialError> {
        let credential = self.get_api_key().await?;
        self.apply_credential(request, &credential);
        Ok(())
    }

    /// Set the `Authorization` header from an already resolved credential.
    pub fn apply_credential(&self, request: &mut Request, credential: &Credential) {
        request
            .headers_mut()
            .insert(AUTHORIZATION, basic_auth_value(&credential.secret));
    }

    /// Resolve the key and check it against the API.
    ///
    /// A 401 response yields [`ClientError::InvalidCredential`]; any other
    /// error status is classified as an [`ApiError`].
    pub async fn validate(&self) -> Result<()> {
        let credential = self.get_api_key().await?;
        self.validate_with(&credential).await
    }

    /// Check an already resolved credential against the API.
    ///
    /// Nothing is resolved again, so a prompted key is asked for only once.
    pub async fn validate_with(&self, credential: &Credential) -> Result<()> {
        let client = Client::new(self.clone())?;
        let request = client.request(Method::GET, VALIDATE_PATH)?;

        tracing::debug!("validating API key for profile '{}'", self.profile);
        let response = client.send(request, credential).await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::InvalidCredential(CredentialError::Invalid {
                profile: self.profile.clone(),
                response: ApiError::from_response(response).await,
            }));
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(ApiError::from_response(response).await.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("profile", &self.profile)
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// `Basic base64(key + ":")`, marked sensitive so it is not logged.
///
/// An empty key produces `Basic Og==`.
pub fn basic_auth_value(key: &Secret) -> HeaderValue {
    let encoded = BASE64.encode(format!("{}:", key.expose()));
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic Og=="));
    value.set_sensitive(true);
    value
}

/// Join an API path onto a base URL, keeping any path prefix of the base.
pub(crate) fn endpoint(base_url: &Url, path: &str) -> Result<Url> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}
