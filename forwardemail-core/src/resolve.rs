//! Credential resolution.
//!
//! This module provides:
//! - [`EnvSource`] - Injected view of environment variables
//! - [`CredentialSource`] - Where a resolved API key came from
//! - [`Credential`] - A resolved API key and its provenance
//! - [`CredentialResolver`] - Walks the sources in a fixed order
//!
//! # Precedence
//!
//! 1. `FORWARDEMAIL_<PROFILE>_API_KEY`
//! 2. `FORWARDEMAIL_API_KEY`
//! 3. the secure store entry for the profile
//! 4. the profile's inline `api_key` in the config file
//! 5. an interactive prompt, when the caller installed one
//!
//! The first non-empty value wins. A failing secure store counts as "no
//! value" for step 3, so a locked keyring never hides a key in the config.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::api_error::ApiError;
use crate::config::Config;
use crate::store::{Secret, SecretStore};

/// Prefix shared by every environment variable the resolver reads.
pub const ENV_PREFIX: &str = "FORWARDEMAIL";

/// Generic API key variable, consulted after the profile-specific one.
pub const GENERIC_API_KEY_ENV: &str = "FORWARDEMAIL_API_KEY";

/// Read-only view of environment variables.
///
/// Implemented by [`ProcessEnv`] for the real process environment and by
/// `HashMap<String, String>` for tests.
pub trait EnvSource: Send + Sync {
    /// Value of the variable, or `None` if unset or not valid unicode.
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Name of the profile-specific API key variable.
///
/// The profile is upper-cased and every character outside `[A-Z0-9]` becomes
/// `_`, so `eu-prod` maps to `FORWARDEMAIL_EU_PROD_API_KEY`.
pub fn profile_env_var(profile: &str) -> String {
    let normalized: String = profile
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}_API_KEY", ENV_PREFIX, normalized)
}

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSource {
    /// `FORWARDEMAIL_<PROFILE>_API_KEY`.
    ProfileEnv,
    /// `FORWARDEMAIL_API_KEY`.
    GenericEnv,
    /// The secure store.
    SecureStore,
    /// The inline key in the config file.
    Config,
    /// Typed in by the user at a prompt.
    Interactive,
}

impl CredentialSource {
    /// Sources in the order they are consulted.
    pub const PRECEDENCE: [CredentialSource; 5] = [
        Self::ProfileEnv,
        Self::GenericEnv,
        Self::SecureStore,
        Self::Config,
        Self::Interactive,
    ];
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProfileEnv => write!(f, "profile environment variable"),
            Self::GenericEnv => write!(f, "environment variable"),
            Self::SecureStore => write!(f, "secure store"),
            Self::Config => write!(f, "config file"),
            Self::Interactive => write!(f, "interactive prompt"),
        }
    }
}

/// A resolved API key and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The API key.
    pub secret: Secret,
    /// Where it was found.
    pub source: CredentialSource,
}

/// Error type for credential resolution.
///
/// [`NotFound`](Self::NotFound) is a configuration error raised before any
/// network call. [`Invalid`](Self::Invalid) carries the classified 401 as
/// its source, so the `Unauthorized` sentinel stays reachable.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No source produced a key for the profile.
    #[error(
        "no API key found for profile '{profile}' (set {env_var} or {generic}, \
         or run `forward-email auth login`)"
    )]
    NotFound {
        profile: String,
        env_var: String,
        generic: &'static str,
    },

    /// The remote service rejected the key.
    #[error("API key for profile '{profile}' was rejected by the server")]
    Invalid {
        profile: String,
        #[source]
        response: ApiError,
    },
}

impl CredentialError {
    /// The server's response for a rejected key.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Invalid { response, .. } => Some(response),
            Self::NotFound { .. } => None,
        }
    }

    pub(crate) fn not_found(profile: &str) -> Self {
        Self::NotFound {
            profile: profile.to_string(),
            env_var: profile_env_var(profile),
            generic: GENERIC_API_KEY_ENV,
        }
    }
}

/// Callback asking the user for a key, installed by interactive front-ends.
pub type PromptFn = Arc<dyn Fn(&str) -> Option<Secret> + Send + Sync>;

/// Resolves the API key for one profile from the configured sources.
#[derive(Clone)]
pub struct CredentialResolver {
    config: Arc<Config>,
    store: Arc<dyn SecretStore>,
    env: Arc<dyn EnvSource>,
    prompt: Option<PromptFn>,
}

impl CredentialResolver {
    /// Create a resolver over the given config, store and environment.
    pub fn new(config: Arc<Config>, store: Arc<dyn SecretStore>, env: Arc<dyn EnvSource>) -> Self {
        Self {
            config,
            store,
            env,
            prompt: None,
        }
    }

    /// Enable the interactive prompt as the last source.
    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Resolve the API key for `profile`.
    ///
    /// Sources are consulted in [`CredentialSource::PRECEDENCE`] order and
    /// the first non-empty value is returned.
    pub async fn resolve(&self, profile: &str) -> Result<Credential, CredentialError> {
        for source in CredentialSource::PRECEDENCE {
            trace!("checking {} for profile '{}'", source, profile);
            if let Some(secret) = self.lookup(source, profile).await {
                if secret.is_empty() {
                    trace!("{} is set but empty, skipping", source);
                    continue;
                }
                debug!("resolved API key for profile '{}' from {}", profile, source);
                return Ok(Credential { secret, source });
            }
        }
        Err(CredentialError::not_found(profile))
    }

    async fn lookup(&self, source: CredentialSource, profile: &str) -> Option<Secret> {
        match source {
            CredentialSource::ProfileEnv => self.env.var(&profile_env_var(profile)).map(Secret::new),
            CredentialSource::GenericEnv => self.env.var(GENERIC_API_KEY_ENV).map(Secret::new),
            CredentialSource::SecureStore => match self.store.get(profile).await {
                Ok(secret) => Some(secret),
                Err(e) if e.is_not_found() => {
                    trace!("no secure store entry for profile '{}'", profile);
                    None
                }
                Err(e) if e.is_unavailable() => {
                    debug!("secure store unavailable: {}", e);
                    None
                }
                Err(e) => {
                    warn!(
                        "secure store ({}) read failed for profile '{}': {}",
                        self.store.backend_name(),
                        profile,
                        e
                    );
                    None
                }
            },
            CredentialSource::Config => self
                .config
                .profiles
                .get(profile)
                .and_then(|p| p.inline_api_key())
                .cloned(),
            CredentialSource::Interactive => self.prompt.as_ref().and_then(|prompt| prompt(profile)),
        }
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("store", &self.store.backend_name())
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, DEFAULT_PROFILE};
    use crate::store::{DisabledStore, MemoryStore};

    fn env(pairs: &[(&str, &str)]) -> Arc<dyn EnvSource> {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn config_with_inline(key: Option<&str>) -> Arc<Config> {
        let mut config = Config::default();
        config.upsert_profile(
            DEFAULT_PROFILE,
            Profile {
                api_key: key.map(Secret::new),
                ..Profile::default()
            },
        );
        Arc::new(config)
    }

    #[test]
    fn test_profile_env_var_name() {
        assert_eq!(profile_env_var("default"), "FORWARDEMAIL_DEFAULT_API_KEY");
        assert_eq!(profile_env_var("eu-prod"), "FORWARDEMAIL_EU_PROD_API_KEY");
        assert_eq!(profile_env_var("Work.2"), "FORWARDEMAIL_WORK_2_API_KEY");
    }

    #[tokio::test]
    async fn test_each_source_in_isolation() {
        let cases: Vec<(Arc<dyn EnvSource>, Option<&str>, Option<&str>, CredentialSource)> = vec![
            (env(&[("FORWARDEMAIL_DEFAULT_API_KEY", "p")]), None, None, CredentialSource::ProfileEnv),
            (env(&[("FORWARDEMAIL_API_KEY", "g")]), None, None, CredentialSource::GenericEnv),
            (env(&[]), Some("s"), None, CredentialSource::SecureStore),
            (env(&[]), None, Some("c"), CredentialSource::Config),
        ];

        for (env, stored, inline, expected) in cases {
            let store = match stored {
                Some(v) => MemoryStore::with_entries([(DEFAULT_PROFILE, Secret::new(v))]),
                None => MemoryStore::new(),
            };
            let resolver = CredentialResolver::new(config_with_inline(inline), Arc::new(store), env);
            let credential = resolver.resolve(DEFAULT_PROFILE).await.unwrap();
            assert_eq!(credential.source, expected);
        }
    }

    #[tokio::test]
    async fn test_empty_values_are_skipped() {
        let resolver = CredentialResolver::new(
            config_with_inline(Some("from-config")),
            Arc::new(MemoryStore::with_entries([(DEFAULT_PROFILE, Secret::new(""))])),
            env(&[("FORWARDEMAIL_DEFAULT_API_KEY", ""), ("FORWARDEMAIL_API_KEY", "")]),
        );

        let credential = resolver.resolve(DEFAULT_PROFILE).await.unwrap();
        assert_eq!(credential.secret.expose(), "from-config");
        assert_eq!(credential.source, CredentialSource::Config);
    }

    #[tokio::test]
    async fn test_disabled_store_falls_through() {
        let resolver = CredentialResolver::new(
            config_with_inline(Some("from-config")),
            Arc::new(DisabledStore::new("off")),
            env(&[]),
        );

        let credential = resolver.resolve(DEFAULT_PROFILE).await.unwrap();
        assert_eq!(credential.source, CredentialSource::Config);
    }

    #[tokio::test]
    async fn test_prompt_is_last_resort() {
        let prompt: PromptFn = Arc::new(|_| Some(Secret::new("typed")));

        let resolver = CredentialResolver::new(
            config_with_inline(Some("from-config")),
            Arc::new(MemoryStore::new()),
            env(&[]),
        )
        .with_prompt(prompt.clone());
        assert_eq!(resolver.resolve(DEFAULT_PROFILE).await.unwrap().source, CredentialSource::Config);

        let resolver = CredentialResolver::new(config_with_inline(None), Arc::new(MemoryStore::new()), env(&[]))
            .with_prompt(prompt);
        let credential = resolver.resolve(DEFAULT_PROFILE).await.unwrap();
        assert_eq!(credential.source, CredentialSource::Interactive);
        assert_eq!(credential.secret.expose(), "typed");
    }

    #[tokio::test]
    async fn test_unknown_profile_without_env_not_found() {
        let resolver =
            CredentialResolver::new(config_with_inline(Some("k")), Arc::new(MemoryStore::new()), env(&[]));

        let err = resolver.resolve("nope").await.unwrap_err();
        match err {
            CredentialError::NotFound { profile, env_var, .. } => {
                assert_eq!(profile, "nope");
                assert_eq!(env_var, "FORWARDEMAIL_NOPE_API_KEY");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_credential_debug_redacted() {
        let credential = Credential {
            secret: Secret::new("fe-live-123"),
            source: CredentialSource::GenericEnv,
        };
        assert!(!format!("{:?}", credential).contains("fe-live-123"));
    }
}
