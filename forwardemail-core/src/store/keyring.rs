//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;
use std::time::Duration;

use super::{validate_profile, Secret, SecretStore, StoreError, DEFAULT_STORE_TIMEOUT, INDEX_ACCOUNT};

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// # Entry Format
///
/// Each profile is stored as an entry with service `service_name` and
/// account = profile name. Platform keyrings cannot enumerate entries, so
/// the store keeps its own profile index under a reserved account.
///
/// Keyring calls can block on an OS unlock prompt. Each call runs on the
/// blocking pool and is abandoned after `timeout`.
pub struct KeyringStore {
    service_name: String,
    timeout: Duration,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns [`StoreError::Unavailable`] if the keyring backend is not
    /// available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
                timeout: DEFAULT_STORE_TIMEOUT,
            }),
            Err(e) => Err(StoreError::Unavailable {
                reason: format!("keyring backend not available: {}", e),
            }),
        }
    }

    /// Set the upper bound for a single keyring call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a keyring operation on the blocking pool, bounded by the timeout.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&str) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service_name.clone();
        let task = tokio::task::spawn_blocking(move || op(&service));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Backend {
                message: format!("keyring task failed: {}", join_err),
            }),
            Err(_) => {
                tracing::warn!("Keyring call exceeded {:?}, giving up", self.timeout);
                Err(StoreError::Timeout {
                    after: self.timeout,
                })
            }
        }
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn entry(service: &str, account: &str) -> Result<Entry, StoreError> {
    Entry::new(service, account).map_err(|e| StoreError::Backend {
        message: format!("failed to create keyring entry: {}", e),
    })
}

fn map_keyring_error(profile: &str, err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoEntry => StoreError::NotFound {
            profile: profile.to_string(),
        },
        keyring::Error::NoStorageAccess(e) => StoreError::Unavailable {
            reason: format!("keyring locked or inaccessible: {}", e),
        },
        keyring::Error::PlatformFailure(e) => StoreError::Backend {
            message: format!("platform keyring failure: {}", e),
        },
        keyring::Error::Ambiguous(_) => StoreError::Backend {
            message: format!("ambiguous keyring entry for profile: {}", profile),
        },
        e => StoreError::Backend {
            message: format!("keyring error: {}", e),
        },
    }
}

fn read_index(service: &str) -> Result<Vec<String>, StoreError> {
    match entry(service, INDEX_ACCOUNT)?.get_password() {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(keyring::Error::NoEntry) => Ok(Vec::new()),
        Err(e) => Err(map_keyring_error(INDEX_ACCOUNT, e)),
    }
}

fn write_index(service: &str, profiles: &[String]) -> Result<(), StoreError> {
    let index = entry(service, INDEX_ACCOUNT)?;
    if profiles.is_empty() {
        return match index.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(INDEX_ACCOUNT, e)),
        };
    }
    let raw = serde_json::to_string(profiles)?;
    index
        .set_password(&raw)
        .map_err(|e| map_keyring_error(INDEX_ACCOUNT, e))
}

#[async_trait]
impl SecretStore for KeyringStore {
    fn backend_name(&self) -> &'static str {
        "keyring"
    }

    async fn get(&self, profile: &str) -> Result<Secret, StoreError> {
        validate_profile(profile)?;
        let profile = profile.to_string();
        self.run(move |service| {
            entry(service, &profile)?
                .get_password()
                .map(Secret::new)
                .map_err(|e| map_keyring_error(&profile, e))
        })
        .await
    }

    async fn set(&self, profile: &str, secret: &Secret) -> Result<(), StoreError> {
        validate_profile(profile)?;
        let profile = profile.to_string();
        let secret = secret.clone();
        self.run(move |service| {
            entry(service, &profile)?
                .set_password(secret.expose())
                .map_err(|e| map_keyring_error(&profile, e))?;

            let mut profiles = read_index(service)?;
            if !profiles.contains(&profile) {
                profiles.push(profile.clone());
                profiles.sort();
                write_index(service, &profiles)?;
            }
            Ok(())
        })
        .await?;
        tracing::info!("Stored API key in OS keyring");
        Ok(())
    }

    async fn delete(&self, profile: &str) -> Result<(), StoreError> {
        validate_profile(profile)?;
        let profile = profile.to_string();
        self.run(move |service| {
            entry(service, &profile)?
                .delete_credential()
                .map_err(|e| map_keyring_error(&profile, e))?;

            let mut profiles = read_index(service)?;
            let before = profiles.len();
            profiles.retain(|p| p != &profile);
            if profiles.len() != before {
                write_index(service, &profiles)?;
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut profiles = self.run(read_index).await?;
        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests tolerate keyrings that are missing or do not persist
    // (headless CI, the crate's mock backend) and skip instead of failing.

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("forward-email-test") {
            Ok(store) => {
                assert_eq!(store.service_name, "forward-email-test");
                assert_eq!(store.timeout, DEFAULT_STORE_TIMEOUT);
            }
            Err(StoreError::Unavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_keyring_rejects_invalid_profile() {
        let store = match KeyringStore::try_new("forward-email-test-invalid") {
            Ok(s) => s,
            Err(_) => return,
        };

        let result = store.get("../escape").await;
        assert!(matches!(result, Err(StoreError::InvalidProfile { .. })));
    }

    #[tokio::test]
    async fn test_keyring_rejects_index_account() {
        let store = match KeyringStore::try_new("forward-email-test-index") {
            Ok(s) => s,
            Err(_) => return,
        };

        let set = store.set(INDEX_ACCOUNT, &Secret::new("clobber")).await;
        assert!(matches!(set, Err(StoreError::InvalidProfile { .. })));
        let get = store.get(INDEX_ACCOUNT).await;
        assert!(matches!(get, Err(StoreError::InvalidProfile { .. })));
        let delete = store.delete(INDEX_ACCOUNT).await;
        assert!(matches!(delete, Err(StoreError::InvalidProfile { .. })));
    }

    #[tokio::test]
    async fn test_keyring_store_operations() {
        let store = match KeyringStore::try_new("forward-email-test-ops") {
            Ok(s) => s.with_timeout(Duration::from_secs(5)),
            Err(_) => {
                eprintln!("Skipping test_keyring_store_operations: keyring unavailable");
                return;
            }
        };

        let profile = format!(
            "test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let secret = Secret::new("test-value");

        if let Err(e) = store.set(&profile, &secret).await {
            eprintln!("Keyring set failed ({}), skipping test", e);
            return;
        }

        match store.get(&profile).await {
            Ok(retrieved) => {
                assert_eq!(retrieved.expose(), "test-value");
                store.delete(&profile).await.unwrap();
                assert!(store.get(&profile).await.unwrap_err().is_not_found());
                assert!(store.delete(&profile).await.unwrap_err().is_not_found());
            }
            Err(e) => {
                eprintln!("Keyring did not persist the entry ({}), skipping remainder", e);
                let _ = store.delete(&profile).await;
            }
        }
    }
}
