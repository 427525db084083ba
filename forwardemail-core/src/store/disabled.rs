//! Secure-store backend that refuses every operation.

use async_trait::async_trait;

use super::{Secret, SecretStore, StoreError};

/// Store used when secure storage is switched off or could not be set up.
///
/// Every call fails with [`StoreError::Unavailable`] so callers can tell a
/// disabled store apart from one that simply has nothing stored.
#[derive(Debug, Clone)]
pub struct DisabledStore {
    reason: String,
}

impl DisabledStore {
    /// Create a disabled store that reports `reason` on every call.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable {
            reason: self.reason.clone(),
        }
    }
}

#[async_trait]
impl SecretStore for DisabledStore {
    fn backend_name(&self) -> &'static str {
        "disabled"
    }

    async fn get(&self, _profile: &str) -> Result<Secret, StoreError> {
        Err(self.unavailable())
    }

    async fn set(&self, _profile: &str, _secret: &Secret) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn delete(&self, _profile: &str) -> Result<(), StoreError> {
        Err(self.unavailable())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Err(self.unavailable())
    }

    async fn exists(&self, _profile: &str) -> Result<bool, StoreError> {
        Err(self.unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_operation_unavailable() {
        let store = DisabledStore::new("keyring backend set to none");

        assert!(store.get("default").await.unwrap_err().is_unavailable());
        assert!(store.set("default", &Secret::new("k")).await.unwrap_err().is_unavailable());
        assert!(store.delete("default").await.unwrap_err().is_unavailable());
        assert!(store.list().await.unwrap_err().is_unavailable());
        assert!(store.exists("default").await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_reason_in_message() {
        let store = DisabledStore::new("keyring backend set to none");
        let err = store.get("default").await.unwrap_err();
        assert!(err.to_string().contains("keyring backend set to none"));
    }
}
