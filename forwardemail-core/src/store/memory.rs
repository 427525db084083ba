//! In-memory secret storage implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Secret, SecretStore, StoreError};

/// In-memory secret store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a memory store pre-populated with `(profile, secret)` pairs.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Secret)>,
        K: Into<String>,
    {
        Self {
            data: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("profiles_count", &count)
            .finish()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend {
        message: format!("lock poisoned: {}", e),
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, profile: &str) -> Result<Secret, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        data.get(profile).cloned().ok_or_else(|| StoreError::NotFound {
            profile: profile.to_string(),
        })
    }

    async fn set(&self, profile: &str, secret: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(profile.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, profile: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        match data.remove(profile) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                profile: profile.to_string(),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        let secret = Secret::new("test-value");

        store.set("default", &secret).await.unwrap();
        let retrieved = store.get("default").await.unwrap();

        assert_eq!(retrieved.expose(), "test-value");
    }

    #[tokio::test]
    async fn test_memory_store_get_nonexistent() {
        let store = MemoryStore::new();
        let result = store.get("nonexistent").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        store.set("default", &Secret::new("test-value")).await.unwrap();
        store.delete("default").await.unwrap();

        let result = store.get("default").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing_is_error() {
        let store = MemoryStore::new();
        let result = store.delete("ghost").await;
        assert!(matches!(result, Err(StoreError::NotFound { ref profile }) if profile == "ghost"));
    }

    #[tokio::test]
    async fn test_memory_store_list_sorted() {
        let store = MemoryStore::new();
        store.set("work", &Secret::new("t1")).await.unwrap();
        store.set("default", &Secret::new("t2")).await.unwrap();
        store.set("staging", &Secret::new("t3")).await.unwrap();

        let profiles = store.list().await.unwrap();
        assert_eq!(profiles, vec!["default", "staging", "work"]);
    }

    #[tokio::test]
    async fn test_memory_store_exists() {
        let store = MemoryStore::with_entries([("default", Secret::new("v"))]);

        assert!(store.exists("default").await.unwrap());
        assert!(!store.exists("other").await.unwrap());
    }
}
