//! Passphrase-encrypted file storage implementation.
//!
//! Each profile is written to its own file, `forward-email.<profile>`, inside
//! the store directory. The file holds a JSON envelope with an Argon2 salt,
//! an AES-256-GCM nonce and the ciphertext, all base64-encoded. A fresh salt
//! and nonce are drawn on every write.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::SaltString;
use argon2::Argon2;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use super::{
    validate_profile, PassphraseFn, Secret, SecretStore, StoreError, DEFAULT_STORE_TIMEOUT,
    SERVICE_NAME,
};

const ENVELOPE_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;

/// On-disk envelope for one encrypted secret.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Secret store backed by passphrase-encrypted files.
///
/// The passphrase is requested from the callback on every operation that
/// encrypts or decrypts; it is never cached by the store. The callback and
/// the key derivation run on the blocking pool and are abandoned after
/// `timeout`.
pub struct EncryptedFileStore {
    dir: PathBuf,
    passphrase: PassphraseFn,
    timeout: Duration,
}

impl EncryptedFileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>, passphrase: PassphraseFn) -> Self {
        Self {
            dir: dir.into(),
            passphrase,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the upper bound for obtaining the passphrase and running the cipher.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory holding the encrypted files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_prefix() -> String {
        format!("{}.", SERVICE_NAME)
    }

    fn path_for(&self, profile: &str) -> Result<PathBuf, StoreError> {
        validate_profile(profile)?;
        Ok(self.dir.join(format!("{}{}", Self::file_prefix(), profile)))
    }

    /// Run a passphrase-dependent operation on the blocking pool, bounded by the timeout.
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&PassphraseFn) -> Result<T, StoreError> + Send + 'static,
    {
        let passphrase = Arc::clone(&self.passphrase);
        let task = tokio::task::spawn_blocking(move || op(&passphrase));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Backend {
                message: format!("file store task failed: {}", join_err),
            }),
            Err(_) => {
                tracing::warn!("File store call exceeded {:?}, giving up", self.timeout);
                Err(StoreError::Timeout {
                    after: self.timeout,
                })
            }
        }
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

fn derive_key(passphrase: &PassphraseFn, salt: &SaltString) -> Result<Aes256Gcm, StoreError> {
    let passphrase = passphrase()?;
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(
            passphrase.expose().as_bytes(),
            salt.as_str().as_bytes(),
            &mut key[..],
        )
        .map_err(|e| StoreError::Crypto {
            message: format!("key derivation failed: {}", e),
        })?;

    Aes256Gcm::new_from_slice(&key[..]).map_err(|e| StoreError::Crypto {
        message: format!("failed to create cipher: {}", e),
    })
}

fn seal(passphrase: &PassphraseFn, secret: &Secret) -> Result<Envelope, StoreError> {
    let salt = SaltString::generate(OsRng);
    let cipher = derive_key(passphrase, &salt)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret.expose().as_bytes())
        .map_err(|e| StoreError::Crypto {
            message: format!("encryption failed: {}", e),
        })?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        salt: salt.as_str().to_string(),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

fn open(passphrase: &PassphraseFn, envelope: &Envelope) -> Result<Secret, StoreError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(StoreError::Crypto {
            message: format!("unsupported envelope version {}", envelope.version),
        });
    }

    let salt = SaltString::from_b64(&envelope.salt).map_err(|e| StoreError::Crypto {
        message: format!("invalid salt: {}", e),
    })?;
    let nonce = decode(&envelope.nonce, "nonce")?;
    if nonce.len() != NONCE_LEN {
        return Err(StoreError::Crypto {
            message: "invalid nonce length".to_string(),
        });
    }
    let ciphertext = decode(&envelope.ciphertext, "ciphertext")?;

    let cipher = derive_key(passphrase, &salt)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| StoreError::Crypto {
                message: "decryption failed (wrong passphrase or corrupted file)".to_string(),
            })?,
    );

    let value = std::str::from_utf8(&plaintext).map_err(|_| StoreError::Crypto {
        message: "decrypted secret is not valid UTF-8".to_string(),
    })?;
    Ok(Secret::new(value))
}

fn decode(value: &str, field: &str) -> Result<Vec<u8>, StoreError> {
    BASE64.decode(value).map_err(|e| StoreError::Crypto {
        message: format!("invalid {} encoding: {}", field, e),
    })
}

fn not_found(profile: &str) -> StoreError {
    StoreError::NotFound {
        profile: profile.to_string(),
    }
}

/// Write `contents` to `path` through a temporary sibling with owner-only permissions.
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::Backend {
            message: format!("invalid store path {:?}", path),
        })?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("dir", &self.dir)
            .field("passphrase", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl SecretStore for EncryptedFileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, profile: &str) -> Result<Secret, StoreError> {
        let path = self.path_for(profile)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(profile)),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope = serde_json::from_slice(&raw)?;
        self.run(move |passphrase| open(passphrase, &envelope)).await
    }

    async fn set(&self, profile: &str, secret: &Secret) -> Result<(), StoreError> {
        let path = self.path_for(profile)?;
        let secret = secret.clone();
        let envelope = self.run(move |passphrase| seal(passphrase, &secret)).await?;
        self.ensure_dir().await?;
        write_private(&path, &serde_json::to_vec_pretty(&envelope)?).await?;
        tracing::info!("Stored API key in encrypted file store at {:?}", self.dir);
        Ok(())
    }

    async fn delete(&self, profile: &str) -> Result<(), StoreError> {
        let path = self.path_for(profile)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(profile)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = Self::file_prefix();
        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(profile) = name.strip_prefix(&prefix) {
                if validate_profile(profile).is_ok() {
                    profiles.push(profile.to_string());
                }
            }
        }
        profiles.sort();
        Ok(profiles)
    }

    async fn exists(&self, profile: &str) -> Result<bool, StoreError> {
        let path = self.path_for(profile)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn passphrase(value: &'static str) -> PassphraseFn {
        Arc::new(move || Ok(Secret::new(value)))
    }

    #[tokio::test]
    async fn test_file_store_set_get() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp.path(), passphrase("correct horse"));

        store.set("default", &Secret::new("fe-api-key")).await.unwrap();
        assert_eq!(store.get("default").await.unwrap().expose(), "fe-api-key");
    }

    #[tokio::test]
    async fn test_file_store_does_not_write_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp.path(), passphrase("correct horse"));

        store.set("default", &Secret::new("fe-api-key")).await.unwrap();
        let raw = std::fs::read_to_string(temp.path().join("forward-email.default")).unwrap();
        assert!(!raw.contains("fe-api-key"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("keyring");
        let store = EncryptedFileStore::new(&dir, passphrase("pw"));
        store.set("default", &Secret::new("k")).await.unwrap();

        let mode = std::fs::metadata(dir.join("forward-email.default"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_tightens_stale_temp_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let stale = temp.path().join(".forward-email.default.tmp");
        std::fs::write(&stale, "leftover").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = EncryptedFileStore::new(temp.path(), passphrase("pw"));
        store.set("default", &Secret::new("k")).await.unwrap();

        let mode = std::fs::metadata(temp.path().join("forward-email.default"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_file_store_wrong_passphrase() {
        let temp = TempDir::new().unwrap();
        EncryptedFileStore::new(temp.path(), passphrase("right"))
            .set("default", &Secret::new("k"))
            .await
            .unwrap();

        let wrong = EncryptedFileStore::new(temp.path(), passphrase("wrong"));
        let result = wrong.get("default").await;
        assert!(matches!(result, Err(StoreError::Crypto { .. })));
    }

    #[tokio::test]
    async fn test_file_store_missing_passphrase() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(
            temp.path(),
            Arc::new(|| {
                Err(StoreError::Passphrase {
                    message: "no passphrase".to_string(),
                })
            }),
        );

        let result = store.set("default", &Secret::new("k")).await;
        assert!(matches!(result, Err(StoreError::Passphrase { .. })));
    }

    #[tokio::test]
    async fn test_file_store_not_found_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp.path(), passphrase("pw"));

        assert!(store.get("default").await.unwrap_err().is_not_found());
        assert!(store.delete("default").await.unwrap_err().is_not_found());

        store.set("default", &Secret::new("k")).await.unwrap();
        store.delete("default").await.unwrap();
        assert!(!store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_list() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp.path().join("nested"), passphrase("pw"));

        assert!(store.list().await.unwrap().is_empty());

        store.set("work", &Secret::new("a")).await.unwrap();
        store.set("default", &Secret::new("b")).await.unwrap();
        std::fs::write(temp.path().join("nested").join("unrelated.txt"), "x").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["default", "work"]);
    }

    #[tokio::test]
    async fn test_file_store_slow_passphrase_times_out() {
        let temp = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(
            temp.path(),
            Arc::new(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(Secret::new("pw"))
            }),
        )
        .with_timeout(Duration::from_millis(50));

        let result = store.set("default", &Secret::new("k")).await;
        assert!(matches!(result, Err(StoreError::Timeout { .. })));
        assert!(!temp.path().join("forward-email.default").exists());
    }
}
