//! Private key storage

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use rcgen::KeyPair;
use thiserror::Error;
use tracing::{debug, info};

use super::{create_dirs, write_atomic, PRIVATE_FILE_MODE};

/// Key store errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key not found: {}", .path.display())]
    KeyNotFound { path: PathBuf },

    #[error("Key at {} is invalid: {reason}", .path.display())]
    KeyInvalid { path: PathBuf, reason: String },

    #[error("Refusing key path outside the storage root: {}", .path.display())]
    UnsafePath { path: PathBuf },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A PEM-encoded private key that parsed successfully
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Validate a PEM-encoded key
    pub fn from_pem(pem: impl Into<String>) -> Result<Self, String> {
        let pem = pem.into();
        KeyPair::from_pem(&pem).map_err(|e| e.to_string())?;
        Ok(Self(pem))
    }

    pub fn as_pem(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Loads and persists private keys below a storage root
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, KeyStoreError> {
        let safe = !path.as_os_str().is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(KeyStoreError::UnsafePath {
                path: path.to_path_buf(),
            });
        }
        Ok(self.root.join(path))
    }

    /// Load a key; absent and unparsable keys are distinct errors
    pub async fn get(&self, path: &Path) -> Result<PrivateKey, KeyStoreError> {
        let full = self.resolve(path)?;

        let pem = match tokio::fs::read_to_string(&full).await {
            Ok(pem) => pem,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KeyStoreError::KeyNotFound { path: full })
            }
            Err(source) => return Err(KeyStoreError::Io { path: full, source }),
        };

        let key = PrivateKey::from_pem(pem)
            .map_err(|reason| KeyStoreError::KeyInvalid {
                path: full.clone(),
                reason,
            })?;

        debug!(path = %full.display(), "Loaded private key");
        Ok(key)
    }

    /// Persist a key with mode 0600, creating parent directories
    pub async fn put(&self, path: &Path, key: PrivateKey) -> Result<PrivateKey, KeyStoreError> {
        let full = self.resolve(path)?;
        let io_err = |source| KeyStoreError::Io {
            path: full.clone(),
            source,
        };

        if let Some(parent) = full.parent() {
            create_dirs(parent).await.map_err(io_err)?;
        }
        write_atomic(&full, key.as_pem().as_bytes(), PRIVATE_FILE_MODE)
            .await
            .map_err(io_err)?;

        info!(path = %full.display(), "Saved private key");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::mode_of;
    use tempfile::TempDir;

    fn fixture_key() -> PrivateKey {
        PrivateKey::from_pem(KeyPair::generate().unwrap().serialize_pem()).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_preserves_pem() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        let key = fixture_key();
        let path = Path::new("certs/server/example.com/key.pem");

        let returned = store.put(path, key.clone()).await.unwrap();
        assert_eq!(returned, key);

        let loaded = store.get(path).await.unwrap();
        assert_eq!(loaded.as_pem(), key.as_pem());
        assert_eq!(mode_of(&dir.path().join(path)), 0o600);
    }

    #[tokio::test]
    async fn test_get_distinguishes_missing_from_invalid() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());

        assert!(matches!(
            store.get(Path::new("accounts/none.pem")).await,
            Err(KeyStoreError::KeyNotFound { .. })
        ));

        std::fs::create_dir_all(dir.path().join("accounts")).unwrap();
        std::fs::write(dir.path().join("accounts/bad.pem"), "garbage").unwrap();
        assert!(matches!(
            store.get(Path::new("accounts/bad.pem")).await,
            Err(KeyStoreError::KeyInvalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());

        for path in ["/etc/passwd", "../outside.pem", "certs/../../x.pem", ""] {
            assert!(
                matches!(
                    store.get(Path::new(path)).await,
                    Err(KeyStoreError::UnsafePath { .. })
                ),
                "{path} accepted"
            );
        }
        assert!(matches!(
            store.put(Path::new("../x.pem"), fixture_key()).await,
            Err(KeyStoreError::UnsafePath { .. })
        ));
    }

    #[test]
    fn test_debug_hides_key_material() {
        assert_eq!(format!("{:?}", fixture_key()), "PrivateKey(..)");
    }
}
