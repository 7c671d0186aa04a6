//! ACME account key and registration record

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::key::{KeyStore, KeyStoreError, PrivateKey};
use super::{create_dirs, write_atomic, PRIVATE_FILE_MODE};
use crate::acme::Registration;

/// Account store errors
#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("No ACME account found at {}, run setup first", .path.display())]
    NotRegistered { path: PathBuf },

    #[error(transparent)]
    Key(#[from] KeyStoreError),

    #[error("Account record {} is corrupt: {reason}", .path.display())]
    Record { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Registration metadata stored next to the account key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Contact email used at registration
    pub email: String,
    /// Account URL assigned by the CA
    pub account_url: String,
    /// When the account was registered
    pub created: DateTime<Utc>,
    /// Credentials the ACME service resumes the account from
    pub credentials: serde_json::Value,
}

/// Account key plus registration record for one ACME server
#[derive(Debug, Clone)]
pub struct AccountStore {
    keys: KeyStore,
    /// Key path relative to the key store root
    key_path: PathBuf,
    record_path: PathBuf,
}

impl AccountStore {
    pub fn new(keys: KeyStore, key_path: PathBuf, record_path: PathBuf) -> Self {
        Self {
            keys,
            key_path,
            record_path,
        }
    }

    /// Load the account key and registration record
    pub async fn load(&self) -> Result<(PrivateKey, AccountRecord), AccountStoreError> {
        let key = match self.keys.get(&self.key_path).await {
            Ok(key) => key,
            Err(KeyStoreError::KeyNotFound { path }) => {
                return Err(AccountStoreError::NotRegistered { path })
            }
            Err(e) => return Err(e.into()),
        };

        let content = match tokio::fs::read_to_string(&self.record_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AccountStoreError::NotRegistered {
                    path: self.record_path.clone(),
                })
            }
            Err(source) => {
                return Err(AccountStoreError::Io {
                    path: self.record_path.clone(),
                    source,
                })
            }
        };

        let record: AccountRecord =
            serde_json::from_str(&content).map_err(|e| AccountStoreError::Record {
                path: self.record_path.clone(),
                reason: e.to_string(),
            })?;

        debug!(account = %record.account_url, "Loaded ACME account");
        Ok((key, record))
    }

    /// Whether a usable account is stored
    pub async fn is_registered(&self) -> bool {
        self.load().await.is_ok()
    }

    /// Persist a fresh registration
    pub async fn save(
        &self,
        email: &str,
        registration: &Registration,
    ) -> Result<AccountRecord, AccountStoreError> {
        let key = PrivateKey::from_pem(registration.account_key_pem.clone()).map_err(|reason| {
            KeyStoreError::KeyInvalid {
                path: self.key_path.clone(),
                reason,
            }
        })?;
        self.keys.put(&self.key_path, key).await?;

        let record = AccountRecord {
            email: email.to_string(),
            account_url: registration.account_url.clone(),
            created: Utc::now(),
            credentials: registration.credentials.clone(),
        };
        let content =
            serde_json::to_string_pretty(&record).map_err(|e| AccountStoreError::Record {
                path: self.record_path.clone(),
                reason: e.to_string(),
            })?;

        let io_err = |source| AccountStoreError::Io {
            path: self.record_path.clone(),
            source,
        };
        if let Some(parent) = self.record_path.parent() {
            create_dirs(parent).await.map_err(io_err)?;
        }
        write_atomic(&self.record_path, content.as_bytes(), PRIVATE_FILE_MODE)
            .await
            .map_err(io_err)?;

        info!(account = %record.account_url, email = %email, "Saved ACME account");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{mode_of, StorageLayout};
    use tempfile::TempDir;

    fn registration() -> Registration {
        Registration {
            account_url: "https://ca.example/acct/7".to_string(),
            contact: vec!["mailto:admin@example.com".to_string()],
            account_key_pem: rcgen::KeyPair::generate().unwrap().serialize_pem(),
            credentials: serde_json::json!({"id": "https://ca.example/acct/7"}),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path(), "ca.example.directory");
        let store = layout.account_store();

        assert!(!store.is_registered().await);

        let registration = registration();
        store.save("admin@example.com", &registration).await.unwrap();

        let (key, record) = store.load().await.unwrap();
        assert_eq!(key.as_pem(), registration.account_key_pem);
        assert_eq!(record.account_url, "https://ca.example/acct/7");
        assert_eq!(record.email, "admin@example.com");
        assert_eq!(
            mode_of(&dir.path().join("accounts/ca.example.directory.json")),
            0o600
        );
        assert_eq!(
            mode_of(&dir.path().join("accounts/ca.example.directory.pem")),
            0o600
        );
    }

    #[tokio::test]
    async fn test_missing_account_is_not_registered() {
        let dir = TempDir::new().unwrap();
        let store = StorageLayout::new(dir.path(), "ca").account_store();
        assert!(matches!(
            store.load().await,
            Err(AccountStoreError::NotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_is_surfaced() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("accounts")).unwrap();
        std::fs::write(dir.path().join("accounts/ca.pem"), "not a key").unwrap();

        let store = StorageLayout::new(dir.path(), "ca").account_store();
        assert!(matches!(
            store.load().await,
            Err(AccountStoreError::Key(KeyStoreError::KeyInvalid { .. }))
        ));
    }
}
