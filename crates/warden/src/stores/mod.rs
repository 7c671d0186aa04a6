//! File-based stores for keys, challenge proofs and certificates
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! ├── accounts/
//! │   ├── {server-id}.pem        # Account key (0600)
//! │   └── {server-id}.json       # Registration record (0600)
//! └── certs/
//!     └── {server-id}/
//!         └── example.com/
//!             ├── cert.pem       # Leaf certificate
//!             ├── chain.pem      # Intermediates
//!             ├── fullchain.pem  # Leaf + intermediates
//!             └── key.pem        # Domain key (0600)
//! ```
//!
//! Key and certificate files are written to a hidden temporary sibling and
//! renamed into place.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::trace;

use warden_common::DnsName;

mod account;
mod certificate;
mod challenge;
mod key;

pub use account::{AccountRecord, AccountStore, AccountStoreError};
pub use certificate::{CertificateStore, CertificateStoreError, StoredCertificate};
pub use challenge::{ChallengeStore, ChallengeStoreError, ProvisionedProof, ACME_CHALLENGE_DIR};
pub use key::{KeyStore, KeyStoreError, PrivateKey};

/// Mode for private keys and account records
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Mode for certificates and challenge proofs
pub const PUBLIC_FILE_MODE: u32 = 0o644;

/// Mode for directories created by the stores
pub const DIR_MODE: u32 = 0o755;

/// Paths of everything stored for one ACME server
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    server_id: String,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, server_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            server_id: server_id.into(),
        }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Account key, relative to the root
    pub fn account_key(&self) -> PathBuf {
        PathBuf::from("accounts").join(format!("{}.pem", self.server_id))
    }

    /// Registration record, relative to the root
    pub fn account_record(&self) -> PathBuf {
        PathBuf::from("accounts").join(format!("{}.json", self.server_id))
    }

    /// Directory holding one subdirectory per certificate
    pub fn certificates_dir(&self) -> PathBuf {
        self.root.join("certs").join(&self.server_id)
    }

    /// Domain key of a certificate, relative to the root
    pub fn domain_key(&self, common_name: &DnsName) -> PathBuf {
        PathBuf::from("certs")
            .join(&self.server_id)
            .join(common_name.as_str())
            .join("key.pem")
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(&self.root)
    }

    pub fn account_store(&self) -> AccountStore {
        AccountStore::new(self.key_store(), self.account_key(), self.root.join(self.account_record()))
    }

    pub fn certificate_store(&self) -> CertificateStore {
        CertificateStore::new(self.certificates_dir())
    }
}

/// Create a directory and its parents with [`DIR_MODE`]
///
/// Only directories created by this call get their mode set; existing ones
/// are left alone.
pub(crate) async fn create_dirs(path: &Path) -> io::Result<()> {
    let mut missing = Vec::new();
    for dir in path.ancestors() {
        if dir.as_os_str().is_empty() || tokio::fs::try_exists(dir).await? {
            break;
        }
        missing.push(dir);
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(DIR_MODE);
    builder.create(path).await?;

    // Creation mode is filtered by the umask
    for dir in missing.iter().rev() {
        set_mode(dir, DIR_MODE).await?;
    }
    Ok(())
}

/// Write `contents` to `path` via a temporary sibling and a rename
pub(crate) async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp_path)
            .await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        // Creation mode is filtered by the umask
        set_mode(&tmp_path, mode).await?;
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    } else {
        trace!(path = %path.display(), mode = %format!("{:o}", mode), "Wrote file");
    }

    result
}

pub(crate) async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(test)]
pub(crate) fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}
