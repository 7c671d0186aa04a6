//! HTTP-01 challenge proofs under a document root
//!
//! A proof is a file at `{docroot}/.well-known/acme-challenge/{token}`
//! holding the key authorization. [`ChallengeStore::put`] returns a
//! [`ProvisionedProof`] guard; the proof is removed when the guard is
//! released, or on drop if it never was.

use std::io;
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Uid, User};
use thiserror::Error;
use tracing::{debug, trace, warn};

use warden_common::ChallengeToken;

use super::{create_dirs, set_mode, PUBLIC_FILE_MODE};

/// HTTP-01 challenge directory relative to a document root
pub const ACME_CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Challenge store errors
#[derive(Debug, Error)]
pub enum ChallengeStoreError {
    #[error("Document root {} does not exist", .0.display())]
    DocumentRootMissing(PathBuf),

    #[error("Unknown user '{0}'")]
    UnknownUser(String),

    #[error("Failed to change owner of {} to {user}: {reason}", .path.display())]
    Ownership {
        path: PathBuf,
        user: String,
        reason: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes and removes challenge proofs for one document root
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    doc_root: PathBuf,
}

impl ChallengeStore {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self {
            doc_root: doc_root.into(),
        }
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    fn challenge_dir(&self) -> PathBuf {
        self.doc_root.join(ACME_CHALLENGE_DIR)
    }

    /// Path of the proof file for `token`
    pub fn proof_path(&self, token: &ChallengeToken) -> PathBuf {
        self.challenge_dir().join(token.as_str())
    }

    /// Write the proof for `token`, optionally handing it to `user`
    pub async fn put(
        &self,
        token: &ChallengeToken,
        payload: &str,
        user: Option<&str>,
    ) -> Result<ProvisionedProof, ChallengeStoreError> {
        if !tokio::fs::metadata(&self.doc_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ChallengeStoreError::DocumentRootMissing(self.doc_root.clone()));
        }

        let uid = user.map(resolve_uid).transpose()?;

        let well_known = self.doc_root.join(".well-known");
        let challenge_dir = self.challenge_dir();
        create_dirs(&challenge_dir)
            .await
            .map_err(|source| ChallengeStoreError::Io {
                path: challenge_dir.clone(),
                source,
            })?;

        let path = self.proof_path(token);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| ChallengeStoreError::Io {
                path: path.clone(),
                source,
            })?;

        // From here on the guard owns the file
        let proof = ProvisionedProof {
            path,
            released: false,
        };

        set_mode(&proof.path, PUBLIC_FILE_MODE)
            .await
            .map_err(|source| ChallengeStoreError::Io {
                path: proof.path.clone(),
                source,
            })?;

        if let (Some(uid), Some(user)) = (uid, user) {
            for target in [&well_known, &challenge_dir, &proof.path] {
                chown(target.as_path(), Some(uid), None).map_err(|e| {
                    ChallengeStoreError::Ownership {
                        path: target.clone(),
                        user: user.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }
            trace!(user = %user, "Handed challenge proof to user");
        }

        debug!(path = %proof.path.display(), "Provisioned challenge proof");
        Ok(proof)
    }

    /// Remove the proof for `token`; absent proofs are not an error
    pub async fn delete(&self, token: &ChallengeToken) -> Result<(), ChallengeStoreError> {
        remove_proof(&self.proof_path(token)).await
    }
}

fn resolve_uid(user: &str) -> Result<Uid, ChallengeStoreError> {
    match User::from_name(user) {
        Ok(Some(user)) => Ok(user.uid),
        _ => Err(ChallengeStoreError::UnknownUser(user.to_string())),
    }
}

async fn remove_proof(path: &Path) -> Result<(), ChallengeStoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed challenge proof");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ChallengeStoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A proof file that exists until released
#[must_use = "the proof is removed when the guard is dropped"]
#[derive(Debug)]
pub struct ProvisionedProof {
    path: PathBuf,
    released: bool,
}

impl ProvisionedProof {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the proof file
    pub async fn release(mut self) -> Result<(), ChallengeStoreError> {
        self.released = true;
        remove_proof(&self.path).await
    }
}

impl Drop for ProvisionedProof {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed abandoned challenge proof"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove abandoned challenge proof"
            ),
        }
    }
}
