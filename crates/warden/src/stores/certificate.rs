//! Certificate bundle storage keyed by common name

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use warden_common::DnsName;

use super::{create_dirs, write_atomic, PUBLIC_FILE_MODE};

/// Certificate store errors
#[derive(Debug, Error)]
pub enum CertificateStoreError {
    #[error("Refusing to store an empty certificate bundle")]
    EmptyBundle,

    #[error("Certificate has no subject common name")]
    MissingCommonName,

    #[error("Common name '{name}' can't be used as a directory name: {reason}")]
    InvalidCommonName { name: String, reason: String },

    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    #[error("No certificate stored for {name}")]
    NotFound { name: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What `status` and `check` need to know about a stored certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub common_name: String,
    /// DNS names from the subject alternative name extension
    pub names: Vec<String>,
    pub not_after: DateTime<Utc>,
}

impl StoredCertificate {
    /// Parse the first certificate of a PEM document
    pub fn from_pem(pem: &str) -> Result<Self, CertificateStoreError> {
        let (_, pem) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| CertificateStoreError::Parse(e.to_string()))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| CertificateStoreError::Parse(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
            .ok_or(CertificateStoreError::MissingCommonName)?;

        let names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertificateStoreError::Parse(e.to_string())),
        };

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| CertificateStoreError::Parse("expiry out of range".to_string()))?;

        Ok(Self {
            common_name,
            names,
            not_after,
        })
    }

    /// Whether every name in `names` is covered
    pub fn covers<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|name| {
            let name = name.to_ascii_lowercase();
            self.names.contains(&name) || self.common_name.eq_ignore_ascii_case(&name)
        })
    }
}

/// Stores issued chains under `{root}/{common name}/`
#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn directory(&self, name: &str) -> Result<PathBuf, CertificateStoreError> {
        Ok(self.root.join(validate_common_name(name)?.as_str()))
    }

    /// Persist a chain, leaf first; returns the leaf's common name
    pub async fn put(&self, bundle: &[String]) -> Result<DnsName, CertificateStoreError> {
        let (leaf, chain) = bundle
            .split_first()
            .ok_or(CertificateStoreError::EmptyBundle)?;

        let common_name = validate_common_name(&StoredCertificate::from_pem(leaf)?.common_name)?;
        let dir = self.root.join(common_name.as_str());

        create_dirs(&dir).await.map_err(|source| CertificateStoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let leaf = pem_block(leaf);
        let chain: String = chain.iter().map(|c| pem_block(c)).collect();
        let fullchain = format!("{}{}", leaf, chain);

        for (file, contents) in [
            ("cert.pem", &leaf),
            ("fullchain.pem", &fullchain),
            ("chain.pem", &chain),
        ] {
            let path = dir.join(file);
            write_atomic(&path, contents.as_bytes(), PUBLIC_FILE_MODE)
                .await
                .map_err(|source| CertificateStoreError::Io { path, source })?;
        }

        info!(
            common_name = %common_name,
            chain_length = bundle.len(),
            path = %dir.display(),
            "Saved certificate"
        );
        Ok(common_name)
    }

    /// Load the leaf certificate PEM for `name`
    pub async fn get(&self, name: &str) -> Result<String, CertificateStoreError> {
        let path = self.directory(name)?.join("cert.pem");
        match tokio::fs::read_to_string(&path).await {
            Ok(pem) => {
                trace!(name = %name, "Loaded certificate");
                Ok(pem)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CertificateStoreError::NotFound {
                name: name.to_string(),
            }),
            Err(source) => Err(CertificateStoreError::Io { path, source }),
        }
    }

    /// Load and parse the leaf certificate for `name`
    pub async fn inspect(&self, name: &str) -> Result<StoredCertificate, CertificateStoreError> {
        let pem = self.get(name).await?;
        StoredCertificate::from_pem(&pem)
    }

    /// Remove everything stored for `name`
    pub async fn delete(&self, name: &str) -> Result<(), CertificateStoreError> {
        let dir = self.directory(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(name = %name, "Deleted stored certificate");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(name = %name, "Certificate to delete not found");
                Ok(())
            }
            Err(source) => Err(CertificateStoreError::Io { path: dir, source }),
        }
    }

    /// Common names with a stored certificate, sorted
    pub async fn list(&self) -> Result<Vec<DnsName>, CertificateStoreError> {
        let io_err = |source| CertificateStoreError::Io {
            path: self.root.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match DnsName::parse(name) {
                Ok(name) if entry.path().join("cert.pem").is_file() => names.push(name),
                Ok(_) => {}
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping foreign directory"),
            }
        }

        names.sort();
        Ok(names)
    }
}

fn validate_common_name(name: &str) -> Result<DnsName, CertificateStoreError> {
    DnsName::parse(name.to_ascii_lowercase()).map_err(|e| CertificateStoreError::InvalidCommonName {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn pem_block(pem: &str) -> String {
    format!("{}\n", pem.trim())
}
