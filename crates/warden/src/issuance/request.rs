//! Certificate requests

use std::path::PathBuf;

use warden_common::DnsName;
use warden_config::{assign_doc_roots, CertificateEntry, ConfigError, DEFAULT_KEY_BITS};

/// Everything needed to obtain one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Domains in order; the first becomes the common name
    pub domains: Vec<DnsName>,
    /// One document root per domain
    pub doc_roots: Vec<PathBuf>,
    /// Owner of served proof files
    pub user: Option<String>,
    /// RSA key size for the domain key
    pub bits: u32,
    /// Generate a new domain key even if one exists
    pub rekey: bool,
}

impl CertificateRequest {
    /// Build a request, padding `doc_roots` with its last entry
    pub fn new(
        domains: Vec<DnsName>,
        doc_roots: Vec<PathBuf>,
        user: Option<String>,
        bits: u32,
        rekey: bool,
    ) -> Result<Self, ConfigError> {
        let doc_roots = assign_doc_roots(domains.len(), doc_roots)?;
        Ok(Self {
            domains,
            doc_roots,
            user,
            bits,
            rekey,
        })
    }

    /// Build a request from an auto-renewal entry
    pub fn from_entry(entry: &CertificateEntry) -> Result<Self, ConfigError> {
        Self::new(
            entry.domains.clone(),
            entry.doc_roots.clone(),
            entry.user.clone(),
            entry.bits.unwrap_or(DEFAULT_KEY_BITS),
            entry.rekey,
        )
    }

    pub fn common_name(&self) -> &DnsName {
        // `assign_doc_roots` rejects an empty domain list
        &self.domains[0]
    }

    /// Domains as plain strings, in order
    pub fn domain_strings(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.to_string()).collect()
    }
}
