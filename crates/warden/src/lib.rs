//! Warden Library
//!
//! Batch ACME certificate issuance and renewal for many domains at once.
//!
//! - **Issuance**: DNS preflight, concurrent HTTP-01 authorization with
//!   self-verification, CSR, finalization and storage
//! - **Renewal**: a supervisor checking and renewing every configured
//!   certificate, in child processes or in-process
//! - **Stores**: account keys, domain keys, challenge proofs and certificate
//!   chains on disk
//!
//! # Example
//!
//! ```ignore
//! use warden::{CertificateRequest, Services};
//!
//! let services = Services::system("letsencrypt:staging", "/etc/warden")?;
//! let request = CertificateRequest::new(domains, doc_roots, None, 2048, false)?;
//! let issued = services.orchestrator(10).issue(&request).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod commands;
pub mod dns;
pub mod issuance;
pub mod renewal;
pub mod services;
pub mod stores;

#[cfg(test)]
mod testing;

// ============================================================================
// Public API Re-exports
// ============================================================================

// ACME access
pub use acme::{AcmeError, AcmeService, InstantAcmeService};

// DNS preflight
pub use dns::{DnsError, DnsPreflight, HickoryResolver, Resolve};

// Issuance
pub use issuance::{
    CertificateRequest, HttpProofVerifier, IssuanceError, IssuanceOrchestrator,
    IssuedCertificate, ProofVerifier,
};

// Renewal
pub use renewal::{
    AutoRenewalSupervisor, InProcessRunner, ProcessRunner, RenewalOutcome, RenewalReport,
    RenewalRunner,
};

// Commands
pub use commands::CommandError;
pub use services::Services;

// Storage
pub use stores::{
    CertificateStore, ChallengeStore, KeyStore, PrivateKey, StorageLayout, StoredCertificate,
};

// Shared building blocks
pub use warden_common::{BatchOutcome, BoundedConcurrentMap, ChallengeToken, DnsName};
