//! ACME error types

use thiserror::Error;

/// Errors from the ACME service
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Account creation or login failed
    #[error("Failed to set up ACME account: {0}")]
    Account(String),

    /// The account key cannot sign ACME requests
    #[error("Unsupported account key: {0}")]
    UnsupportedAccountKey(String),

    /// No account has been loaded into the service
    #[error("No ACME account loaded; run setup first")]
    NoAccount,

    /// Order creation failed
    #[error("Failed to create order: {0}")]
    OrderCreation(String),

    /// An order, authorization or challenge URL is not known to this service
    #[error("Unknown ACME resource: {0}")]
    UnknownResource(String),

    /// Authorization lookup or state change failed
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Challenge submission failed
    #[error("Challenge validation failed: {0}")]
    ChallengeValidation(String),

    /// Order finalization failed
    #[error("Failed to finalize order: {0}")]
    Finalization(String),

    /// Certificate download failed
    #[error("Failed to download certificate: {0}")]
    CertificateDownload(String),

    /// Revocation failed
    #[error("Failed to revoke certificate: {0}")]
    Revocation(String),

    /// The CA returned something the protocol does not allow
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Polling gave up
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Underlying protocol client error
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),
}
