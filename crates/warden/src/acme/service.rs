//! The ACME service seam
//!
//! The orchestrator never speaks the ACME wire protocol itself. Everything it
//! needs from the CA goes through [`AcmeService`], addressed by the opaque
//! URLs the service hands out.

use async_trait::async_trait;

use super::error::AcmeError;

/// Challenge type served from a document root
pub const HTTP_01: &str = "http-01";

/// A freshly created order
#[derive(Debug, Clone)]
pub struct Order {
    /// Opaque order locator passed back to `finalize_order` and friends
    pub url: String,
    /// One authorization per requested identifier
    pub authorizations: Vec<AuthorizationRef>,
}

/// Pointer from an order to one of its authorizations
#[derive(Debug, Clone)]
pub struct AuthorizationRef {
    pub identifier: String,
    pub url: String,
}

/// Authorization state as reported by the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// Whether the CA will never change this status again
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// One challenge offered inside an authorization
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Challenge type, e.g. `http-01`
    pub kind: String,
    pub url: String,
    /// Raw token; validated by the caller before use
    pub token: String,
}

/// An authorization with its offered challenges
#[derive(Debug, Clone)]
pub struct Authorization {
    pub identifier: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The first `http-01` challenge, if any
    pub fn http_challenge(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind == HTTP_01)
    }
}

/// Result of account registration
#[derive(Debug, Clone)]
pub struct Registration {
    /// Account URL assigned by the CA
    pub account_url: String,
    /// Contact URIs registered with the account
    pub contact: Vec<String>,
    /// Account key as PKCS#8 PEM
    pub account_key_pem: String,
    /// Opaque credentials the service needs to resume the account later
    pub credentials: serde_json::Value,
}

/// Operations the orchestrator needs from a certificate authority
#[async_trait]
pub trait AcmeService: Send + Sync {
    /// Create a new account for `email` and return its key and credentials
    async fn register(&self, email: &str) -> Result<Registration, AcmeError>;

    /// Resume a previously registered account from its stored credentials
    async fn resume_account(&self, credentials: &serde_json::Value) -> Result<(), AcmeError>;

    /// Place an order for `domains`
    async fn new_order(&self, domains: &[String]) -> Result<Order, AcmeError>;

    /// Fetch an authorization
    async fn get_authorization(&self, url: &str) -> Result<Authorization, AcmeError>;

    /// Tell the CA a challenge is ready to be validated
    async fn finalize_challenge(&self, url: &str) -> Result<(), AcmeError>;

    /// Poll an authorization until it leaves `pending`
    async fn poll_for_authorization(&self, url: &str) -> Result<AuthorizationStatus, AcmeError>;

    /// Submit the DER-encoded CSR for an order
    async fn finalize_order(&self, url: &str, csr_der: &[u8]) -> Result<(), AcmeError>;

    /// Poll an order until it is valid; returns the certificate locator
    async fn poll_for_order_valid(&self, url: &str) -> Result<String, AcmeError>;

    /// Download the issued chain, leaf first, one PEM block per entry
    async fn download_certificates(&self, url: &str) -> Result<Vec<String>, AcmeError>;

    /// Revoke a PEM-encoded certificate
    async fn revoke_certificate(&self, pem: &str) -> Result<(), AcmeError>;
}

/// Split concatenated PEM certificates into one block per certificate
pub fn split_pem_chain(chain: &str) -> Vec<String> {
    const END: &str = "-----END CERTIFICATE-----";

    let mut blocks = Vec::new();
    let mut rest = chain;
    while let Some(end) = rest.find(END) {
        let (block, tail) = rest.split_at(end + END.len());
        let block = block.trim();
        if let Some(start) = block.find("-----BEGIN CERTIFICATE-----") {
            blocks.push(format!("{}\n", &block[start..]));
        }
        rest = tail;
    }
    blocks
}
