//! Self-verification of provisioned proofs
//!
//! Before asking the CA to validate, the proof is fetched over plain HTTP the
//! same way the CA will. A mismatch here fails the domain early instead of
//! burning a failed validation at the CA.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use warden_common::{ChallengeToken, DnsName};

/// Self-verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} served unexpected content: {found:?}")]
    Mismatch { url: String, found: String },
}

/// Checks that a proof is publicly reachable
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(
        &self,
        domain: &DnsName,
        token: &ChallengeToken,
        expected: &str,
    ) -> Result<(), VerifyError>;
}

/// Fetches proofs over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpProofVerifier {
    client: reqwest::Client,
    /// Replaces `http://{domain}` when set
    base_url: Option<String>,
}

impl HttpProofVerifier {
    /// Longest body compared against the payload
    const MAX_SHOWN: usize = 200;

    pub fn new(timeout: Duration) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VerifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Send every request to `base_url` instead of the domain itself
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn url_for(&self, domain: &DnsName, token: &ChallengeToken) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", domain));
        format!("{}/.well-known/acme-challenge/{}", base, token)
    }
}

#[async_trait]
impl ProofVerifier for HttpProofVerifier {
    async fn verify(
        &self,
        domain: &DnsName,
        token: &ChallengeToken,
        expected: &str,
    ) -> Result<(), VerifyError> {
        let url = self.url_for(domain, token);
        let request_err = |e: reqwest::Error| VerifyError::Request {
            url: url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(request_err)?;
        if body.trim() != expected {
            let found: String = body.chars().take(Self::MAX_SHOWN).collect();
            return Err(VerifyError::Mismatch { url, found });
        }

        debug!(domain = %domain, url = %url, "Challenge proof is reachable");
        Ok(())
    }
}
