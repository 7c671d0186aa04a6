//! Certificate issuance
//!
//! [`IssuanceOrchestrator::issue`] drives one certificate from DNS preflight
//! to stored chain:
//!
//! ```text
//! preflight -> account -> order -> authorize (per domain, bounded) -> CSR
//!     -> finalize -> download -> persist key + chain
//! ```
//!
//! Domains are authorized concurrently. Every domain runs to completion even
//! when a sibling fails; the order is only finalized once all of them are
//! authorized, and every proof file is removed again whatever the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use warden_common::{BoundedConcurrentMap, ChallengeToken, DnsName, NameError};

use crate::acme::{
    jwk_thumbprint, key_authorization, AcmeError, AcmeService, AuthorizationStatus, Challenge,
};
use crate::dns::{format_failures, DnsError, DnsPreflight, Resolve};
use crate::stores::{
    AccountStoreError, CertificateStoreError, ChallengeStore, ChallengeStoreError,
    KeyStoreError, PrivateKey, StorageLayout, StoredCertificate,
};

mod keys;
mod request;
mod task;
mod verify;

pub use keys::{build_csr, generate_rsa_key, KeyError};
pub use request::CertificateRequest;
pub use task::{AuthorizationTask, TaskState};
pub use verify::{HttpProofVerifier, ProofVerifier, VerifyError};

/// Upper bound on concurrently authorized domains
pub const MAX_AUTHORIZATION_CONCURRENCY: usize = 20;

/// Why a single domain could not be authorized
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("CA offered no http-01 challenge")]
    NoSolvableChallenge,

    #[error("Protocol violation: unusable challenge token: {0}")]
    ProtocolViolation(NameError),

    #[error(transparent)]
    Store(#[from] ChallengeStoreError),

    #[error("Self-verification failed: {0}")]
    SelfVerify(#[from] VerifyError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error("Authorization ended as {status}")]
    Invalid { status: AuthorizationStatus },
}

/// Issuance errors
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Account(#[from] AccountStoreError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error("Authorization failed:\n{}", format_failures(.failures))]
    Authorization { failures: Vec<(String, String)> },

    #[error("Domain key is unusable (rekey to replace it): {0}")]
    DomainKey(KeyStoreError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] CertificateStoreError),

    #[error("CA returned an empty certificate chain")]
    EmptyChain,
}

/// A freshly stored certificate
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub common_name: DnsName,
    pub names: Vec<String>,
    pub not_after: DateTime<Utc>,
    /// Whether a new domain key was generated
    pub key_regenerated: bool,
}

/// Obtains certificates from an ACME CA
pub struct IssuanceOrchestrator {
    acme: Arc<dyn AcmeService>,
    preflight: DnsPreflight,
    verifier: Arc<dyn ProofVerifier>,
    layout: StorageLayout,
    batch: BoundedConcurrentMap,
}

impl IssuanceOrchestrator {
    pub fn new(
        acme: Arc<dyn AcmeService>,
        resolver: Arc<dyn Resolve>,
        verifier: Arc<dyn ProofVerifier>,
        layout: StorageLayout,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.clamp(1, MAX_AUTHORIZATION_CONCURRENCY);
        Self {
            acme,
            preflight: DnsPreflight::new(resolver, concurrency),
            verifier,
            layout,
            batch: BoundedConcurrentMap::new(concurrency),
        }
    }

    /// Obtain and store a certificate for `request`
    pub async fn issue(
        &self,
        request: &CertificateRequest,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let common_name = request.common_name().clone();
        info!(
            common_name = %common_name,
            domains = request.domains.len(),
            "Issuing certificate"
        );

        self.preflight.check(&request.domains).await?;

        let (account_key, record) = self.layout.account_store().load().await?;
        self.acme.resume_account(&record.credentials).await?;
        let thumbprint = jwk_thumbprint(account_key.as_pem())?;

        let existing_key = self.existing_domain_key(request).await?;

        let order = self.acme.new_order(&request.domain_strings()).await?;
        let mut tasks = Vec::with_capacity(order.authorizations.len());
        for authorization in &order.authorizations {
            let index = request
                .domains
                .iter()
                .position(|d| d.as_str().eq_ignore_ascii_case(&authorization.identifier))
                .ok_or_else(|| {
                    AcmeError::ProtocolViolation(format!(
                        "order contains unrequested identifier {}",
                        authorization.identifier
                    ))
                })?;
            let task = AuthorizationTask::new(
                request.domains[index].clone(),
                request.doc_roots[index].clone(),
            );
            tasks.push((authorization.url.clone(), task));
        }

        let thumbprint = thumbprint.as_str();
        let user = request.user.as_deref();
        let outcome = self
            .batch
            .run(tasks, |_, (url, task)| async move {
                self.authorize(&url, task, thumbprint, user).await
            })
            .await;

        let (_, errors) = outcome.into_parts();
        if !errors.is_empty() {
            let failures: Vec<(String, String)> = errors
                .into_values()
                .map(|(domain, error)| (domain.to_string(), error.to_string()))
                .collect();
            warn!(
                common_name = %common_name,
                failed = failures.len(),
                "Not finalizing order with failed authorizations"
            );
            return Err(IssuanceError::Authorization { failures });
        }

        let key_regenerated = existing_key.is_none();
        let domain_key = match existing_key {
            Some(key) => key,
            None => generate_rsa_key(request.bits).await?,
        };

        let csr = build_csr(&request.domains, &domain_key)?;
        self.acme.finalize_order(&order.url, &csr).await?;
        let certificate_url = self.acme.poll_for_order_valid(&order.url).await?;
        let chain = self.acme.download_certificates(&certificate_url).await?;
        let leaf = chain.first().ok_or(IssuanceError::EmptyChain)?;
        let parsed = StoredCertificate::from_pem(leaf)?;

        if key_regenerated {
            self.layout
                .key_store()
                .put(&self.layout.domain_key(&common_name), domain_key)
                .await
                .map_err(IssuanceError::DomainKey)?;
        }
        let stored_as = self.layout.certificate_store().put(&chain).await?;

        info!(
            common_name = %stored_as,
            not_after = %parsed.not_after,
            key_regenerated = key_regenerated,
            "Certificate issued"
        );

        Ok(IssuedCertificate {
            common_name: stored_as,
            names: parsed.names,
            not_after: parsed.not_after,
            key_regenerated,
        })
    }

    /// The stored domain key to reuse, or `None` if a new one is needed
    async fn existing_domain_key(
        &self,
        request: &CertificateRequest,
    ) -> Result<Option<PrivateKey>, IssuanceError> {
        let path = self.layout.domain_key(request.common_name());
        match self.layout.key_store().get(&path).await {
            Ok(_) if request.rekey => {
                debug!(path = %path.display(), "Replacing domain key");
                Ok(None)
            }
            Ok(key) => Ok(Some(key)),
            Err(KeyStoreError::KeyNotFound { .. }) => Ok(None),
            Err(KeyStoreError::KeyInvalid { path, reason }) if request.rekey => {
                warn!(path = %path.display(), reason = %reason, "Replacing invalid domain key");
                Ok(None)
            }
            Err(e) => Err(IssuanceError::DomainKey(e)),
        }
    }

    /// Authorize one domain; the error carries the domain
    async fn authorize(
        &self,
        url: &str,
        mut task: AuthorizationTask,
        thumbprint: &str,
        user: Option<&str>,
    ) -> Result<AuthorizationTask, (DnsName, ChallengeError)> {
        match self.walk(url, &mut task, thumbprint, user).await {
            Ok(()) => Ok(task),
            Err(error) => {
                task.fail();
                warn!(domain = %task.domain, error = %error, "Authorization failed");
                Err((task.domain, error))
            }
        }
    }

    async fn walk(
        &self,
        url: &str,
        task: &mut AuthorizationTask,
        thumbprint: &str,
        user: Option<&str>,
    ) -> Result<(), ChallengeError> {
        let authorization = self.acme.get_authorization(url).await?;
        match authorization.status {
            AuthorizationStatus::Valid => {
                debug!(domain = %task.domain, "Authorization already valid");
                task.advance(TaskState::Authorized);
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => return Err(ChallengeError::Invalid { status }),
        }

        let challenge = authorization
            .http_challenge()
            .cloned()
            .ok_or(ChallengeError::NoSolvableChallenge)?;
        let token = ChallengeToken::parse(challenge.token.as_str())
            .map_err(ChallengeError::ProtocolViolation)?;
        let payload = key_authorization(&token, thumbprint);
        task.token = Some(token.to_string());
        task.payload = Some(payload.clone());

        let store = ChallengeStore::new(&task.doc_root);
        let proof = store.put(&token, &payload, user).await?;
        task.advance(TaskState::ProofProvisioned);

        let result = self
            .validate(url, &challenge, &token, &payload, task)
            .await;

        if let Err(e) = proof.release().await {
            warn!(domain = %task.domain, error = %e, "Failed to remove challenge proof");
        }
        result
    }

    async fn validate(
        &self,
        url: &str,
        challenge: &Challenge,
        token: &ChallengeToken,
        payload: &str,
        task: &mut AuthorizationTask,
    ) -> Result<(), ChallengeError> {
        self.verifier.verify(&task.domain, token, payload).await?;
        task.advance(TaskState::SelfVerified);

        self.acme.finalize_challenge(&challenge.url).await?;
        task.advance(TaskState::Submitted);

        match self.acme.poll_for_authorization(url).await? {
            AuthorizationStatus::Valid => {
                task.advance(TaskState::Authorized);
                info!(domain = %task.domain, "Domain authorized");
                Ok(())
            }
            status => Err(ChallengeError::Invalid { status }),
        }
    }
}
