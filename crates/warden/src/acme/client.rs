//! ACME service backed by `instant-acme`
//!
//! `instant-acme` models an order as a stateful object, while the
//! orchestrator addresses everything by URL. The adapter keeps every open
//! order behind a mutex, keyed by the order's finalize URL, and remembers
//! which order each authorization and challenge URL belongs to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use dashmap::DashMap;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType,
    Identifier, NewAccount, NewOrder, OrderStatus, RevocationRequest,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, trace, warn};

use super::error::AcmeError;
use super::service::{
    split_pem_chain, AcmeService, Authorization, AuthorizationRef, AuthorizationStatus,
    Challenge, Order, Registration, HTTP_01,
};

/// Polling schedule for authorizations and orders
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Delay before the first re-check
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay
    pub max_delay: Duration,
    /// Give up after this many checks
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

type SharedOrder = Arc<Mutex<instant_acme::Order>>;

/// [`AcmeService`] implementation speaking to a real CA
pub struct InstantAcmeService {
    /// ACME directory URL
    directory_url: String,
    account: OnceCell<Account>,
    /// Open orders keyed by finalize URL
    orders: DashMap<String, SharedOrder>,
    /// Authorization URL -> order key
    authorizations: DashMap<String, String>,
    /// Challenge URL -> order key
    challenges: DashMap<String, String>,
    poll: PollPolicy,
}

impl std::fmt::Debug for InstantAcmeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeService")
            .field("directory_url", &self.directory_url)
            .field("has_account", &self.account.initialized())
            .field("open_orders", &self.orders.len())
            .finish()
    }
}

impl InstantAcmeService {
    /// Create a service for the given directory URL
    ///
    /// No network traffic happens until an account is registered or resumed.
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            account: OnceCell::new(),
            orders: DashMap::new(),
            authorizations: DashMap::new(),
            challenges: DashMap::new(),
            poll: PollPolicy::default(),
        }
    }

    /// Override the polling schedule
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// The directory URL this service talks to
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    fn account(&self) -> Result<&Account, AcmeError> {
        self.account.get().ok_or(AcmeError::NoAccount)
    }

    fn order(&self, key: &str) -> Result<SharedOrder, AcmeError> {
        self.orders
            .get(key)
            .map(|o| Arc::clone(o.value()))
            .ok_or_else(|| AcmeError::UnknownResource(key.to_string()))
    }

    fn order_for(&self, index: &DashMap<String, String>, url: &str) -> Result<SharedOrder, AcmeError> {
        let key = index
            .get(url)
            .map(|k| k.value().clone())
            .ok_or_else(|| AcmeError::UnknownResource(url.to_string()))?;
        self.order(&key)
    }

    fn forget_order(&self, key: &str) {
        self.orders.remove(key);
        self.authorizations.retain(|_, order| order != key);
        self.challenges.retain(|_, order| order != key);
        trace!(order = %key, "Dropped order state");
    }
}

#[async_trait]
impl AcmeService for InstantAcmeService {
    async fn register(&self, email: &str) -> Result<Registration, AcmeError> {
        let contact = format!("mailto:{}", email);
        let new_account = NewAccount {
            contact: &[&contact],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        info!(directory = %self.directory_url, contact = %contact, "Creating ACME account");

        let (account, credentials) = Account::create(&new_account, &self.directory_url, None)
            .await
            .map_err(|e| AcmeError::Account(e.to_string()))?;

        let credentials = serde_json::to_value(&credentials)
            .map_err(|e| AcmeError::Account(format!("unserializable credentials: {}", e)))?;
        let account_key_pem = account_key_pem(&credentials)?;
        let account_url = account.id().to_string();

        if self.account.set(account).is_err() {
            warn!("ACME account was already loaded, keeping the existing one");
        }

        info!(account = %account_url, "Registered ACME account");

        Ok(Registration {
            account_url,
            contact: vec![contact],
            account_key_pem,
            credentials,
        })
    }

    async fn resume_account(&self, credentials: &serde_json::Value) -> Result<(), AcmeError> {
        self.account
            .get_or_try_init(|| async {
                let credentials: AccountCredentials = serde_json::from_value(credentials.clone())
                    .map_err(|e| AcmeError::Account(format!("corrupt credentials: {}", e)))?;
                let account = Account::from_credentials(credentials)
                    .await
                    .map_err(|e| AcmeError::Account(e.to_string()))?;
                debug!(account = %account.id(), "Resumed ACME account");
                Ok::<_, AcmeError>(account)
            })
            .await?;
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> Result<Order, AcmeError> {
        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();

        let mut order = self
            .account()?
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        let state = order.state();
        let key = state.finalize.clone();
        let authorization_urls = state.authorizations.clone();

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Authorization(e.to_string()))?;

        if authorizations.len() != authorization_urls.len() {
            return Err(AcmeError::ProtocolViolation(format!(
                "order lists {} authorizations but {} were returned",
                authorization_urls.len(),
                authorizations.len()
            )));
        }

        let mut refs = Vec::with_capacity(authorizations.len());
        for (url, auth) in authorization_urls.into_iter().zip(&authorizations) {
            let Identifier::Dns(identifier) = &auth.identifier;
            for challenge in &auth.challenges {
                self.challenges.insert(challenge.url.clone(), key.clone());
            }
            self.authorizations.insert(url.clone(), key.clone());
            refs.push(AuthorizationRef {
                identifier: identifier.clone(),
                url,
            });
        }

        debug!(
            order = %key,
            domains = domains.len(),
            "Created ACME order"
        );

        self.orders.insert(key.clone(), Arc::new(Mutex::new(order)));

        Ok(Order {
            url: key,
            authorizations: refs,
        })
    }

    async fn get_authorization(&self, url: &str) -> Result<Authorization, AcmeError> {
        let order = self.order_for(&self.authorizations, url)?;
        let mut order = order.lock().await;

        let position = order
            .state()
            .authorizations
            .iter()
            .position(|u| u == url)
            .ok_or_else(|| AcmeError::UnknownResource(url.to_string()))?;

        let mut authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Authorization(e.to_string()))?;

        if position >= authorizations.len() {
            return Err(AcmeError::ProtocolViolation(format!(
                "authorization {} missing from order",
                url
            )));
        }
        let auth = authorizations.swap_remove(position);

        let Identifier::Dns(identifier) = auth.identifier;
        let challenges = auth
            .challenges
            .into_iter()
            .map(|c| Challenge {
                kind: challenge_kind(&c.r#type).to_string(),
                url: c.url,
                token: c.token,
            })
            .collect();

        Ok(Authorization {
            identifier,
            status: map_status(&auth.status),
            challenges,
        })
    }

    async fn finalize_challenge(&self, url: &str) -> Result<(), AcmeError> {
        let order = self.order_for(&self.challenges, url)?;
        let mut order = order.lock().await;
        order
            .set_challenge_ready(url)
            .await
            .map_err(|e| AcmeError::ChallengeValidation(e.to_string()))?;
        debug!(challenge = %url, "Challenge marked ready");
        Ok(())
    }

    async fn poll_for_authorization(&self, url: &str) -> Result<AuthorizationStatus, AcmeError> {
        for attempt in 0..self.poll.max_attempts {
            let auth = self.get_authorization(url).await?;
            if auth.status.is_terminal() {
                debug!(authorization = %url, status = %auth.status, "Authorization settled");
                return Ok(auth.status);
            }
            trace!(authorization = %url, attempt = attempt, "Authorization still pending");
            tokio::time::sleep(self.poll.delay(attempt)).await;
        }

        Err(AcmeError::Timeout(format!("authorization {}", url)))
    }

    async fn finalize_order(&self, url: &str, csr_der: &[u8]) -> Result<(), AcmeError> {
        let order = self.order(url)?;
        let mut order = order.lock().await;

        // The CA may still be moving the order from pending to ready
        for attempt in 0..self.poll.max_attempts {
            let status = order
                .refresh()
                .await
                .map_err(|e| AcmeError::Finalization(e.to_string()))?
                .status;
            match status {
                OrderStatus::Ready => {
                    order
                        .finalize(csr_der)
                        .await
                        .map_err(|e| AcmeError::Finalization(e.to_string()))?;
                    info!(order = %url, "Order finalized");
                    return Ok(());
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization(format!(
                        "order became invalid: {:?}",
                        order.state().error
                    )));
                }
                OrderStatus::Valid | OrderStatus::Processing => {
                    return Err(AcmeError::ProtocolViolation(format!(
                        "order {} was already finalized",
                        url
                    )));
                }
                OrderStatus::Pending => {
                    trace!(order = %url, attempt = attempt, "Order not ready yet");
                    tokio::time::sleep(self.poll.delay(attempt)).await;
                }
            }
        }

        Err(AcmeError::Timeout(format!("order {} to become ready", url)))
    }

    async fn poll_for_order_valid(&self, url: &str) -> Result<String, AcmeError> {
        let order = self.order(url)?;
        let mut order = order.lock().await;

        for attempt in 0..self.poll.max_attempts {
            let status = order
                .refresh()
                .await
                .map_err(|e| AcmeError::Finalization(e.to_string()))?
                .status;
            match status {
                OrderStatus::Valid => {
                    debug!(order = %url, "Order is valid");
                    return Ok(url.to_string());
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization(format!(
                        "order became invalid: {:?}",
                        order.state().error
                    )));
                }
                _ => {
                    trace!(order = %url, attempt = attempt, "Order still processing");
                    tokio::time::sleep(self.poll.delay(attempt)).await;
                }
            }
        }

        Err(AcmeError::Timeout(format!("order {} to become valid", url)))
    }

    async fn download_certificates(&self, url: &str) -> Result<Vec<String>, AcmeError> {
        let shared = self.order(url)?;
        let chain = {
            let mut order = shared.lock().await;
            order
                .certificate()
                .await
                .map_err(|e| AcmeError::CertificateDownload(e.to_string()))?
                .ok_or_else(|| {
                    AcmeError::CertificateDownload("order has no certificate yet".to_string())
                })?
        };

        self.forget_order(url);

        let certificates = split_pem_chain(&chain);
        if certificates.is_empty() {
            return Err(AcmeError::CertificateDownload(
                "CA returned no PEM certificates".to_string(),
            ));
        }

        debug!(order = %url, certificates = certificates.len(), "Downloaded certificate chain");
        Ok(certificates)
    }

    async fn revoke_certificate(&self, pem: &str) -> Result<(), AcmeError> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .ok_or_else(|| AcmeError::Revocation("no certificate in PEM input".to_string()))?
            .map_err(|e| AcmeError::Revocation(e.to_string()))?;

        self.account()?
            .revoke(&RevocationRequest {
                certificate: &der,
                reason: None,
            })
            .await
            .map_err(|e| AcmeError::Revocation(e.to_string()))?;

        info!("Certificate revoked");
        Ok(())
    }
}

fn map_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        AcmeAuthorizationStatus::Invalid => AuthorizationStatus::Invalid,
        AcmeAuthorizationStatus::Revoked => AuthorizationStatus::Revoked,
        AcmeAuthorizationStatus::Expired => AuthorizationStatus::Expired,
    }
}

fn challenge_kind(kind: &ChallengeType) -> &'static str {
    match kind {
        ChallengeType::Http01 => HTTP_01,
        ChallengeType::Dns01 => "dns-01",
        ChallengeType::TlsAlpn01 => "tls-alpn-01",
        _ => "unknown",
    }
}

/// Pull the account key out of serialized credentials as PKCS#8 PEM
fn account_key_pem(credentials: &serde_json::Value) -> Result<String, AcmeError> {
    let encoded = credentials
        .get("key_pkcs8")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AcmeError::Account("credentials carry no account key".to_string()))?;

    let der = URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| AcmeError::Account(format!("undecodable account key: {}", e)))?;

    let key = rcgen::KeyPair::try_from(der.as_slice())
        .map_err(|e| AcmeError::UnsupportedAccountKey(e.to_string()))?;

    Ok(key.serialize_pem())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_delay_doubles_and_caps() {
        let poll = PollPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 5,
        };
        assert_eq!(poll.delay(0), Duration::from_millis(100));
        assert_eq!(poll.delay(1), Duration::from_millis(200));
        assert_eq!(poll.delay(2), Duration::from_millis(400));
        assert_eq!(poll.delay(3), Duration::from_millis(500));
        assert_eq!(poll.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status(&AcmeAuthorizationStatus::Pending), AuthorizationStatus::Pending);
        assert_eq!(map_status(&AcmeAuthorizationStatus::Valid), AuthorizationStatus::Valid);
        assert_eq!(map_status(&AcmeAuthorizationStatus::Invalid), AuthorizationStatus::Invalid);
        assert_eq!(map_status(&AcmeAuthorizationStatus::Revoked), AuthorizationStatus::Revoked);
        assert_eq!(map_status(&AcmeAuthorizationStatus::Expired), AuthorizationStatus::Expired);
    }

    #[test]
    fn test_account_key_from_credentials() {
        let key = rcgen::KeyPair::generate().unwrap();
        let credentials = serde_json::json!({
            "id": "https://ca.example/acct/1",
            "key_pkcs8": URL_SAFE_NO_PAD.encode(key.serialized_der()),
        });

        let pem = account_key_pem(&credentials).unwrap();
        assert_eq!(pem, key.serialize_pem());

        assert!(account_key_pem(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_operations_need_an_account() {
        let service = InstantAcmeService::new("https://ca.example/directory");
        assert!(matches!(
            service.new_order(&["example.com".to_string()]).await,
            Err(AcmeError::NoAccount)
        ));
        assert!(matches!(
            service.get_authorization("https://ca.example/authz/1").await,
            Err(AcmeError::UnknownResource(_))
        ));
    }
}
