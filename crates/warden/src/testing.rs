//! Test fixtures shared across modules

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use warden_common::{ChallengeToken, DnsName};

use crate::acme::{
    AcmeError, AcmeService, Authorization, AuthorizationRef, AuthorizationStatus, Challenge,
    Order, Registration, HTTP_01,
};
use crate::issuance::{ProofVerifier, VerifyError};
use crate::stores::ACME_CHALLENGE_DIR;

/// Self-signed PEM certificate whose common name is the first SAN
pub(crate) fn self_signed(names: &[&str], not_after: Option<DateTime<Utc>>) -> String {
    certificate(names[0], names, not_after)
}

/// Self-signed PEM certificate with an arbitrary common name
pub(crate) fn self_signed_with_cn(cn: &str, names: &[&str]) -> String {
    certificate(cn, names, None)
}

fn certificate(cn: &str, names: &[&str], not_after: Option<DateTime<Utc>>) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, cn);
    if let Some(not_after) = not_after {
        params.not_after =
            rcgen::date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);
    }
    params.self_signed(&key).unwrap().pem()
}

/// PEM account key of the kind the real service produces
pub(crate) fn account_key_pem() -> String {
    KeyPair::generate().unwrap().serialize_pem()
}

/// Token the fake CA hands out for `domain`
pub(crate) fn token_for(domain: &str) -> String {
    format!("tok-{}", domain.replace('.', "_"))
}

/// In-memory certificate authority
#[derive(Default)]
pub(crate) struct FakeAcme {
    /// Authorizations that are already valid
    pub already_valid: HashSet<String>,
    /// Authorizations the CA will reject after submission
    pub reject: HashSet<String>,
    /// Authorizations offering no http-01 challenge
    pub no_http: HashSet<String>,
    /// Authorizations offering an unsafe token
    pub bad_token: HashSet<String>,
    /// Every call, in order
    pub calls: Mutex<Vec<String>>,
    /// Domains per order URL
    orders: Mutex<HashMap<String, Vec<String>>>,
    pub finalized: AtomicBool,
    pub csr_count: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl FakeAcme {
    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn domain_of(url: &str) -> String {
        url.rsplit('/').next().unwrap_or_default().to_string()
    }
}

#[async_trait]
impl AcmeService for FakeAcme {
    async fn register(&self, email: &str) -> Result<Registration, AcmeError> {
        self.record(format!("register {email}"));
        Ok(Registration {
            account_url: "https://ca.test/acct/1".to_string(),
            contact: vec![format!("mailto:{email}")],
            account_key_pem: account_key_pem(),
            credentials: serde_json::json!({"id": "https://ca.test/acct/1"}),
        })
    }

    async fn resume_account(&self, _credentials: &serde_json::Value) -> Result<(), AcmeError> {
        self.record("resume".to_string());
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> Result<Order, AcmeError> {
        self.record(format!("new_order {}", domains.join(",")));
        let url = format!("https://ca.test/order/{}", domains.join("+"));
        self.orders.lock().insert(url.clone(), domains.to_vec());
        Ok(Order {
            url,
            authorizations: domains
                .iter()
                .map(|d| AuthorizationRef {
                    identifier: d.clone(),
                    url: format!("https://ca.test/authz/{d}"),
                })
                .collect(),
        })
    }

    async fn get_authorization(&self, url: &str) -> Result<Authorization, AcmeError> {
        let domain = Self::domain_of(url);
        self.record(format!("get_authorization {domain}"));

        let status = if self.already_valid.contains(&domain) {
            AuthorizationStatus::Valid
        } else {
            AuthorizationStatus::Pending
        };
        let token = if self.bad_token.contains(&domain) {
            "../../etc/passwd".to_string()
        } else {
            token_for(&domain)
        };
        let mut challenges = vec![Challenge {
            kind: "dns-01".to_string(),
            url: format!("https://ca.test/chall/dns/{domain}"),
            token: token.clone(),
        }];
        if !self.no_http.contains(&domain) {
            challenges.push(Challenge {
                kind: HTTP_01.to_string(),
                url: format!("https://ca.test/chall/http/{domain}"),
                token,
            });
        }

        Ok(Authorization {
            identifier: domain,
            status,
            challenges,
        })
    }

    async fn finalize_challenge(&self, url: &str) -> Result<(), AcmeError> {
        self.record(format!("finalize_challenge {}", Self::domain_of(url)));
        Ok(())
    }

    async fn poll_for_authorization(&self, url: &str) -> Result<AuthorizationStatus, AcmeError> {
        let domain = Self::domain_of(url);
        self.record(format!("poll_for_authorization {domain}"));
        if self.reject.contains(&domain) {
            Ok(AuthorizationStatus::Invalid)
        } else {
            Ok(AuthorizationStatus::Valid)
        }
    }

    async fn finalize_order(&self, url: &str, csr_der: &[u8]) -> Result<(), AcmeError> {
        self.record(format!("finalize_order {url}"));
        assert!(!csr_der.is_empty());
        self.finalized.store(true, Ordering::SeqCst);
        self.csr_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll_for_order_valid(&self, url: &str) -> Result<String, AcmeError> {
        self.record(format!("poll_for_order_valid {url}"));
        Ok(format!("{url}/cert"))
    }

    async fn download_certificates(&self, url: &str) -> Result<Vec<String>, AcmeError> {
        self.record(format!("download_certificates {url}"));
        let order = url.trim_end_matches("/cert");
        let domains = self.orders.lock().get(order).cloned().unwrap_or_default();
        let names: Vec<&str> = domains.iter().map(String::as_str).collect();
        Ok(vec![
            self_signed(&names, None),
            self_signed(&["intermediate.ca.test"], None),
        ])
    }

    async fn revoke_certificate(&self, pem: &str) -> Result<(), AcmeError> {
        self.record("revoke".to_string());
        self.revoked.lock().push(pem.to_string());
        Ok(())
    }
}

/// Verifier that checks the proof file on disk instead of over HTTP
#[derive(Default)]
pub(crate) struct DiskVerifier {
    /// Document root per domain
    pub roots: HashMap<String, PathBuf>,
    /// Domains whose verification always fails
    pub fail: HashSet<String>,
    pub verified: Mutex<Vec<String>>,
}

impl DiskVerifier {
    pub(crate) fn new(roots: &[(&str, PathBuf)]) -> Self {
        Self {
            roots: roots
                .iter()
                .map(|(d, p)| (d.to_string(), p.clone()))
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ProofVerifier for DiskVerifier {
    async fn verify(
        &self,
        domain: &DnsName,
        token: &ChallengeToken,
        expected: &str,
    ) -> Result<(), VerifyError> {
        let url = format!("http://{domain}/.well-known/acme-challenge/{token}");
        if self.fail.contains(domain.as_str()) {
            return Err(VerifyError::Status { url, status: 404 });
        }
        let path = self.roots[domain.as_str()]
            .join(ACME_CHALLENGE_DIR)
            .join(token.as_str());
        let found = std::fs::read_to_string(&path).unwrap_or_default();
        if found.trim() != expected {
            return Err(VerifyError::Mismatch { url, found });
        }
        self.verified.lock().push(domain.to_string());
        Ok(())
    }
}
