//! Remaining-validity checks

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::stores::{CertificateStore, CertificateStoreError};

/// Default minimum remaining validity, in days
pub const DEFAULT_TTL_DAYS: u32 = 30;

/// `check` exit code for a certificate that is still valid
pub const EXIT_CHECK_VALID: i32 = 0;
/// `check` exit code for a certificate that must be renewed
pub const EXIT_CHECK_RENEW: i32 = 1;
/// Exit code of a single command that failed, kept apart from the `check`
/// statuses
pub const EXIT_COMMAND_ERROR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Valid for longer than the TTL and covering every requested name
    Valid,
    NeedsRenewal,
}

/// Outcome of checking one stored certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateCheck {
    pub status: CheckStatus,
    /// `None` when no certificate is stored
    pub not_after: Option<DateTime<Utc>>,
    /// Requested names the certificate does not cover
    pub missing: Vec<String>,
}

impl CertificateCheck {
    /// Exit code for the `check` command
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CheckStatus::Valid => EXIT_CHECK_VALID,
            CheckStatus::NeedsRenewal => EXIT_CHECK_RENEW,
        }
    }
}

/// Check whether the certificate stored as `name` must be renewed
///
/// A missing certificate, one lacking any of `names`, and one expiring within
/// `ttl_days` of `now` all need renewal.
pub async fn check_certificate(
    store: &CertificateStore,
    name: &str,
    names: &[String],
    ttl_days: u32,
    now: DateTime<Utc>,
) -> Result<CertificateCheck, CertificateStoreError> {
    let certificate = match store.inspect(name).await {
        Ok(certificate) => certificate,
        Err(CertificateStoreError::NotFound { .. }) => {
            debug!(name = %name, "No stored certificate");
            return Ok(CertificateCheck {
                status: CheckStatus::NeedsRenewal,
                not_after: None,
                missing: Vec::new(),
            });
        }
        Err(e) => return Err(e),
    };

    let missing: Vec<String> = names
        .iter()
        .filter(|n| !certificate.covers([n.as_str()]))
        .cloned()
        .collect();

    let deadline = now + Duration::days(i64::from(ttl_days));
    let status = if missing.is_empty() && certificate.not_after > deadline {
        CheckStatus::Valid
    } else {
        CheckStatus::NeedsRenewal
    };

    debug!(
        name = %name,
        not_after = %certificate.not_after,
        missing = missing.len(),
        status = ?status,
        "Checked certificate"
    );

    Ok(CertificateCheck {
        status,
        not_after: Some(certificate.not_after),
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::self_signed;
    use tempfile::TempDir;

    async fn store_with(names: &[&str], not_after: DateTime<Utc>) -> (TempDir, CertificateStore) {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());
        store
            .put(&[self_signed(names, Some(not_after))])
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_long_lived_certificate_is_valid() {
        let now = Utc::now();
        let (_dir, store) = store_with(&["example.com"], now + Duration::days(90)).await;

        let check = check_certificate(&store, "example.com", &[], 30, now).await.unwrap();
        assert_eq!(check.status, CheckStatus::Valid);
        assert_eq!(check.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_expiring_certificate_needs_renewal() {
        let now = Utc::now();
        let (_dir, store) = store_with(&["example.com"], now + Duration::days(10)).await;

        let check = check_certificate(&store, "example.com", &[], 30, now).await.unwrap();
        assert_eq!(check.status, CheckStatus::NeedsRenewal);
        assert_eq!(check.exit_code(), 1);

        let check = check_certificate(&store, "example.com", &[], 5, now).await.unwrap();
        assert_eq!(check.status, CheckStatus::Valid);
    }

    #[tokio::test]
    async fn test_uncovered_names_need_renewal() {
        let now = Utc::now();
        let (_dir, store) =
            store_with(&["example.com", "www.example.com"], now + Duration::days(90)).await;

        let names = vec!["WWW.example.com".to_string(), "api.example.com".to_string()];
        let check = check_certificate(&store, "example.com", &names, 30, now).await.unwrap();
        assert_eq!(check.status, CheckStatus::NeedsRenewal);
        assert_eq!(check.missing, vec!["api.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_certificate_needs_renewal() {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());

        let check = check_certificate(&store, "example.com", &[], 30, Utc::now())
            .await
            .unwrap();
        assert_eq!(check.status, CheckStatus::NeedsRenewal);
        assert!(check.not_after.is_none());
    }

    #[tokio::test]
    async fn test_unsafe_name_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = CertificateStore::new(dir.path());

        let err = check_certificate(&store, "../etc", &[], 30, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateStoreError::InvalidCommonName { .. }));
    }
}
