//! `status`: registration state and stored certificates

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::stores::StorageLayout;

use super::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateState {
    Valid,
    /// Still valid but within the TTL
    Expiring,
    Expired,
}

impl CertificateState {
    fn symbol(self) -> &'static str {
        match self {
            Self::Valid => "✓",
            Self::Expiring => "⭮",
            Self::Expired => "✗",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateStatus {
    pub common_name: String,
    pub names: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub state: CertificateState,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub server: String,
    pub registered: bool,
    pub certificates: Vec<CertificateStatus>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registered {
            writeln!(f, "  [ ✓ ] Registered on {}", self.server)?;
        } else {
            writeln!(f, "  [ ✗ ] Not yet registered on {}", self.server)?;
        }
        for certificate in &self.certificates {
            writeln!(
                f,
                "  [ {} ] {} (until {})",
                certificate.state.symbol(),
                certificate.names.join(", "),
                certificate.not_after.format("%Y-%m-%d")
            )?;
        }
        Ok(())
    }
}

/// Classify a certificate expiring at `not_after`
pub fn classify(not_after: DateTime<Utc>, ttl_days: u32, now: DateTime<Utc>) -> CertificateState {
    if not_after <= now {
        CertificateState::Expired
    } else if not_after <= now + Duration::days(i64::from(ttl_days)) {
        CertificateState::Expiring
    } else {
        CertificateState::Valid
    }
}

/// Collect the status of everything stored for `server`
pub async fn run(
    layout: &StorageLayout,
    server: &str,
    ttl_days: u32,
    now: DateTime<Utc>,
) -> Result<StatusReport, CommandError> {
    let registered = layout.account_store().is_registered().await;

    let store = layout.certificate_store();
    let mut certificates = Vec::new();
    for name in store.list().await? {
        let certificate = store.inspect(name.as_str()).await?;
        certificates.push(CertificateStatus {
            state: classify(certificate.not_after, ttl_days, now),
            common_name: certificate.common_name,
            names: certificate.names,
            not_after: certificate.not_after,
        });
    }

    Ok(StatusReport {
        server: server.to_string(),
        registered,
        certificates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::self_signed;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let now = Utc::now();
        assert_eq!(classify(now - Duration::days(1), 30, now), CertificateState::Expired);
        assert_eq!(classify(now + Duration::days(10), 30, now), CertificateState::Expiring);
        assert_eq!(classify(now + Duration::days(60), 30, now), CertificateState::Valid);
    }

    #[tokio::test]
    async fn test_report_lists_stored_certificates() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path(), "ca.test");
        let store = layout.certificate_store();
        let now = Utc::now();
        store
            .put(&[self_signed(&["b.example", "www.b.example"], Some(now + Duration::days(5)))])
            .await
            .unwrap();
        store
            .put(&[self_signed(&["a.example"], Some(now + Duration::days(80)))])
            .await
            .unwrap();

        let report = run(&layout, "https://ca.test/directory", 30, now).await.unwrap();

        assert!(!report.registered);
        let states: Vec<_> = report
            .certificates
            .iter()
            .map(|c| (c.common_name.as_str(), c.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("a.example", CertificateState::Valid),
                ("b.example", CertificateState::Expiring)
            ]
        );

        let text = report.to_string();
        assert!(text.starts_with("  [ ✗ ] Not yet registered on https://ca.test/directory\n"));
        assert!(text.contains("  [ ⭮ ] b.example, www.b.example (until "));
    }
}
