//! `revoke`: revoke a stored certificate and forget it

use chrono::Utc;
use tracing::{info, warn};

use crate::services::Services;
use crate::stores::StoredCertificate;

use super::CommandError;

/// Revoke the certificate stored as `name`, then delete it locally
pub async fn run(services: &Services, name: &str) -> Result<StoredCertificate, CommandError> {
    let (_, record) = services.layout.account_store().load().await?;
    services.acme.resume_account(&record.credentials).await?;

    let store = services.layout.certificate_store();
    let pem = store.get(name).await?;
    let certificate = StoredCertificate::from_pem(&pem)?;

    if certificate.not_after < Utc::now() {
        warn!(name = %name, "Certificate already expired, revoking anyway");
    }
    info!(
        name = %name,
        domains = %certificate.names.join(", "),
        "Revoking certificate"
    );

    services.acme.revoke_certificate(&pem).await?;
    store.delete(name).await?;

    info!(name = %name, "Certificate revoked");
    Ok(certificate)
}
