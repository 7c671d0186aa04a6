//! `check`: does a stored certificate need renewal?

use chrono::Utc;

use warden_config::split_domains;

use crate::renewal::{check_certificate, CertificateCheck};
use crate::stores::StorageLayout;

use super::CommandError;

/// Check the certificate stored as `name`
///
/// `names`, if given, is a domain list that must be fully covered.
pub async fn run(
    layout: &StorageLayout,
    name: &str,
    names: Option<&str>,
    ttl_days: u32,
) -> Result<CertificateCheck, CommandError> {
    let names = names.map(split_domains).unwrap_or_default();
    let check = check_certificate(
        &layout.certificate_store(),
        name,
        &names,
        ttl_days,
        Utc::now(),
    )
    .await?;
    Ok(check)
}
