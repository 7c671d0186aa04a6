//! `issue`: obtain a certificate for a set of domains

use nix::unistd::{geteuid, User};
use tracing::debug;

use warden_config::{
    parse_domains, split_doc_roots, ConfigError, MAX_KEY_BITS, MIN_KEY_BITS,
};

use crate::issuance::{CertificateRequest, IssuedCertificate, MAX_AUTHORIZATION_CONCURRENCY};
use crate::services::Services;

use super::CommandError;

/// Proof owner when running as root without `--user`
pub const DEFAULT_PROOF_OWNER: &str = "www-data";

/// Raw `issue` arguments
#[derive(Debug, Clone)]
pub struct IssueArgs {
    /// Domains separated by `,`, `;` or `:`
    pub domains: String,
    /// Document roots separated by the platform path separator
    pub paths: String,
    pub user: Option<String>,
    pub bits: u32,
    pub rekey: bool,
    pub concurrency: usize,
}

/// Build a request from raw arguments, applying the proof-owner policy
pub fn request_from_args(args: &IssueArgs) -> Result<CertificateRequest, CommandError> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&args.bits) {
        return Err(ConfigError::InvalidKeySize {
            bits: args.bits,
            min: MIN_KEY_BITS,
            max: MAX_KEY_BITS,
        }
        .into());
    }

    let domains = parse_domains(&args.domains)?;
    let roots = split_doc_roots(&args.paths);
    let user = current_proof_owner(args.user.as_deref())?;

    Ok(CertificateRequest::new(
        domains,
        roots,
        user,
        args.bits,
        args.rekey,
    )?)
}

/// Issue a certificate
pub async fn run(services: &Services, args: &IssueArgs) -> Result<IssuedCertificate, CommandError> {
    let request = request_from_args(args)?;
    let concurrency = args.concurrency.clamp(1, MAX_AUTHORIZATION_CONCURRENCY);
    debug!(
        domains = request.domains.len(),
        concurrency = concurrency,
        "Issue request accepted"
    );
    Ok(services.orchestrator(concurrency).issue(&request).await?)
}

fn current_proof_owner(requested: Option<&str>) -> Result<Option<String>, CommandError> {
    let euid = geteuid();
    if euid.is_root() {
        return proof_owner(true, "root", requested);
    }
    if requested.is_none() {
        return Ok(None);
    }
    let current = User::from_uid(euid)
        .map_err(|e| CommandError::CurrentUser(e.to_string()))?
        .ok_or_else(|| CommandError::CurrentUser(format!("no passwd entry for uid {}", euid)))?;
    proof_owner(false, &current.name, requested)
}

/// Who should own served proof files
///
/// Root hands proofs to `requested` or [`DEFAULT_PROOF_OWNER`]. Anyone else
/// can only write files as themselves, so no ownership change happens and
/// `requested` must name the current user.
pub fn proof_owner(
    is_root: bool,
    current: &str,
    requested: Option<&str>,
) -> Result<Option<String>, CommandError> {
    if is_root {
        return Ok(Some(requested.unwrap_or(DEFAULT_PROOF_OWNER).to_string()));
    }
    match requested {
        Some(requested) if requested != current => Err(CommandError::UserNotAllowed {
            requested: requested.to_string(),
            current: current.to_string(),
        }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_proof_owner_policy() {
        assert_eq!(
            proof_owner(true, "root", None).unwrap().as_deref(),
            Some(DEFAULT_PROOF_OWNER)
        );
        assert_eq!(
            proof_owner(true, "root", Some("nginx")).unwrap().as_deref(),
            Some("nginx")
        );
        assert_eq!(proof_owner(false, "deploy", None).unwrap(), None);
        assert_eq!(proof_owner(false, "deploy", Some("deploy")).unwrap(), None);
        assert!(matches!(
            proof_owner(false, "deploy", Some("www-data")),
            Err(CommandError::UserNotAllowed { .. })
        ));
    }

    fn args(domains: &str, paths: &str, bits: u32) -> IssueArgs {
        IssueArgs {
            domains: domains.to_string(),
            paths: paths.to_string(),
            user: None,
            bits,
            rekey: false,
            concurrency: 10,
        }
    }

    #[test]
    fn test_request_from_args() {
        let request =
            request_from_args(&args("Example.com; www.example.com", "/var/www/", 2048)).unwrap();
        assert_eq!(request.common_name().as_str(), "example.com");
        assert_eq!(
            request.doc_roots,
            vec![PathBuf::from("/var/www"), PathBuf::from("/var/www")]
        );
    }

    #[test]
    fn test_request_from_args_rejects_bad_input() {
        assert!(matches!(
            request_from_args(&args("example.com", "/var/www", 1024)),
            Err(CommandError::Config(ConfigError::InvalidKeySize { .. }))
        ));
        assert!(matches!(
            request_from_args(&args("example.com", "/a:/b", 2048)),
            Err(CommandError::Config(ConfigError::TooManyDocRoots { .. }))
        ));
        assert!(matches!(
            request_from_args(&args("exa mple.com", "/a", 2048)),
            Err(CommandError::Config(ConfigError::InvalidDomain { .. }))
        ));
    }
}
