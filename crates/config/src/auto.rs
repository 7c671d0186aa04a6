//! Auto-renewal configuration
//!
//! The `auto` command reads a YAML file describing every certificate that
//! should be kept fresh:
//!
//! ```yaml
//! server: letsencrypt
//! storage: /etc/warden
//! email: admin@example.com
//! concurrency: 10
//!
//! certificates:
//!   - paths:
//!       /var/www/example: example.com
//!       /var/www/www: [www.example.com, static.example.com]
//!     user: www-data
//!     bits: 4096
//!     rekey: false
//! ```
//!
//! The file is parsed into loosely-typed raw structs and then validated into
//! [`AutoConfig`] once. Unknown keys are rejected and every problem is
//! reported together.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, info, trace, warn};
use validator::Validate;

use warden_common::DnsName;

use crate::error::ConfigError;
use crate::lists::normalize_doc_root;
use crate::server::resolve_server;
use crate::validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Default number of certificates renewed concurrently
pub const DEFAULT_CONCURRENCY: usize = 10;

const HIGH_CONCURRENCY: usize = 20;

/// Default RSA key size for domain keys
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Smallest accepted RSA key size
pub const MIN_KEY_BITS: u32 = 2048;

/// Largest accepted RSA key size
pub const MAX_KEY_BITS: u32 = 8192;

/// Environment variable naming the auto-renewal config file
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

const PATHS_FORMAT_HELP: &str = r#"Your configuration has the wrong format: "paths" must be a map, not a list.

If your configuration looks like this:

certificates:
 - paths:
    - /www/a: a.example.org
    - /www/b: b.example.org

Rewrite it to the following format for a single certificate:

certificates:
 - paths:
     /www/a: a.example.org
     /www/b: b.example.org

Rewrite it to the following format for two separate certificates:

certificates:
 - paths:
     /www/a: a.example.org
 - paths:
     /www/b: b.example.org"#;

/// Validated auto-renewal configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoConfig {
    /// Resolved ACME directory URL
    pub server: String,
    /// Storage root for keys and certificates
    pub storage: PathBuf,
    /// Account contact email
    pub email: String,
    /// Number of certificates processed concurrently
    pub concurrency: usize,
    /// Certificates to keep renewed
    pub certificates: Vec<CertificateEntry>,
}

/// One certificate in the auto-renewal configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// Domains in configuration order; the first is the common name
    pub domains: Vec<DnsName>,
    /// Document root per domain (same length as `domains`)
    pub doc_roots: Vec<PathBuf>,
    /// User the web server runs as
    pub user: Option<String>,
    /// RSA key size for the domain key
    pub bits: Option<u32>,
    /// Force a new domain key on renewal
    pub rekey: bool,
}

impl CertificateEntry {
    /// The certificate's common name
    pub fn common_name(&self) -> &DnsName {
        // Validation guarantees at least one domain
        &self.domains[0]
    }

    /// Comma-separated domain list for display
    pub fn display_domains(&self) -> String {
        self.domains
            .iter()
            .map(DnsName::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Command line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub storage: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAutoConfig {
    server: Option<String>,
    storage: Option<String>,
    email: Option<String>,
    concurrency: Option<usize>,
    certificates: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCertificate {
    paths: Value,
    user: Option<String>,
    bits: Option<u32>,
    rekey: Option<bool>,
}

#[derive(Debug, Validate)]
struct Contact {
    #[validate(email)]
    email: String,
}

/// Whether `email` is a syntactically valid contact address
pub fn is_valid_email(email: &str) -> bool {
    Contact {
        email: email.to_string(),
    }
    .validate()
    .is_ok()
}

impl AutoConfig {
    /// Read and validate a config file
    pub fn from_file(path: &Path, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "Loading auto-renewal configuration");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content, path, overrides)
    }

    /// Parse and validate YAML content; `path` is used in messages only
    pub fn from_yaml(
        content: &str,
        path: &Path,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let raw: RawAutoConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        trace!(
            has_server = raw.server.is_some(),
            has_storage = raw.storage.is_some(),
            "Parsed raw auto-renewal configuration"
        );

        let mut result = ValidationResult::new();

        let server = match overrides.server.clone().or(raw.server) {
            Some(server) => match resolve_server(&server) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    result.add_error(ValidationError::new(ErrorCategory::Format, e.to_string()));
                    None
                }
            },
            None => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Missing,
                    "no 'server' set in the config file nor passed on the command line",
                ));
                None
            }
        };

        let storage = overrides
            .storage
            .clone()
            .or_else(|| raw.storage.as_deref().map(normalize_doc_root));
        if storage.is_none() {
            result.add_error(ValidationError::new(
                ErrorCategory::Missing,
                "no 'storage' set in the config file nor passed on the command line",
            ));
        }

        let email = raw.email.map(|e| e.trim().to_string());
        match &email {
            None => result.add_error(ValidationError::new(
                ErrorCategory::Missing,
                "no 'email' set in the config file",
            )),
            Some(email) if !is_valid_email(email) => result.add_error(ValidationError::new(
                ErrorCategory::Contact,
                format!("invalid contact email '{}'", email),
            )),
            Some(_) => {}
        }

        let concurrency = overrides
            .concurrency
            .or(raw.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            result.add_error(ValidationError::new(
                ErrorCategory::Format,
                "'concurrency' must be at least 1",
            ));
        } else if concurrency > HIGH_CONCURRENCY {
            result.add_warning(ValidationWarning::new(format!(
                "'concurrency' of {} may trip ACME server rate limits",
                concurrency
            )));
        }

        let certificates = match raw.certificates {
            Some(Value::Sequence(items)) => items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| parse_certificate(index, item, &mut result))
                .collect(),
            _ => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Missing,
                    "no 'certificates' section that's a list",
                ));
                Vec::new()
            }
        };

        check_cross_certificate_duplicates(&certificates, &mut result);

        for warning in &result.warnings {
            warn!(path = %path.display(), "{}", warning.message);
        }

        if !result.is_ok() {
            return Err(ConfigError::Invalid(result.errors));
        }

        match (server, storage, email) {
            (Some(server), Some(storage), Some(email)) => {
                debug!(
                    server = %server,
                    storage = %storage.display(),
                    certificates = certificates.len(),
                    concurrency = concurrency,
                    "Validated auto-renewal configuration"
                );
                Ok(Self {
                    server,
                    storage,
                    email,
                    concurrency,
                    certificates,
                })
            }
            // Unreachable: each missing value added an error above
            _ => Err(ConfigError::Invalid(Vec::new())),
        }
    }
}

fn parse_certificate(
    index: usize,
    item: Value,
    result: &mut ValidationResult,
) -> Option<CertificateEntry> {
    let position = index + 1;
    let raw: RawCertificate = match serde_yaml::from_value(item) {
        Ok(raw) => raw,
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Format,
                format!("certificate #{}: {}", position, e),
            ));
            return None;
        }
    };

    let mut domains: Vec<DnsName> = Vec::new();
    let mut doc_roots = Vec::new();
    let errors_before = result.errors.len();

    match raw.paths {
        Value::Mapping(map) => {
            for (path, names) in map {
                let Value::String(path) = path else {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Format,
                        format!("certificate #{}: {}", position, PATHS_FORMAT_HELP),
                    ));
                    continue;
                };

                let names = match names {
                    Value::String(name) => vec![name],
                    Value::Sequence(seq) => seq
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::String(s) => Some(s),
                            other => {
                                result.add_error(ValidationError::new(
                                    ErrorCategory::Domain,
                                    format!(
                                        "certificate #{}: domain under '{}' is not a string: {:?}",
                                        position, path, other
                                    ),
                                ));
                                None
                            }
                        })
                        .collect(),
                    other => {
                        result.add_error(ValidationError::new(
                            ErrorCategory::Domain,
                            format!(
                                "certificate #{}: domains under '{}' must be a string or a list, got {:?}",
                                position, path, other
                            ),
                        ));
                        continue;
                    }
                };

                let root = normalize_doc_root(&path);
                if root.as_os_str().is_empty() {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Path,
                        format!("certificate #{}: empty document root", position),
                    ));
                    continue;
                }

                for name in names {
                    let name = name.trim().to_ascii_lowercase();
                    match DnsName::parse(name.clone()) {
                        Ok(domain) if domains.contains(&domain) => {
                            result.add_error(ValidationError::new(
                                ErrorCategory::Domain,
                                format!("certificate #{}: duplicate domain: {}", position, domain),
                            ));
                        }
                        Ok(domain) => {
                            domains.push(domain);
                            doc_roots.push(root.clone());
                        }
                        Err(e) => result.add_error(ValidationError::new(
                            ErrorCategory::Domain,
                            format!("certificate #{}: invalid domain '{}': {}", position, name, e),
                        )),
                    }
                }
            }
        }
        Value::Sequence(_) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Format,
                format!("certificate #{}: {}", position, PATHS_FORMAT_HELP),
            ));
        }
        other => {
            result.add_error(ValidationError::new(
                ErrorCategory::Format,
                format!("certificate #{}: 'paths' must be a map, got {:?}", position, other),
            ));
        }
    }

    if domains.is_empty() && result.errors.len() == errors_before {
        result.add_error(ValidationError::new(
            ErrorCategory::Domain,
            format!("certificate #{}: no domains configured", position),
        ));
    }

    if let Some(bits) = raw.bits {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            result.add_error(ValidationError::new(
                ErrorCategory::Key,
                format!(
                    "certificate #{}: 'bits' must be between {} and {}, got {}",
                    position, MIN_KEY_BITS, MAX_KEY_BITS, bits
                ),
            ));
        }
    }

    if let Some(user) = &raw.user {
        if user.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Format,
                format!("certificate #{}: 'user' must not be empty", position),
            ));
        }
    }

    if result.errors.len() != errors_before {
        return None;
    }

    Some(CertificateEntry {
        domains,
        doc_roots,
        user: raw.user,
        bits: raw.bits,
        rekey: raw.rekey.unwrap_or(false),
    })
}

fn check_cross_certificate_duplicates(certificates: &[CertificateEntry], result: &mut ValidationResult) {
    let mut seen = std::collections::HashMap::new();
    for (index, cert) in certificates.iter().enumerate() {
        if let Some(previous) = seen.insert(cert.common_name().clone(), index) {
            result.add_error(ValidationError::new(
                ErrorCategory::Domain,
                format!(
                    "certificates #{} and #{} share the common name {}",
                    previous + 1,
                    index + 1,
                    cert.common_name()
                ),
            ));
        }
    }
}

/// Locate the auto-renewal config file.
///
/// An explicit path wins, then `WARDEN_CONFIG`, then `./warden.yml`, then
/// `/etc/warden.yml`.
pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    let candidates = [PathBuf::from("warden.yml"), PathBuf::from("/etc/warden.yml")];
    for candidate in &candidates {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found auto-renewal configuration");
            return Ok(candidate.clone());
        }
    }

    Err(ConfigError::NotFound {
        searched: candidates.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};

    const VALID: &str = r#"
server: letsencrypt:staging
storage: /etc/warden/
email: admin@example.com
certificates:
  - paths:
      /var/www/example: example.com
      /var/www/www: [www.example.com, static.example.com]
    user: www-data
    bits: 4096
  - paths:
      /var/www/other: other.example.org
    rekey: true
"#;

    fn parse(content: &str) -> Result<AutoConfig, ConfigError> {
        AutoConfig::from_yaml(content, Path::new("test.yml"), &ConfigOverrides::default())
    }

    fn messages(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Invalid(errors) => errors.into_iter().map(|e| e.message).collect(),
            other => panic!("expected validation errors, got {other}"),
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let config = parse(VALID).unwrap();

        assert_eq!(config.server, LETSENCRYPT_STAGING);
        assert_eq!(config.storage, PathBuf::from("/etc/warden"));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.certificates.len(), 2);

        let first = &config.certificates[0];
        assert_eq!(first.common_name().as_str(), "example.com");
        assert_eq!(
            first.display_domains(),
            "example.com, www.example.com, static.example.com"
        );
        assert_eq!(first.doc_roots[2], PathBuf::from("/var/www/www"));
        assert_eq!(first.user.as_deref(), Some("www-data"));
        assert_eq!(first.bits, Some(4096));
        assert!(!first.rekey);
        assert!(config.certificates[1].rekey);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            server: Some("letsencrypt".to_string()),
            storage: Some(PathBuf::from("/srv/acme")),
            concurrency: Some(3),
        };
        let config = AutoConfig::from_yaml(VALID, Path::new("test.yml"), &overrides).unwrap();
        assert_eq!(config.server, LETSENCRYPT_PRODUCTION);
        assert_eq!(config.storage, PathBuf::from("/srv/acme"));
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let errors = messages(parse("certificates: []\n").unwrap_err());
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("'server'"));
        assert!(errors[1].contains("'storage'"));
        assert!(errors[2].contains("'email'"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse("server: letsencrypt\nstorag: /tmp\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_paths_list_explains_format() {
        let content = r#"
server: letsencrypt
storage: /tmp/warden
email: admin@example.com
certificates:
  - paths:
      - /www/a: a.example.org
"#;
        let errors = messages(parse(content).unwrap_err());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must be a map, not a list"));
    }

    #[test]
    fn test_invalid_entries() {
        let content = r#"
server: letsencrypt
storage: /tmp/warden
email: not-an-email
certificates:
  - paths:
      /www/a: [a.example.org, a.example.org]
  - paths:
      /www/b: b/evil.org
    bits: 1024
"#;
        let errors = messages(parse(content).unwrap_err());
        assert!(errors.iter().any(|e| e.contains("invalid contact email")));
        assert!(errors.iter().any(|e| e.contains("duplicate domain: a.example.org")));
        assert!(errors.iter().any(|e| e.contains("invalid domain 'b/evil.org'")));
        assert!(errors.iter().any(|e| e.contains("'bits' must be between")));
    }

    #[test]
    fn test_duplicate_common_name_across_certificates() {
        let content = r#"
server: letsencrypt
storage: /tmp/warden
email: admin@example.com
certificates:
  - paths:
      /www/a: a.example.org
  - paths:
      /www/b: a.example.org
"#;
        let errors = messages(parse(content).unwrap_err());
        assert_eq!(errors, vec!["certificates #1 and #2 share the common name a.example.org"]);
    }

    #[test]
    fn test_error_rendering() {
        let err = parse("server: letsencrypt\nstorage: /tmp\nemail: a@example.com\n").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @r###"
        Invalid configuration:
          - [missing] no 'certificates' section that's a list
        "###);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = AutoConfig::from_file(&dir.path().join("nope.yml"), &ConfigOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yml");
        std::fs::write(&path, VALID).unwrap();

        let config = AutoConfig::from_file(&path, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.certificates.len(), 2);
        assert_eq!(find_config_path(Some(&path)).unwrap(), path);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("admin@example.com"));
        assert!(!is_valid_email("admin"));
        assert!(!is_valid_email("admin@"));
    }
}
