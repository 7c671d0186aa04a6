//! Domain and document root list handling.
//!
//! On the command line, domains are separated by `,`, `;` or `:` and
//! document roots by the platform path separator (`:` on Unix). A shorter
//! document root list is padded by repeating its last entry.

use std::path::{Path, PathBuf};

use warden_common::DnsName;

use crate::error::ConfigError;

/// Split a domain list on `,`, `;` and `:`
pub fn split_domains(input: &str) -> Vec<String> {
    input
        .split([',', ';', ':'])
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split and validate a domain list
pub fn parse_domains(input: &str) -> Result<Vec<DnsName>, ConfigError> {
    let domains = split_domains(input);
    if domains.is_empty() {
        return Err(ConfigError::NoDomains);
    }

    let mut parsed: Vec<DnsName> = Vec::with_capacity(domains.len());
    for domain in domains {
        let name = DnsName::parse(domain.to_ascii_lowercase()).map_err(|e| {
            ConfigError::InvalidDomain {
                domain: domain.clone(),
                reason: e.to_string(),
            }
        })?;
        if parsed.contains(&name) {
            return Err(ConfigError::InvalidDomain {
                domain,
                reason: "duplicate domain".to_string(),
            });
        }
        parsed.push(name);
    }

    Ok(parsed)
}

/// Normalise a document root: backslashes become `/`, trailing `/` removed
pub fn normalize_doc_root(root: &str) -> PathBuf {
    let root = root.replace('\\', "/");
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() && root.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Split a document root list on the platform path separator
pub fn split_doc_roots(input: &str) -> Vec<PathBuf> {
    std::env::split_paths(input)
        .filter_map(|p| {
            let p = p.to_string_lossy();
            let p = p.trim();
            (!p.is_empty()).then(|| normalize_doc_root(p))
        })
        .collect()
}

/// Assign one document root per domain.
///
/// More roots than domains is an error; fewer are padded with the last root.
pub fn assign_doc_roots(domains: usize, roots: Vec<PathBuf>) -> Result<Vec<PathBuf>, ConfigError> {
    if domains == 0 {
        return Err(ConfigError::NoDomains);
    }

    if roots.len() > domains {
        return Err(ConfigError::TooManyDocRoots {
            roots: roots.len(),
            domains,
        });
    }

    let mut roots = roots;
    let last = roots.last().cloned().ok_or(ConfigError::NoDocRoots)?;
    roots.resize(domains, last);
    Ok(roots)
}

/// Join document roots for a child process command line
pub fn join_doc_roots(roots: &[PathBuf]) -> Result<String, ConfigError> {
    let joined = std::env::join_paths(roots.iter().map(PathBuf::as_path))
        .map_err(|e| ConfigError::UnjoinablePath(e.to_string()))?;
    joined
        .into_string()
        .map_err(|p| ConfigError::UnjoinablePath(Path::new(&p).display().to_string()))
}

/// Join domains for a child process command line
pub fn join_domains(domains: &[DnsName]) -> String {
    domains
        .iter()
        .map(DnsName::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_domains_mixed_separators() {
        assert_eq!(
            split_domains("example.com, www.example.com;api.example.com:  mail.example.com"),
            vec!["example.com", "www.example.com", "api.example.com", "mail.example.com"]
        );
        assert!(split_domains(" , ;").is_empty());
    }

    #[test]
    fn test_parse_domains_rejects_bad_and_duplicate() {
        assert!(matches!(
            parse_domains("example.com,ex/ample.com"),
            Err(ConfigError::InvalidDomain { .. })
        ));
        assert!(matches!(
            parse_domains("example.com,EXAMPLE.com"),
            Err(ConfigError::InvalidDomain { reason, .. }) if reason == "duplicate domain"
        ));
        assert!(matches!(parse_domains(""), Err(ConfigError::NoDomains)));
    }

    #[cfg(unix)]
    #[test]
    fn test_split_doc_roots() {
        assert_eq!(
            split_doc_roots("/var/www/a/:/var/www/b\\"),
            vec![PathBuf::from("/var/www/a"), PathBuf::from("/var/www/b")]
        );
        assert_eq!(split_doc_roots("/"), vec![PathBuf::from("/")]);
    }

    #[test]
    fn test_assign_doc_roots_pads_with_last() {
        let roots = assign_doc_roots(3, vec![PathBuf::from("/a"), PathBuf::from("/b")]).unwrap();
        assert_eq!(
            roots,
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn test_assign_doc_roots_errors() {
        assert!(matches!(
            assign_doc_roots(1, vec![PathBuf::from("/a"), PathBuf::from("/b")]),
            Err(ConfigError::TooManyDocRoots { roots: 2, domains: 1 })
        ));
        assert!(matches!(assign_doc_roots(2, vec![]), Err(ConfigError::NoDocRoots)));
    }

    #[cfg(unix)]
    #[test]
    fn test_join_round_trip() {
        let roots = vec![PathBuf::from("/var/www/a"), PathBuf::from("/var/www/b")];
        let joined = join_doc_roots(&roots).unwrap();
        assert_eq!(joined, "/var/www/a:/var/www/b");
        assert_eq!(split_doc_roots(&joined), roots);
    }
}
