//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::validate::ValidationError;

/// Configuration errors
///
/// Every variant is fatal: no certificate work is attempted once the
/// configuration is known to be broken.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file ({path}) not found or unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file ({path}) had an invalid format and couldn't be parsed: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No config file given and none found at: {}", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Invalid configuration:\n{}", format_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error("Invalid server '{server}': {reason}")]
    InvalidServer { server: String, reason: String },

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Specified more document roots ({roots}) than domains ({domains})")]
    TooManyDocRoots { roots: usize, domains: usize },

    #[error("No document root given")]
    NoDocRoots,

    #[error("No domains given")]
    NoDomains,

    #[error("Invalid key size {bits}, must be between {min} and {max} bits")]
    InvalidKeySize { bits: u32, min: u32, max: u32 },

    #[error("Document root can't be passed to a child process: {0}")]
    UnjoinablePath(String),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
