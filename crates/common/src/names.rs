//! Validated name newtypes.
//!
//! Domain names end up as filesystem path segments (certificate directories)
//! and challenge tokens end up as file names under a web root, so both are
//! validated once at construction and carried around as distinct types.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of a full DNS name (without trailing dot)
pub const MAX_NAME_LENGTH: usize = 253;

/// Maximum length of a single DNS label
pub const MAX_LABEL_LENGTH: usize = 63;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("token pattern is valid"));

/// Why a name or token was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,

    #[error("name is {length} characters long (max: {MAX_NAME_LENGTH})")]
    TooLong { length: usize },

    #[error("label '{label}' is {length} characters long (max: {MAX_LABEL_LENGTH})")]
    LabelTooLong { label: String, length: usize },

    #[error("name contains an empty label")]
    EmptyLabel,

    #[error("label '{0}' contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacter(String),

    #[error("label '{0}' starts or ends with a hyphen")]
    HyphenEdge(String),

    #[error("top-level label '{0}' is purely numeric")]
    NumericTld(String),

    #[error("token contains characters outside [A-Za-z0-9_-]")]
    InvalidToken,
}

/// A DNS name that is safe to use as a single filesystem path segment.
///
/// Accepts names like `example.com` or `www.example.org`; rejects path
/// separators, wildcards, trailing dots, all-numeric top-level labels and
/// anything longer than the DNS limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DnsName(String);

impl DnsName {
    /// Validate and wrap a name
    pub fn parse(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_dns_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DnsName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DnsName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DnsName> for String {
    fn from(name: DnsName) -> Self {
        name.0
    }
}

/// Check a name against the DNS label grammar.
pub fn validate_dns_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(NameError::TooLong { length: name.len() });
    }

    let mut last_label = "";
    for label in name.split('.') {
        if label.is_empty() {
            return Err(NameError::EmptyLabel);
        }

        if label.len() > MAX_LABEL_LENGTH {
            return Err(NameError::LabelTooLong {
                label: label.to_string(),
                length: label.len(),
            });
        }

        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(NameError::InvalidCharacter(label.to_string()));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(NameError::HyphenEdge(label.to_string()));
        }

        last_label = label;
    }

    if last_label.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NameError::NumericTld(last_label.to_string()));
    }

    Ok(())
}

/// An ACME challenge token that is safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeToken(String);

impl ChallengeToken {
    /// Validate a token received from the CA
    pub fn parse(token: impl Into<String>) -> Result<Self, NameError> {
        let token = token.into();
        if TOKEN_PATTERN.is_match(&token) {
            Ok(Self(token))
        } else {
            Err(NameError::InvalidToken)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
