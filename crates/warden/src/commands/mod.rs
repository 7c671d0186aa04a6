//! Command implementations
//!
//! Each command returns a value describing what happened; printing and exit
//! codes are left to the binary.

use thiserror::Error;

use warden_config::ConfigError;

use crate::acme::AcmeError;
use crate::dns::DnsError;
use crate::issuance::{IssuanceError, VerifyError};
use crate::renewal::RunnerError;
use crate::stores::{AccountStoreError, CertificateStoreError};

pub mod auto;
pub mod check;
pub mod issue;
pub mod revoke;
pub mod setup;
pub mod status;

/// Command errors
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Account(#[from] AccountStoreError),

    #[error(transparent)]
    Store(#[from] CertificateStoreError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Invalid contact email '{0}'")]
    InvalidEmail(String),

    #[error("No MX record defined for '{0}'")]
    NoMxRecord(String),

    #[error("Running with --user {requested} only works as root (running as {current})")]
    UserNotAllowed { requested: String, current: String },

    #[error("Failed to determine the current user: {0}")]
    CurrentUser(String),
}
