//! Units of work run by the supervisor

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use warden_config::ConfigError;

use crate::issuance::{CertificateRequest, IssuanceError};
use crate::stores::CertificateStoreError;

use super::CheckStatus;

/// Failure of one setup, check or issue run
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// Reason reported by the child on stderr
    #[error("{reason}")]
    Exit {
        command: String,
        code: Option<i32>,
        reason: String,
    },

    #[error("Account setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Check(#[from] CertificateStoreError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

/// Runs the setup, check and issue steps of auto-renewal
#[async_trait]
pub trait RenewalRunner: Send + Sync {
    /// Make sure an account is registered for `email`
    async fn setup(&self, email: &str) -> Result<(), RunnerError>;

    /// Decide whether the certificate for `request` must be renewed
    async fn check(&self, request: &CertificateRequest) -> Result<CheckStatus, RunnerError>;

    /// Obtain a new certificate for `request`
    async fn issue(&self, request: &CertificateRequest) -> Result<(), RunnerError>;
}
