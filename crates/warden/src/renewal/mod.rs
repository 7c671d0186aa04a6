//! Auto-renewal
//!
//! [`AutoRenewalSupervisor`] keeps every configured certificate fresh:
//!
//! 1. `setup` once; failing here ends the run with [`EXIT_SETUP_ERROR`]
//! 2. per certificate, bounded by the configured concurrency: `check`, then
//!    `issue` if the check asks for renewal
//! 3. one line per renewed and per failed certificate, and an exit code
//!    summarising the run
//!
//! The steps run through a [`RenewalRunner`]: [`ProcessRunner`] isolates each
//! certificate in a child process, [`InProcessRunner`] runs them on the
//! current runtime.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use warden_common::BoundedConcurrentMap;

use crate::issuance::CertificateRequest;

mod check;
mod in_process;
mod process;
mod runner;

pub use check::{
    check_certificate, CertificateCheck, CheckStatus, DEFAULT_TTL_DAYS, EXIT_CHECK_RENEW,
    EXIT_CHECK_VALID, EXIT_COMMAND_ERROR,
};
pub use in_process::InProcessRunner;
pub use process::ProcessRunner;
pub use runner::{RenewalRunner, RunnerError};

/// Nothing needed renewal
pub const EXIT_NO_CHANGE: i32 = 0;
/// The configuration could not be loaded
pub const EXIT_CONFIG_ERROR: i32 = 1;
/// Account setup failed; no certificate was attempted
pub const EXIT_SETUP_ERROR: i32 = 2;
/// Every renewal attempt failed
pub const EXIT_ISSUANCE_ERROR: i32 = 3;
/// Some certificates were renewed, some failed
pub const EXIT_ISSUANCE_PARTIAL: i32 = 4;
/// Every needed renewal succeeded
pub const EXIT_ISSUANCE_OK: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    NoChange,
    Renewed,
    Failed(String),
}

/// One configured certificate and what happened to it
#[derive(Debug, Clone)]
pub struct RenewalJob {
    pub request: CertificateRequest,
    pub outcome: RenewalOutcome,
}

impl RenewalJob {
    fn domains(&self) -> String {
        self.request
            .domains
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of an auto-renewal run, in configuration order
#[derive(Debug, Clone)]
pub struct RenewalReport {
    pub jobs: Vec<RenewalJob>,
}

impl RenewalReport {
    pub fn renewed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Renewed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Failed(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::NoChange))
    }

    fn count(&self, f: impl Fn(&RenewalOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|j| f(&j.outcome)).count()
    }

    pub fn exit_code(&self) -> i32 {
        match (self.renewed(), self.failed()) {
            (0, 0) => EXIT_NO_CHANGE,
            (0, _) => EXIT_ISSUANCE_ERROR,
            (_, 0) => EXIT_ISSUANCE_OK,
            _ => EXIT_ISSUANCE_PARTIAL,
        }
    }

    /// Human-readable lines; renewals first, then failures
    pub fn lines(&self) -> Vec<String> {
        let renewed = self
            .jobs
            .iter()
            .filter(|j| j.outcome == RenewalOutcome::Renewed)
            .map(|j| format!("Certificate for {} successfully renewed.", j.domains()));
        let failed = self.jobs.iter().filter_map(|j| match &j.outcome {
            RenewalOutcome::Failed(reason) => Some(format!(
                "Issuance for {} failed: {}",
                j.domains(),
                reason
            )),
            _ => None,
        });
        renewed.chain(failed).collect()
    }
}

impl fmt::Display for RenewalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Checks and renews many certificates concurrently
pub struct AutoRenewalSupervisor {
    runner: Arc<dyn RenewalRunner>,
    batch: BoundedConcurrentMap,
}

impl AutoRenewalSupervisor {
    pub fn new(runner: Arc<dyn RenewalRunner>, concurrency: usize) -> Self {
        Self {
            runner,
            batch: BoundedConcurrentMap::new(concurrency),
        }
    }

    /// Set up the account for `email`, then check and renew every request
    ///
    /// Only a setup failure is returned as an error; per-certificate
    /// failures end up in the report.
    pub async fn run(
        &self,
        email: &str,
        requests: Vec<CertificateRequest>,
    ) -> Result<RenewalReport, RunnerError> {
        self.runner.setup(email).await.map_err(|e| {
            warn!(error = %e, "Account setup failed");
            e
        })?;

        info!(
            certificates = requests.len(),
            concurrency = self.batch.limit(),
            "Checking certificates"
        );

        let runner = &self.runner;
        let outcome = self
            .batch
            .run(&requests, |_, request| async move {
                renew(runner.as_ref(), request).await
            })
            .await;
        let (mut successes, mut errors) = outcome.into_parts();

        let jobs = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let outcome = match (successes.remove(&index), errors.remove(&index)) {
                    (Some(outcome), _) => outcome,
                    (None, Some(error)) => RenewalOutcome::Failed(error.to_string()),
                    (None, None) => RenewalOutcome::Failed("task did not report".to_string()),
                };
                RenewalJob { request, outcome }
            })
            .collect();

        let report = RenewalReport { jobs };
        info!(
            renewed = report.renewed(),
            unchanged = report.unchanged(),
            failed = report.failed(),
            "Auto-renewal finished"
        );
        Ok(report)
    }
}

async fn renew(
    runner: &dyn RenewalRunner,
    request: &CertificateRequest,
) -> Result<RenewalOutcome, RunnerError> {
    let common_name = request.common_name();
    match runner.check(request).await? {
        CheckStatus::Valid => {
            info!(common_name = %common_name, "Certificate still valid");
            Ok(RenewalOutcome::NoChange)
        }
        CheckStatus::NeedsRenewal => {
            info!(common_name = %common_name, "Renewing certificate");
            match runner.issue(request).await {
                Ok(()) => Ok(RenewalOutcome::Renewed),
                Err(e) => {
                    warn!(common_name = %common_name, error = %e, "Renewal failed");
                    Err(e)
                }
            }
        }
    }
}
