//! `auto`: keep every configured certificate fresh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use warden_config::{find_config_path, AutoConfig, ConfigError, ConfigOverrides, DEFAULT_CONCURRENCY};

use crate::issuance::CertificateRequest;
use crate::renewal::{
    AutoRenewalSupervisor, InProcessRunner, ProcessRunner, RenewalReport, RenewalRunner,
    EXIT_CONFIG_ERROR, EXIT_SETUP_ERROR,
};
use crate::services::Services;

/// `auto` arguments
#[derive(Debug, Clone, Default)]
pub struct AutoArgs {
    pub config: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    /// Run issuance on the current runtime instead of in child processes
    pub in_process: bool,
    /// Per-child timeout
    pub timeout: Option<Duration>,
    pub ttl_days: u32,
    pub verbose: bool,
}

/// What an `auto` run produced
#[derive(Debug)]
pub struct AutoRun {
    pub exit_code: i32,
    /// Present once setup succeeded
    pub report: Option<RenewalReport>,
    /// Why the run stopped before renewing anything
    pub error: Option<String>,
}

impl AutoRun {
    fn stopped(exit_code: i32, error: impl ToString) -> Self {
        let error = error.to_string();
        error!(exit_code = exit_code, error = %error, "Auto-renewal stopped");
        Self {
            exit_code,
            report: None,
            error: Some(error),
        }
    }
}

/// Load the configuration and renew what needs renewing
pub async fn run(args: &AutoArgs) -> AutoRun {
    let config = match load(args) {
        Ok(config) => config,
        Err(e) => return AutoRun::stopped(EXIT_CONFIG_ERROR, e),
    };

    let runner: Arc<dyn RenewalRunner> = if args.in_process {
        match Services::system(&config.server, &config.storage) {
            Ok(services) => Arc::new(
                InProcessRunner::new(services, DEFAULT_CONCURRENCY).with_ttl_days(args.ttl_days),
            ),
            Err(e) => return AutoRun::stopped(EXIT_SETUP_ERROR, e),
        }
    } else {
        match ProcessRunner::current_exe(&config.server, &config.storage) {
            Ok(runner) => Arc::new(
                runner
                    .with_timeout(args.timeout)
                    .with_ttl_days(args.ttl_days)
                    .with_verbose(args.verbose),
            ),
            Err(e) => return AutoRun::stopped(EXIT_SETUP_ERROR, e),
        }
    };

    run_with(&config, runner).await
}

/// Renew everything in `config` through `runner`
pub async fn run_with(config: &AutoConfig, runner: Arc<dyn RenewalRunner>) -> AutoRun {
    let requests = match requests(config) {
        Ok(requests) => requests,
        Err(e) => return AutoRun::stopped(EXIT_CONFIG_ERROR, e),
    };

    let supervisor = AutoRenewalSupervisor::new(runner, config.concurrency);
    match supervisor.run(&config.email, requests).await {
        Ok(report) => AutoRun {
            exit_code: report.exit_code(),
            report: Some(report),
            error: None,
        },
        Err(e) => AutoRun::stopped(EXIT_SETUP_ERROR, e),
    }
}

fn load(args: &AutoArgs) -> Result<AutoConfig, ConfigError> {
    let path = find_config_path(args.config.as_deref())?;
    AutoConfig::from_file(&path, &args.overrides)
}

fn requests(config: &AutoConfig) -> Result<Vec<CertificateRequest>, ConfigError> {
    config
        .certificates
        .iter()
        .map(CertificateRequest::from_entry)
        .collect()
}
