//! Runs each step inside the current process

use async_trait::async_trait;
use chrono::Utc;

use crate::commands::setup;
use crate::issuance::CertificateRequest;
use crate::services::Services;

use super::{check_certificate, CheckStatus, RenewalRunner, RunnerError, DEFAULT_TTL_DAYS};

/// [`RenewalRunner`] sharing one set of [`Services`]
pub struct InProcessRunner {
    services: Services,
    concurrency: usize,
    ttl_days: u32,
}

impl InProcessRunner {
    /// `concurrency` bounds the domains authorized at once per certificate
    pub fn new(services: Services, concurrency: usize) -> Self {
        Self {
            services,
            concurrency,
            ttl_days: DEFAULT_TTL_DAYS,
        }
    }

    pub fn with_ttl_days(mut self, ttl_days: u32) -> Self {
        self.ttl_days = ttl_days;
        self
    }
}

#[async_trait]
impl RenewalRunner for InProcessRunner {
    async fn setup(&self, email: &str) -> Result<(), RunnerError> {
        setup::run(&self.services, email)
            .await
            .map(|_| ())
            .map_err(|e| RunnerError::Setup(e.to_string()))
    }

    async fn check(&self, request: &CertificateRequest) -> Result<CheckStatus, RunnerError> {
        let check = check_certificate(
            &self.services.layout.certificate_store(),
            request.common_name().as_str(),
            &request.domain_strings(),
            self.ttl_days,
            Utc::now(),
        )
        .await?;
        Ok(check.status)
    }

    async fn issue(&self, request: &CertificateRequest) -> Result<(), RunnerError> {
        self.services
            .orchestrator(self.concurrency)
            .issue(request)
            .await?;
        Ok(())
    }
}
