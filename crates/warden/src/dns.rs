//! DNS preflight
//!
//! Every domain of a certificate must resolve before any challenge work
//! starts. Lookups run concurrently through [`BoundedConcurrentMap`]; all
//! failures are gathered into one error.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::{debug, info, warn};

use warden_common::{BoundedConcurrentMap, DnsName};

/// Default number of concurrent lookups
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 10;

/// DNS errors
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Failed to create DNS resolver: {0}")]
    ResolverInit(String),

    #[error("Lookup for {domain} failed: {reason}")]
    Lookup { domain: String, reason: String },

    #[error("{domain} resolved to no addresses")]
    NoAddresses { domain: String },

    #[error("Domains could not be resolved:\n{}", format_failures(.failures))]
    Unresolvable { failures: Vec<(String, String)> },
}

pub(crate) fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(domain, reason)| format!("  - {}: {}", domain, reason))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Name resolution used by the preflight and the contact check
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve IPv4 and IPv6 addresses for `name`
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, DnsError>;

    /// Whether `name` has at least one MX record
    async fn has_mx(&self, name: &str) -> Result<bool, DnsError>;
}

/// [`Resolve`] backed by the system resolver configuration
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Build a resolver from `/etc/resolv.conf`, ignoring `/etc/hosts`
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let (config, opts) =
            read_system_conf().map_err(|e| DnsError::ResolverInit(e.to_string()))?;
        let resolver = TokioAsyncResolver::tokio(config, public_only(opts));
        Ok(Self { resolver })
    }
}

/// Options resolving through DNS only, so local host entries cannot stand in
/// for public records
fn public_only(mut opts: ResolverOpts) -> ResolverOpts {
    opts.use_hosts_file = false;
    opts
}

#[async_trait]
impl Resolve for HickoryResolver {
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| DnsError::Lookup {
                domain: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(lookup.iter().collect())
    }

    async fn has_mx(&self, name: &str) -> Result<bool, DnsError> {
        match self.resolver.mx_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().next().is_some()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(false),
                _ => Err(DnsError::Lookup {
                    domain: name.to_string(),
                    reason: e.to_string(),
                }),
            },
        }
    }
}

/// Checks that every domain resolves before challenges are attempted
pub struct DnsPreflight {
    resolver: Arc<dyn Resolve>,
    batch: BoundedConcurrentMap,
}

impl DnsPreflight {
    pub fn new(resolver: Arc<dyn Resolve>, concurrency: usize) -> Self {
        Self {
            resolver,
            batch: BoundedConcurrentMap::new(concurrency),
        }
    }

    /// Resolve every domain; fail with all unresolvable domains listed
    pub async fn check(&self, domains: &[DnsName]) -> Result<(), DnsError> {
        debug!(domains = domains.len(), "Running DNS preflight");

        let resolver = &self.resolver;
        let outcome = self
            .batch
            .run(domains, |_, domain| async move {
                let addresses = resolver.lookup_ip(domain.as_str()).await?;
                if addresses.is_empty() {
                    return Err(DnsError::NoAddresses {
                        domain: domain.to_string(),
                    });
                }
                debug!(domain = %domain, addresses = addresses.len(), "Domain resolves");
                Ok::<_, DnsError>(addresses)
            })
            .await;

        if outcome.all_succeeded() {
            info!(domains = domains.len(), "All domains resolve");
            return Ok(());
        }

        let failures: Vec<(String, String)> = outcome
            .errors
            .into_iter()
            .map(|(index, error)| {
                let reason = match error {
                    DnsError::Lookup { reason, .. } => reason,
                    other => other.to_string(),
                };
                (domains[index].to_string(), reason)
            })
            .collect();

        for (domain, reason) in &failures {
            warn!(domain = %domain, reason = %reason, "Domain does not resolve");
        }

        Err(DnsError::Unresolvable { failures })
    }
}
