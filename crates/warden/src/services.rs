//! Collaborators shared by every command

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use warden_config::{resolve_server, server_key_name};

use crate::acme::{AcmeService, InstantAcmeService};
use crate::commands::CommandError;
use crate::dns::{HickoryResolver, Resolve};
use crate::issuance::{HttpProofVerifier, IssuanceOrchestrator, ProofVerifier};
use crate::stores::StorageLayout;

/// Timeout for fetching a proof during self-verification
pub const SELF_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a command needs to talk to one ACME server
#[derive(Clone)]
pub struct Services {
    /// Resolved directory URL
    pub server: String,
    pub layout: StorageLayout,
    pub acme: Arc<dyn AcmeService>,
    pub resolver: Arc<dyn Resolve>,
    pub verifier: Arc<dyn ProofVerifier>,
}

impl Services {
    /// Services backed by the network and the system resolver
    pub fn system(server: &str, storage: impl Into<PathBuf>) -> Result<Self, CommandError> {
        let server = resolve_server(server)?;
        let layout = layout_for(&server, storage);
        debug!(
            server = %server,
            server_id = %layout.server_id(),
            storage = %layout.root().display(),
            "Using ACME server"
        );

        Ok(Self {
            acme: Arc::new(InstantAcmeService::new(server.clone())),
            resolver: Arc::new(HickoryResolver::from_system_conf()?),
            verifier: Arc::new(HttpProofVerifier::new(SELF_VERIFY_TIMEOUT)?),
            server,
            layout,
        })
    }

    /// An orchestrator authorizing up to `concurrency` domains at once
    pub fn orchestrator(&self, concurrency: usize) -> IssuanceOrchestrator {
        IssuanceOrchestrator::new(
            self.acme.clone(),
            self.resolver.clone(),
            self.verifier.clone(),
            self.layout.clone(),
            concurrency,
        )
    }
}

/// Storage layout for an already resolved directory URL
pub fn layout_for(server: &str, storage: impl Into<PathBuf>) -> StorageLayout {
    StorageLayout::new(storage, server_key_name(server))
}
