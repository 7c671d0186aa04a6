//! Per-domain authorization state
//!
//! ```text
//! Pending -> ProofProvisioned -> SelfVerified -> Submitted -> Authorized
//!    \              \                  \              \
//!     +--------------+------------------+--------------+--> Failed
//! ```
//!
//! `Pending` may also jump straight to `Authorized` when the CA reports the
//! authorization as already valid.

use std::fmt;
use std::path::PathBuf;

use tracing::trace;

use warden_common::DnsName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    ProofProvisioned,
    SelfVerified,
    Submitted,
    Authorized,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Authorized | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, ProofProvisioned) | (Pending, Authorized) => true,
            (ProofProvisioned, SelfVerified) => true,
            (SelfVerified, Submitted) => true,
            (Submitted, Authorized) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::ProofProvisioned => "proof-provisioned",
            Self::SelfVerified => "self-verified",
            Self::Submitted => "submitted",
            Self::Authorized => "authorized",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One domain's walk through the challenge flow
#[derive(Debug, Clone)]
pub struct AuthorizationTask {
    pub domain: DnsName,
    pub doc_root: PathBuf,
    pub token: Option<String>,
    pub payload: Option<String>,
    state: TaskState,
}

impl AuthorizationTask {
    pub fn new(domain: DnsName, doc_root: PathBuf) -> Self {
        Self {
            domain,
            doc_root,
            token: None,
            payload: None,
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next`; illegal transitions are ignored and return `false`
    pub fn advance(&mut self, next: TaskState) -> bool {
        if !self.state.can_advance_to(next) {
            trace!(
                domain = %self.domain,
                from = %self.state,
                to = %next,
                "Ignoring illegal authorization transition"
            );
            return false;
        }
        trace!(domain = %self.domain, from = %self.state, to = %next, "Authorization transition");
        self.state = next;
        true
    }

    /// Mark the task failed unless it already finished
    pub fn fail(&mut self) {
        self.advance(TaskState::Failed);
    }
}
