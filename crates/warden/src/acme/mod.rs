//! ACME certificate authority access
//!
//! # Architecture
//!
//! - [`AcmeService`] - the operations the orchestrator needs from a CA,
//!   addressed by opaque URLs
//! - [`InstantAcmeService`] - implementation on top of `instant-acme`
//! - [`jwk_thumbprint`] / [`key_authorization`] - HTTP-01 proof payloads
//!
//! # Challenge Flow
//!
//! 1. `new_order` returns one authorization URL per domain
//! 2. `get_authorization` lists the offered challenges; the first `http-01`
//!    one is used
//! 3. the proof is written under the domain's document root and checked
//! 4. `finalize_challenge` asks the CA to validate, `poll_for_authorization`
//!    waits for the verdict
//! 5. once every domain is authorized the order is finalized with a CSR and
//!    the chain is downloaded

mod client;
mod error;
mod service;
mod thumbprint;

pub use client::{InstantAcmeService, PollPolicy};
pub use error::AcmeError;
pub use service::{
    split_pem_chain, AcmeService, Authorization, AuthorizationRef, AuthorizationStatus,
    Challenge, Order, Registration, HTTP_01,
};
pub use thumbprint::{jwk_thumbprint, key_authorization};
