//! Common utilities and types for the warden certificate orchestrator.
//!
//! - [`batch`]: bounded-concurrency fan-out with index-keyed result collection
//! - [`names`]: validated DNS name and challenge token newtypes

pub mod batch;
pub mod names;

pub use batch::{BatchOutcome, BoundedConcurrentMap};
pub use names::{validate_dns_name, ChallengeToken, DnsName, NameError};
