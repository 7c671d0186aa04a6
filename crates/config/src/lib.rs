//! Configuration for the warden certificate orchestrator.
//!
//! - [`auto`]: the YAML file driving the `auto` command
//! - [`server`]: ACME server aliases and filesystem-safe server identities
//! - [`lists`]: domain and document root lists from the command line
//! - [`validate`]: error accumulation used while validating

pub mod auto;
pub mod error;
pub mod lists;
pub mod server;
pub mod validate;

pub use auto::{
    find_config_path, is_valid_email, AutoConfig, CertificateEntry, ConfigOverrides,
    DEFAULT_CONCURRENCY, DEFAULT_KEY_BITS, MAX_KEY_BITS, MIN_KEY_BITS,
};
pub use error::ConfigError;
pub use lists::{
    assign_doc_roots, join_doc_roots, join_domains, normalize_doc_root, parse_domains,
    split_doc_roots, split_domains,
};
pub use server::{resolve_server, server_key_name, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
