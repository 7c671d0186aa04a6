//! ACME server resolution and identity naming.

use url::Url;

use crate::error::ConfigError;

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Resolve a server alias or URL to an HTTPS directory URL.
///
/// - `letsencrypt` and `letsencrypt:production` map to the production directory
/// - `letsencrypt:staging` maps to the staging directory
/// - a bare `host/path` gets an `https://` prefix
/// - any scheme other than `https` is rejected
pub fn resolve_server(server: &str) -> Result<String, ConfigError> {
    let server = server.trim();

    let resolved = match server {
        "letsencrypt" | "letsencrypt:production" => LETSENCRYPT_PRODUCTION.to_string(),
        "letsencrypt:staging" => LETSENCRYPT_STAGING.to_string(),
        _ => match server.split_once("://") {
            Some(("https", _)) => server.to_string(),
            Some((scheme, _)) => {
                return Err(ConfigError::InvalidServer {
                    server: server.to_string(),
                    reason: format!("unsupported protocol '{}', only https is supported", scheme),
                })
            }
            None => format!("https://{}", server),
        },
    };

    let url = Url::parse(&resolved).map_err(|e| ConfigError::InvalidServer {
        server: server.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidServer {
            server: server.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(resolved)
}

/// Turn a directory URL into a filesystem-safe identity.
///
/// Used for `accounts/{name}.pem` and `certs/{name}/`. The scheme is
/// dropped, `/` becomes `.`, anything outside `[a-z0-9._-]` is removed and
/// runs of dots are collapsed.
pub fn server_key_name(server: &str) -> String {
    let without_scheme = server
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(server);

    let mut name = String::with_capacity(without_scheme.len());
    for c in without_scheme.to_ascii_lowercase().chars() {
        let c = if c == '/' { '.' } else { c };
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')) {
            continue;
        }
        if c == '.' && name.ends_with('.') {
            continue;
        }
        name.push(c);
    }

    name.trim_matches('.').to_string()
}
