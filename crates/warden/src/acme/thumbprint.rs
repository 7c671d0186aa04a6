//! Key authorization for HTTP-01 challenges
//!
//! The proof served for a challenge is `token || "." || thumbprint`, where
//! the thumbprint is the base64url SHA-256 of the account key's JWK in its
//! canonical form (RFC 7638). Account keys are ECDSA P-256.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rcgen::KeyPair;
use sha2::{Digest, Sha256};

use warden_common::ChallengeToken;

use super::error::AcmeError;

/// Compute the JWK thumbprint of a PKCS#8 PEM account key
pub fn jwk_thumbprint(account_key_pem: &str) -> Result<String, AcmeError> {
    let key = KeyPair::from_pem(account_key_pem)
        .map_err(|e| AcmeError::UnsupportedAccountKey(e.to_string()))?;

    if key.algorithm() != &rcgen::PKCS_ECDSA_P256_SHA256 {
        return Err(AcmeError::UnsupportedAccountKey(
            "account key must be ECDSA P-256".to_string(),
        ));
    }

    // Uncompressed point: 0x04 || X || Y
    let point = key.public_key_raw();
    if point.len() != 65 || point[0] != 0x04 {
        return Err(AcmeError::UnsupportedAccountKey(format!(
            "unexpected public key encoding ({} bytes)",
            point.len()
        )));
    }

    let jwk = format!(
        r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
        URL_SAFE_NO_PAD.encode(&point[1..33]),
        URL_SAFE_NO_PAD.encode(&point[33..65]),
    );

    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(jwk.as_bytes())))
}

/// Build the key authorization served for `token`
pub fn key_authorization(token: &ChallengeToken, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}
