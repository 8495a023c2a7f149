//! Webhook signature verification
//!
//! Verifies the `algorithm=hexdigest` signature header a hosting provider
//! attaches to push notifications, using HMAC under a per-repository shared
//! secret. The digest comparison is constant-time; a mismatch must not leak
//! where the digests diverge.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Why a signature header failed verification.
///
/// The variants exist for diagnostics: callers log the reason, then treat all
/// of them uniformly as "not authenticated".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The request carried no signature header at all
    #[error("signature header is missing")]
    MissingHeader,

    /// The header is not of the form `algorithm=hexdigest`
    #[error("signature header is malformed")]
    Malformed,

    /// The named hash algorithm is not supported
    #[error("hash algorithm '{0}' is not supported")]
    UnsupportedAlgorithm(String),

    /// The digest does not match the request body
    #[error("signature does not match the request body")]
    Mismatch,
}

/// Verify a signature header against the raw request body.
///
/// `header` is the raw value of the signature header, if present. Supported
/// algorithms are `sha1`, `sha256`, and `sha512`.
pub fn verify(secret: &[u8], body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let (algorithm, digest) = header.split_once('=').ok_or(SignatureError::Malformed)?;
    let provided = hex::decode(digest).map_err(|_| SignatureError::Malformed)?;

    let computed = compute(algorithm, secret, body)?;

    // Length mismatch and byte mismatch both collapse into a single
    // constant-time verdict.
    if bool::from(computed.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Compute the HMAC of `body` under `secret` for a named algorithm.
pub fn compute(algorithm: &str, secret: &[u8], body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    match algorithm {
        "sha1" => Ok(mac_bytes::<Hmac<Sha1>>(secret, body)),
        "sha256" => Ok(mac_bytes::<Hmac<Sha256>>(secret, body)),
        "sha512" => Ok(mac_bytes::<Hmac<Sha512>>(secret, body)),
        other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn mac_bytes<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Vec<u8> {
    let mut mac = <M as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}
