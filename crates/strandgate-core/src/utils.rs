//! Utility functions

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derive a stable connection identity from the two transport endpoints.
///
/// The result is a fixed-width (64 character) lowercase hex string. It only
/// depends on the endpoint strings, so it is stable for the lifetime of one
/// TCP connection.
pub fn connection_fingerprint(local: &str, remote: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(local.as_bytes());
    hasher.update(remote.as_bytes());
    hex::encode(hasher.finalize())
}
