//! C7 — Delivery Channels.
//!
//! Three cooperating pieces of the delivery/store-and-forward subsystem:
//! an SSE subscriber with exhaustion-to-poll fallback ([`sse`]), a
//! standalone exponential-backoff poller ([`poll`]), and a push-callback
//! HTTP receiver with a content-hash gate ([`callback`]).

pub mod callback;
pub mod poll;
pub mod sse;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `bytes`, used everywhere a deliverable's
/// `content_hash` needs computing or checking (I4, P3).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
