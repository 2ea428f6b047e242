//! C5 — Signature Verifier.
//!
//! EIP-191 `personal_sign` only. The pre-image is
//! `"\x19Ethereum Signed Message:\n" + len(message) + message"`, Keccak-256.
//! EIP-712 is an optional future extension and MUST NOT be wired in here.

use alloy::primitives::Signature;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureVerifyError {
    #[error("signature must be 65 bytes (r||s||v) hex: {0}")]
    Malformed(String),
}

/// Recovers the signer address from an EIP-191 personal-sign signature over
/// `message` and compares it (case-insensitively) to `expected_address`.
pub fn verify(message: &str, signature_hex: &str, expected_address: &str) -> Result<bool, SignatureVerifyError> {
    let recovered = recover(message, signature_hex)?;
    Ok(crate::codec::validate::addresses_eq(&recovered, expected_address))
}

/// Recovers the checksum-agnostic lower-cased signer address, or an error if
/// the signature bytes are malformed. A recoverable-but-wrong-signer
/// signature is not an error: it simply won't match in [`verify`].
pub fn recover(message: &str, signature_hex: &str) -> Result<String, SignatureVerifyError> {
    let hex = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let bytes = hex::decode(hex).map_err(|e| SignatureVerifyError::Malformed(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(SignatureVerifyError::Malformed(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }
    let signature = Signature::try_from(bytes.as_slice())
        .map_err(|e| SignatureVerifyError::Malformed(e.to_string()))?;
    let address = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| SignatureVerifyError::Malformed(e.to_string()))?;
    Ok(format!("{address:#x}"))
}

/// Builds the mandatory canonical signed-message form (spec §6).
pub fn canonical_message(order_id: &str, tx_hash: &str, timestamp_iso8601: &str) -> String {
    format!("Order: {order_id} | Payment: {tx_hash} | Timestamp: {timestamp_iso8601}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::Signer;
    use alloy::signers::local::PrivateKeySigner;

    #[tokio::test]
    async fn recovers_signer_of_personal_sign_message() {
        let signer = PrivateKeySigner::random();
        let address = format!("{:#x}", signer.address());
        let message = canonical_message("ivxp-abc", "0xdead", "2026-07-28T00:00:00Z");
        let signature = signer.sign_message(message.as_bytes()).await.unwrap();
        let signature_hex = format!("0x{}", hex::encode(signature.as_bytes()));

        assert!(verify(&message, &signature_hex, &address).unwrap());
    }

    #[tokio::test]
    async fn rejects_wrong_signer() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let message = canonical_message("ivxp-abc", "0xdead", "2026-07-28T00:00:00Z");
        let signature = signer.sign_message(message.as_bytes()).await.unwrap();
        let signature_hex = format!("0x{}", hex::encode(signature.as_bytes()));

        let other_address = format!("{:#x}", other.address());
        assert!(!verify(&message, &signature_hex, &other_address).unwrap());
    }

    #[test]
    fn canonical_message_contains_order_id_substring() {
        let msg = canonical_message("ivxp-1234", "0xabc", "2026-01-01T00:00:00Z");
        assert!(msg.contains("ivxp-1234"));
    }
}
