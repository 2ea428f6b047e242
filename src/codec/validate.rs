//! Field-shape validators shared by the codec and the component contracts
//! that consume decoded messages. Grounded on the teacher crate's
//! regex + `once_cell::sync::Lazy` hex-validator idiom (`EvmAddress`,
//! `TransactionHash`, `HexEncodedNonce`).

use once_cell::sync::Lazy;
use regex::Regex;

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));
static TX_HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("valid regex"));
static CONTENT_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(sha256:)?[0-9a-fA-F]{64}$").expect("valid regex"));
static ORDER_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ivxp-[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("valid regex")
});

pub fn is_address(s: &str) -> bool {
    ADDRESS_RE.is_match(s)
}

pub fn is_tx_hash(s: &str) -> bool {
    TX_HASH_RE.is_match(s)
}

pub fn is_content_hash(s: &str) -> bool {
    CONTENT_HASH_RE.is_match(s)
}

pub fn is_order_id(s: &str) -> bool {
    ORDER_ID_RE.is_match(s)
}

/// Case-insensitive address comparison (spec §3, §4.4: "checksum-agnostic").
pub fn addresses_eq(a: &str, b: &str) -> bool {
    a.to_ascii_lowercase() == b.to_ascii_lowercase()
}

/// Strips an optional `sha256:` prefix from a content hash.
pub fn strip_hash_prefix(s: &str) -> &str {
    s.strip_prefix("sha256:").unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_addresses() {
        assert!(is_address("0x000000000000000000000000000000000000dEaD"));
        assert!(!is_address("0xdead"));
        assert!(!is_address("dead"));
    }

    #[test]
    fn validates_order_ids() {
        assert!(is_order_id("ivxp-3fa85f64-5717-4562-b3fc-2c963f66afa6"));
        assert!(!is_order_id("ivxp-not-a-uuid"));
    }

    #[test]
    fn address_comparison_is_case_insensitive() {
        assert!(addresses_eq(
            "0xAbCdEf0000000000000000000000000000000000",
            "0xabcdef0000000000000000000000000000000000"
        ));
    }

    #[test]
    fn strips_sha256_prefix() {
        assert_eq!(strip_hash_prefix("sha256:abcd"), "abcd");
        assert_eq!(strip_hash_prefix("abcd"), "abcd");
    }
}
