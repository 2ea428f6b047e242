//! C1 — Wire Codec.
//!
//! Bit-exact serialization/validation of IVXP/1.0 messages. Field naming is
//! snake_case on the wire without exception; every message type carries a
//! `extra` catch-all so unknown extension fields survive a round trip (P7).

pub mod messages;
pub mod validate;

pub use messages::*;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "IVXP/1.0";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("field validation failed: {0}")]
    Validation(String),
}

/// Serializes a typed message into its wire bytes.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserializes wire bytes into a typed message. Unknown fields are kept in
/// the message's `extra` map rather than rejected.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Checks that the bytes are well-formed JSON and parse as `T`, without
/// returning the parsed value. Used by handlers that only need a yes/no
/// answer before routing to richer validation.
pub fn validate<T: DeserializeOwned>(bytes: &[u8]) -> Result<(), CodecError> {
    decode::<T>(bytes).map(|_| ())
}
