//! Hex encoding for byte fields that cross the JSON boundary
//!
//! Keys, hashes and signatures travel as lowercase hex strings. An optional
//! `0x` prefix is accepted on input.

use serde::{Deserialize, Deserializer, Serializer};

use crate::error::{AuctionError, Result};

/// Decode a hex string, tolerating a `0x` prefix and upper-case digits.
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed).to_lowercase();
    hex::decode(&digits).map_err(|e| AuctionError::Validation(format!("invalid hex: {}", e)))
}

/// `#[serde(with = "hex_bytes")]` for `Vec<u8>` fields.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex(&s).map_err(serde::de::Error::custom)
    }
}
