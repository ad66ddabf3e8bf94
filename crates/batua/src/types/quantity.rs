//! Hex quantity encoding.
//!
//! Ethereum JSON-RPC transports integers as `0x`-prefixed hex strings with no
//! leading zeros (`0x0`, `0x2a`, `0xaa36a7`). [`Quantity`] plugs into
//! `serde_with` so fields can be declared as native integers:
//!
//! ```rust
//! use alloy_primitives::U256;
//! use batua::types::Quantity;
//! use serde::{Deserialize, Serialize};
//! use serde_with::serde_as;
//!
//! #[serde_as]
//! #[derive(Serialize, Deserialize)]
//! struct Tx {
//!     #[serde_as(as = "Quantity")]
//!     chain_id: u64,
//!     #[serde_as(as = "Quantity")]
//!     value: U256,
//! }
//! ```

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serializer, de};
use serde_with::{DeserializeAs, SerializeAs};
use thiserror::Error;

/// Error parsing a hex quantity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseQuantityError {
    #[error("Quantity '{0}' must start with 0x")]
    MissingPrefix(String),

    #[error("Quantity has no digits")]
    Empty,

    #[error("Quantity '{0}' contains a non-hex digit")]
    InvalidDigit(String),

    #[error("Quantity '{0}' does not fit in {1} bits")]
    Overflow(String, u32),
}

fn digits(s: &str) -> Result<&str, ParseQuantityError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| ParseQuantityError::MissingPrefix(s.to_string()))?;
    if digits.is_empty() {
        return Err(ParseQuantityError::Empty);
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseQuantityError::InvalidDigit(s.to_string()));
    }
    Ok(digits)
}

/// Parse a hex quantity into a `u64`.
pub fn parse_u64(s: &str) -> Result<u64, ParseQuantityError> {
    let digits = digits(s)?;
    u64::from_str_radix(digits, 16).map_err(|_| ParseQuantityError::Overflow(s.to_string(), 64))
}

/// Parse a hex quantity into a `U256`.
pub fn parse_u256(s: &str) -> Result<U256, ParseQuantityError> {
    let digits = digits(s)?;
    U256::from_str_radix(digits, 16).map_err(|_| ParseQuantityError::Overflow(s.to_string(), 256))
}

/// Encode a `u64` as a minimal hex quantity.
pub fn encode_u64(value: u64) -> String {
    format!("0x{value:x}")
}

/// Encode a `U256` as a minimal hex quantity.
pub fn encode_u256(value: U256) -> String {
    format!("0x{value:x}")
}

/// `serde_with` adapter for hex quantities.
pub struct Quantity;

impl SerializeAs<u64> for Quantity {
    fn serialize_as<S: Serializer>(source: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_u64(*source))
    }
}

impl<'de> DeserializeAs<'de, u64> for Quantity {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_u64(&s).map_err(de::Error::custom)
    }
}

impl SerializeAs<U256> for Quantity {
    fn serialize_as<S: Serializer>(source: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_u256(*source))
    }
}

impl<'de> DeserializeAs<'de, U256> for Quantity {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_u256(&s).map_err(de::Error::custom)
    }
}
