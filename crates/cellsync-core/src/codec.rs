//! Hex codecs for the node's JSON-RPC wire format.
//!
//! Quantities are `0x`-prefixed, minimal-length hex (`"0x0"`, `"0x1a"`),
//! byte strings are `0x`-prefixed hex of even length. The submodules plug
//! into serde via `#[serde(with = "...")]`.

use crate::error::HexError;

/// Encode a quantity as `0x`-prefixed hex.
pub fn encode_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Decode a `0x`-prefixed hex quantity.
pub fn decode_quantity(s: &str) -> Result<u64, HexError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| HexError::MissingPrefix(s.to_string()))?;
    if digits.is_empty() {
        return Err(HexError::InvalidHex(s.to_string()));
    }
    if digits.len() > 16 && digits.trim_start_matches('0').len() > 16 {
        return Err(HexError::Overflow(s.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| HexError::InvalidHex(s.to_string()))
}

/// Encode bytes as `0x`-prefixed hex.
pub fn encode_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode `0x`-prefixed hex bytes.
pub fn decode_bytes(s: &str) -> Result<Vec<u8>, HexError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| HexError::MissingPrefix(s.to_string()))?;
    hex::decode(digits).map_err(|e| HexError::InvalidHex(format!("{s}: {e}")))
}

/// serde adapter for `u64` quantities.
pub mod quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_quantity(&s).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for `u32` quantities.
pub mod quantity_u32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_quantity(u64::from(*value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        let wide = super::decode_quantity(&s).map_err(serde::de::Error::custom)?;
        u32::try_from(wide).map_err(|_| serde::de::Error::custom(format!("u32 overflow: {s}")))
    }
}

/// serde adapter for byte strings.
pub mod bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_bytes(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_bytes(&s).map_err(serde::de::Error::custom)
    }
}

/// serde adapter for lists of byte strings (`outputs_data`, `witnesses`).
pub mod bytes_vec {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for item in value {
            seq.serialize_element(&super::encode_bytes(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| super::decode_bytes(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quantity_is_minimal() {
        assert_eq!(encode_quantity(0), "0x0");
        assert_eq!(encode_quantity(26), "0x1a");
        assert_eq!(encode_quantity(u64::MAX), "0xffffffffffffffff");
    }

    #[test]
    fn decode_quantity_requires_prefix() {
        assert_eq!(
            decode_quantity("1a").unwrap_err(),
            HexError::MissingPrefix("1a".into())
        );
        assert!(matches!(decode_quantity("0x"), Err(HexError::InvalidHex(_))));
        assert!(matches!(decode_quantity("0xzz"), Err(HexError::InvalidHex(_))));
    }

    #[test]
    fn decode_quantity_overflow() {
        assert!(matches!(
            decode_quantity("0x1ffffffffffffffff"),
            Err(HexError::Overflow(_))
        ));
    }

    #[test]
    fn decode_quantity_accepts_leading_zeros() {
        assert_eq!(decode_quantity("0x000000000000000000ff").unwrap(), 255);
    }

    #[test]
    fn bytes_codec() {
        assert_eq!(encode_bytes(&[]), "0x");
        assert_eq!(encode_bytes(&[0xde, 0xad]), "0xdead");
        assert_eq!(decode_bytes("0x").unwrap(), Vec::<u8>::new());
        assert!(decode_bytes("0xabc").is_err());
    }

    proptest! {
        #[test]
        fn quantity_decode_inverts_encode(v in any::<u64>()) {
            prop_assert_eq!(decode_quantity(&encode_quantity(v)).unwrap(), v);
        }
    }
}
