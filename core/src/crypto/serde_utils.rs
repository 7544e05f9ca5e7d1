//! Base64 serde adapters for binary fields in JSON messages and state files

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};

/// `Vec<u8>` as a base64 string.
///
/// ```ignore
/// #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
/// pub pake: Vec<u8>,
/// ```
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Fixed-size `[u8; N]` as a base64 string. Used for nonces, keys and digests.
///
/// ```ignore
/// #[serde(with = "crate::crypto::serde_utils::base64_array")]
/// pub nonce: [u8; 12],
/// ```
pub mod base64_array {
    use super::*;

    pub fn serialize<S, const N: usize>(data: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let bytes = BASE64.decode(&s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!("invalid length: expected {} bytes, got {}", N, len))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frame {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(with = "base64_array")]
        nonce: [u8; 12],
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Key {
        #[serde(with = "base64_array")]
        key: [u8; 32],
    }

    #[test]
    fn test_fields_are_base64_strings() {
        let frame = Frame {
            data: vec![1, 2, 3],
            nonce: [7u8; 12],
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["data"], "AQID");
        assert!(json["nonce"].is_string());

        let decoded: Frame = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_wrong_array_length_rejected() {
        let json = format!(r#"{{"key":"{}"}}"#, BASE64.encode([0u8; 12]));
        let err = serde_json::from_str::<Key>(&json).unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(serde_json::from_str::<Key>(r#"{"key":"%%%"}"#).is_err());
    }
}
