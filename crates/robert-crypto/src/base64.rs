use base64ct::{Base64, Encoding};

/// Standard (padded) base64 encode.
pub fn base64_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Standard (padded) base64 decode.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, crate::CryptoError> {
    Base64::decode_vec(s).map_err(|e| crate::CryptoError::Base64Decode(e.to_string()))
}

/// Serde adapter that writes byte vectors as standard base64 strings.
///
/// Use with `#[serde(with = "robert_crypto::base64::serde_bytes_b64")]`.
pub mod serde_bytes_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }
}
