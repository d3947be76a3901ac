//! HMAC-SHA256 computation and constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::HMAC_SHA256_LENGTH;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: HMAC_SHA256_LENGTH,
        got: key.len(),
    })
}

/// HMAC-SHA256 over the concatenation of `parts`.
///
/// # Arguments
/// * `key` - MAC key of any length
/// * `parts` - Message fragments, fed in order
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_SHA256_LENGTH], CryptoError> {
    let mut mac = keyed(key)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; HMAC_SHA256_LENGTH];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verify a full 32-byte HMAC-SHA256 tag in constant time.
///
/// Returns false for a wrong tag or a tag of the wrong length; never errors.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let Ok(mut mac) = keyed(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).is_ok()
}

/// Verify a tag truncated to its leftmost bytes, in constant time.
///
/// An empty tag or one longer than 32 bytes is rejected.
pub fn verify_truncated_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    if tag.is_empty() {
        return false;
    }
    let Ok(mut mac) = keyed(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_truncated_left(tag).is_ok()
}
