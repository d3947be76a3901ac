/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
///
/// Used for the federation key, the key-encryption key and both per-client keys.
pub const AES_KEY_LENGTH: usize = 32;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Server day key length in bytes (192 bits).
pub const SERVER_KEY_LENGTH: usize = 24;

/// 64-bit block size used for EBIDs.
pub const BLOCK64_SIZE: usize = 8;

/// HMAC-SHA256 output length in bytes.
pub const HMAC_SHA256_LENGTH: usize = 32;
