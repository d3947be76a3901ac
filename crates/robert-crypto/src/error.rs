use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid block length: expected {expected} bytes, got {got}")]
    InvalidBlockLength { expected: usize, got: usize },

    #[error("Encrypted data too short")]
    DataTooShort,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
