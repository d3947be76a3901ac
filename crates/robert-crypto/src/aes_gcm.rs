//! AES-256-GCM encryption for tuple bundles and stored client keys.
//!
//! Wire format:
//! [12 bytes: IV][N bytes: ciphertext + tag]
//! The IV is drawn fresh for every encryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::CryptoError;
use crate::types::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH};

/// Generate a random 12-byte IV for AES-GCM.
pub fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// AES-256-GCM cipher bound to one key.
///
/// Writes `[IV:12][ciphertext+tag]` and reads the same layout back.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Create a new cipher.
    ///
    /// # Arguments
    /// * `key` - 32-byte (256-bit) raw key material
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != AES_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: AES_KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt data, prefixing the output with a fresh IV.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = generate_iv()?;
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(iv.len() + ciphertext.len());
        result.extend_from_slice(&iv);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt `[IV:12][ciphertext+tag]`.
    ///
    /// A tag mismatch is reported as [`CryptoError::DecryptionFailed`]; no
    /// plaintext is ever returned for tampered input.
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() < AES_GCM_IV_LENGTH + AES_GCM_TAG_LENGTH {
            return Err(CryptoError::DataTooShort);
        }

        let iv = &encrypted[..AES_GCM_IV_LENGTH];
        let ciphertext = &encrypted[AES_GCM_IV_LENGTH..];
        let nonce = Nonce::from_slice(iv);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// Encrypt with AES-256-GCM under `key`. Returns `[IV:12][ciphertext+tag]`.
pub fn aes_gcm_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    AesGcmCipher::new(key)?.encrypt(plaintext)
}

/// Decrypt `[IV:12][ciphertext+tag]` with AES-256-GCM under `key`.
pub fn aes_gcm_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    AesGcmCipher::new(key)?.decrypt(data)
}
