//! 64-bit block cipher used for EBIDs.
//!
//! Single-block encryption only. Inputs are always exactly one 8-byte
//! block, so there is no mode and no padding.

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::TdesEde3;

use crate::error::CryptoError;
use crate::types::{BLOCK64_SIZE, SERVER_KEY_LENGTH};

/// Triple-DES (EDE3) keyed with a 24-byte server day key.
#[derive(Clone)]
pub struct Block64Cipher {
    cipher: TdesEde3,
}

impl Block64Cipher {
    /// # Arguments
    /// * `key` - 24-byte (192-bit) server day key
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != SERVER_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: SERVER_KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher = TdesEde3::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt_block(&self, block: &[u8; BLOCK64_SIZE]) -> [u8; BLOCK64_SIZE] {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut buf);
        let mut out = [0u8; BLOCK64_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decrypt_block(&self, block: &[u8; BLOCK64_SIZE]) -> [u8; BLOCK64_SIZE] {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.decrypt_block(&mut buf);
        let mut out = [0u8; BLOCK64_SIZE];
        out.copy_from_slice(&buf);
        out
    }

}
