//! Raw AES-256 single-block encryption.
//!
//! Used to derive the one-byte country-code mask from an EBID.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::error::CryptoError;
use crate::types::{AES_BLOCK_SIZE, AES_KEY_LENGTH};

#[derive(Clone)]
pub struct AesBlockCipher {
    cipher: Aes256,
}

impl AesBlockCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != AES_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: AES_KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher =
            Aes256::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt_block(&self, block: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut buf);
        let mut out = [0u8; AES_BLOCK_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Zero-pad `data` on the right to one AES block and encrypt it.
    ///
    /// Inputs longer than one block are rejected.
    pub fn encrypt_padded(&self, data: &[u8]) -> Result<[u8; AES_BLOCK_SIZE], CryptoError> {
        if data.len() > AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidBlockLength {
                expected: AES_BLOCK_SIZE,
                got: data.len(),
            });
        }
        let mut block = [0u8; AES_BLOCK_SIZE];
        block[..data.len()].copy_from_slice(data);
        Ok(self.encrypt_block(&block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fips_197_aes_256_vector() {
        let key = hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .unwrap();
        let plaintext: [u8; 16] = hex::decode("00112233445566778899aabbccddeeff")
            .unwrap()
            .try_into()
            .unwrap();
        let cipher = AesBlockCipher::new(&key).unwrap();
        assert_eq!(
            hex::encode(cipher.encrypt_block(&plaintext)),
            "8ea2b7ca516745bfeafc49904b496089"
        );
    }

    #[test]
    fn padded_matches_explicit_zero_block() {
        let cipher = AesBlockCipher::new(&[7u8; 32]).unwrap();
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&data);
        assert_eq!(cipher.encrypt_padded(&data).unwrap(), cipher.encrypt_block(&block));
    }

    #[test]
    fn padded_rejects_oversized_input() {
        let cipher = AesBlockCipher::new(&[7u8; 32]).unwrap();
        assert!(cipher.encrypt_padded(&[0u8; 17]).is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(AesBlockCipher::new(&[0u8; 24]).is_err());
    }
}
