pub mod aes_block;
pub mod aes_gcm;
pub mod base64;
pub mod block64;
pub mod ecdh;
pub mod error;
pub mod mac;
pub mod types;

pub use aes_block::AesBlockCipher;
pub use aes_gcm::{aes_gcm_decrypt, aes_gcm_encrypt, generate_iv, AesGcmCipher};
pub use base64::{base64_decode, base64_encode};
pub use block64::Block64Cipher;
pub use ecdh::{derive_client_keys, ClientKeys, RegistrationKey};
pub use error::CryptoError;
pub use mac::{hmac_sha256, verify_hmac_sha256, verify_truncated_hmac_sha256};
pub use types::{
    AES_BLOCK_SIZE, AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, BLOCK64_SIZE,
    HMAC_SHA256_LENGTH, SERVER_KEY_LENGTH,
};
