//! P-256 ECDH key agreement and per-client key derivation.
//!
//! The server holds one long-lived registration key. A registering client
//! sends its public key; both sides run ECDH and derive two 32-byte keys
//! from the shared secret:
//! - `key_for_mac = HMAC-SHA256(shared, "mac")`
//! - `key_for_tuples = HMAC-SHA256(shared, "tuples")`

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::mac::hmac_sha256;
use crate::types::AES_KEY_LENGTH;

const MAC_KEY_LABEL: &[u8] = b"mac";
const TUPLES_KEY_LABEL: &[u8] = b"tuples";

/// P-256 private key used for registration key agreement.
#[derive(Clone)]
pub struct RegistrationKey {
    secret: SecretKey,
}

impl std::fmt::Debug for RegistrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationKey").finish_non_exhaustive()
    }
}

impl RegistrationKey {
    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        loop {
            getrandom::getrandom(bytes.as_mut())
                .map_err(|e| CryptoError::RngFailed(e.to_string()))?;
            // Zero and values >= n are rejected; draw again.
            if let Ok(secret) = SecretKey::from_slice(bytes.as_ref()) {
                return Ok(Self { secret });
            }
        }
    }

    /// Load a key from a raw 32-byte scalar or a PKCS#8 DER document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = if bytes.len() == 32 {
            SecretKey::from_slice(bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?
        } else {
            SecretKey::from_pkcs8_der(bytes)
                .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?
        };
        Ok(Self { secret })
    }

    /// Public key as SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.secret
            .public_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Public key as an uncompressed SEC1 point (65 bytes).
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Run ECDH against a peer public key.
    ///
    /// # Arguments
    /// * `peer_public_key` - SubjectPublicKeyInfo DER, or a SEC1 point
    pub fn shared_secret(
        &self,
        peer_public_key: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer = parse_public_key(peer_public_key)?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }

    /// ECDH followed by [`derive_client_keys`].
    pub fn client_keys(&self, peer_public_key: &[u8]) -> Result<ClientKeys, CryptoError> {
        let shared = self.shared_secret(peer_public_key)?;
        derive_client_keys(shared.as_ref())
    }
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_public_key_der(bytes)
        .or_else(|_| PublicKey::from_sec1_bytes(bytes))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// The two symmetric keys a registered client shares with the server.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ClientKeys {
    pub key_for_mac: [u8; AES_KEY_LENGTH],
    pub key_for_tuples: [u8; AES_KEY_LENGTH],
}

impl std::fmt::Debug for ClientKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeys").finish_non_exhaustive()
    }
}

/// Derive `key_for_mac` and `key_for_tuples` from an ECDH shared secret.
pub fn derive_client_keys(shared_secret: &[u8]) -> Result<ClientKeys, CryptoError> {
    Ok(ClientKeys {
        key_for_mac: hmac_sha256(shared_secret, &[MAC_KEY_LABEL])?,
        key_for_tuples: hmac_sha256(shared_secret, &[TUPLES_KEY_LABEL])?,
    })
}
