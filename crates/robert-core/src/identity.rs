//! Client identities and their key bundles.
//!
//! A registered client owns an idA and two symmetric keys derived from an
//! ECDH exchange with the server registration key. Keys are stored wrapped
//! with AES-256-GCM under the key-encryption key and unwrapped on lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use robert_crypto::{aes_gcm_decrypt, aes_gcm_encrypt, ClientKeys, AES_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::RobertError;
use crate::keys::{KeyEncryptionKey, KeyRepository};
use crate::model::IdA;

/// A client's idA together with its unwrapped keys.
#[derive(Debug, Clone)]
pub struct ClientKeyBundle {
    pub id_a: IdA,
    pub keys: ClientKeys,
}

impl ClientKeyBundle {
    pub fn key_for_mac(&self) -> &[u8] {
        &self.keys.key_for_mac
    }

    pub fn key_for_tuples(&self) -> &[u8] {
        &self.keys.key_for_tuples
    }
}

/// Persisted form of a [`ClientKeyBundle`]: both keys wrapped under the KEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub id_a: IdA,
    #[serde(with = "robert_crypto::base64::serde_bytes_b64")]
    pub encrypted_key_for_mac: Vec<u8>,
    #[serde(with = "robert_crypto::base64::serde_bytes_b64")]
    pub encrypted_key_for_tuples: Vec<u8>,
}

impl StoredIdentity {
    pub fn seal(bundle: &ClientKeyBundle, kek: &KeyEncryptionKey) -> Result<Self, RobertError> {
        Ok(Self {
            id_a: bundle.id_a,
            encrypted_key_for_mac: aes_gcm_encrypt(kek.as_bytes(), &bundle.keys.key_for_mac)?,
            encrypted_key_for_tuples: aes_gcm_encrypt(
                kek.as_bytes(),
                &bundle.keys.key_for_tuples,
            )?,
        })
    }

    pub fn open(&self, kek: &KeyEncryptionKey) -> Result<ClientKeyBundle, RobertError> {
        Ok(ClientKeyBundle {
            id_a: self.id_a,
            keys: ClientKeys {
                key_for_mac: unwrap_key(kek, &self.encrypted_key_for_mac)?,
                key_for_tuples: unwrap_key(kek, &self.encrypted_key_for_tuples)?,
            },
        })
    }
}

fn unwrap_key(kek: &KeyEncryptionKey, wrapped: &[u8]) -> Result<[u8; AES_KEY_LENGTH], RobertError> {
    let plain = Zeroizing::new(aes_gcm_decrypt(kek.as_bytes(), wrapped)?);
    plain.as_slice().try_into().map_err(|_| {
        RobertError::Internal(format!(
            "unwrapped client key should be {} bytes but has {}",
            AES_KEY_LENGTH,
            plain.len()
        ))
    })
}

/// Storage of wrapped client identities.
pub trait IdentityRepository: Send + Sync {
    fn save(&self, identity: StoredIdentity) -> Result<(), RobertError>;
    fn find(&self, id_a: &IdA) -> Result<Option<StoredIdentity>, RobertError>;
    /// Returns whether an identity was removed.
    fn delete(&self, id_a: &IdA) -> Result<bool, RobertError>;
}

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    identities: RwLock<HashMap<IdA, StoredIdentity>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.read().is_empty()
    }
}

impl IdentityRepository for InMemoryIdentityRepository {
    fn save(&self, identity: StoredIdentity) -> Result<(), RobertError> {
        self.identities.write().insert(identity.id_a, identity);
        Ok(())
    }

    fn find(&self, id_a: &IdA) -> Result<Option<StoredIdentity>, RobertError> {
        Ok(self.identities.read().get(id_a).cloned())
    }

    fn delete(&self, id_a: &IdA) -> Result<bool, RobertError> {
        Ok(self.identities.write().remove(id_a).is_some())
    }
}

/// Registration, lookup and removal of client identities.
#[derive(Clone)]
pub struct IdentityService {
    keys: Arc<dyn KeyRepository>,
    identities: Arc<dyn IdentityRepository>,
}

impl IdentityService {
    pub fn new(keys: Arc<dyn KeyRepository>, identities: Arc<dyn IdentityRepository>) -> Self {
        Self { keys, identities }
    }

    /// Register a client from its P-256 public key (SPKI DER or SEC1).
    ///
    /// An unparseable public key is the caller's fault and maps to 400.
    pub fn create(&self, client_public_key: &[u8]) -> Result<ClientKeyBundle, RobertError> {
        let registration_key = self.keys.registration_key()?;
        let keys = registration_key.client_keys(client_public_key).map_err(|e| {
            RobertError::MalformedInput(format!("unable to load client public key: {}", e))
        })?;

        let mut id_a = IdA::random()?;
        while self.identities.find(&id_a)?.is_some() {
            debug!("generated idA already registered, drawing another");
            id_a = IdA::random()?;
        }

        let bundle = ClientKeyBundle { id_a, keys };
        let kek = self.keys.key_encryption_key()?;
        self.identities.save(StoredIdentity::seal(&bundle, &kek)?)?;
        info!(id_a = %id_a, "registered new identity");
        Ok(bundle)
    }

    pub fn find(&self, id_a: &IdA) -> Result<ClientKeyBundle, RobertError> {
        let stored = self
            .identities
            .find(id_a)?
            .ok_or(RobertError::UnknownIdentity)?;
        stored.open(&self.keys.key_encryption_key()?)
    }

    pub fn delete(&self, id_a: &IdA) -> Result<(), RobertError> {
        if self.identities.delete(id_a)? {
            info!(id_a = %id_a, "deleted identity");
            Ok(())
        } else {
            Err(RobertError::UnknownIdentity)
        }
    }
}
