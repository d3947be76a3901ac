//! Key provisioning.
//!
//! Keys are addressed by keystore alias:
//! - `server-key-yyyyMMdd`: 24-byte day key used to encrypt that day's EBIDs
//! - `federation-key`: 32-byte AES key shared across countries for country codes
//! - `key-encryption-key`: 32-byte AES key wrapping stored client keys
//! - `register-key`: P-256 private key for registration ECDH
//!
//! [`KeystoreKeyRepository`] serves lookups from an immutable [`KeySet`]
//! snapshot; `reload` swaps in a new snapshot without disturbing readers
//! that already hold the old one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use robert_crypto::{
    AesBlockCipher, Block64Cipher, RegistrationKey, AES_KEY_LENGTH, SERVER_KEY_LENGTH,
};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::clock::RobertClock;
use crate::error::RobertError;

pub const SERVER_KEY_ALIAS_PREFIX: &str = "server-key-";
pub const FEDERATION_KEY_ALIAS: &str = "federation-key";
pub const KEY_ENCRYPTION_KEY_ALIAS: &str = "key-encryption-key";
pub const REGISTER_KEY_ALIAS: &str = "register-key";

const SERVER_KEY_DATE_FORMAT: &str = "%Y%m%d";

/// Alias of the day key for `date`.
pub fn server_key_alias(date: NaiveDate) -> String {
    format!(
        "{}{}",
        SERVER_KEY_ALIAS_PREFIX,
        date.format(SERVER_KEY_DATE_FORMAT)
    )
}

fn parse_server_key_alias(alias: &str) -> Option<NaiveDate> {
    let date = alias.strip_prefix(SERVER_KEY_ALIAS_PREFIX)?;
    NaiveDate::parse_from_str(date, SERVER_KEY_DATE_FORMAT).ok()
}

fn fixed_key<const N: usize>(alias: &str, bytes: &[u8]) -> Result<[u8; N], RobertError> {
    bytes.try_into().map_err(|_| {
        RobertError::Config(format!(
            "key '{}' should be {} bytes but has {}",
            alias,
            N,
            bytes.len()
        ))
    })
}

/// Per-day symmetric key for EBID encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ServerKey([u8; SERVER_KEY_LENGTH]);

impl ServerKey {
    pub fn new(bytes: [u8; SERVER_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn cipher(&self) -> Result<Block64Cipher, RobertError> {
        Ok(Block64Cipher::new(&self.0)?)
    }
}

/// Federation-wide key used only for country codes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FederationKey([u8; AES_KEY_LENGTH]);

impl FederationKey {
    pub fn new(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn cipher(&self) -> Result<AesBlockCipher, RobertError> {
        Ok(AesBlockCipher::new(&self.0)?)
    }
}

/// Key wrapping the per-client keys at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; AES_KEY_LENGTH]);

impl KeyEncryptionKey {
    pub fn new(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

macro_rules! redacted_debug {
    ($($ty:ident),*) => {
        $(impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(concat!(stringify!($ty), "(..)"))
            }
        })*
    };
}

redacted_debug!(ServerKey, FederationKey, KeyEncryptionKey);

/// Read access to provisioned key material.
///
/// A missing day key is a normal condition (future or unprovisioned day)
/// and is reported as `None`. The other keys are required; their absence is
/// a configuration error.
pub trait KeyRepository: Send + Sync {
    fn server_key(&self, date: NaiveDate) -> Option<ServerKey>;
    fn federation_key(&self) -> Result<FederationKey, RobertError>;
    fn key_encryption_key(&self) -> Result<KeyEncryptionKey, RobertError>;
    fn registration_key(&self) -> Result<RegistrationKey, RobertError>;
}

/// Look up the day key for `date` shifted by `day_offset` days.
///
/// Returns the date actually used along with the key, so callers can log it.
pub fn resolve_day_key(
    keys: &dyn KeyRepository,
    date: NaiveDate,
    day_offset: i64,
) -> Option<(NaiveDate, ServerKey)> {
    let target = date.checked_add_signed(chrono::Duration::try_days(day_offset)?)?;
    keys.server_key(target).map(|key| (target, key))
}

/// Day keys for `number_of_days` consecutive dates starting at `start_epoch`'s date.
///
/// Absent keys are kept as `None` entries so callers can skip those days.
pub fn day_keys(
    keys: &dyn KeyRepository,
    clock: &RobertClock,
    start_epoch: i32,
    number_of_days: u32,
) -> Vec<(NaiveDate, Option<ServerKey>)> {
    let first = clock.date_for_epoch(start_epoch);
    (0..i64::from(number_of_days))
        .filter_map(|offset| {
            let date = first.checked_add_signed(chrono::Duration::try_days(offset)?)?;
            Some((date, keys.server_key(date)))
        })
        .collect()
}

/// Immutable snapshot of all provisioned keys.
#[derive(Default, Clone)]
pub struct KeySet {
    server_keys: BTreeMap<NaiveDate, ServerKey>,
    federation_key: Option<FederationKey>,
    key_encryption_key: Option<KeyEncryptionKey>,
    registration_key: Option<RegistrationKey>,
}

impl KeySet {
    /// Build a key set from `(alias, raw bytes)` pairs.
    ///
    /// Unknown aliases are ignored. Wrong key sizes and malformed server key
    /// dates are configuration errors.
    pub fn from_aliases<I>(entries: I) -> Result<Self, RobertError>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut set = KeySet::default();
        for (alias, mut bytes) in entries {
            let result = set.insert(&alias, &bytes);
            bytes.zeroize();
            result?;
        }
        Ok(set)
    }

    fn insert(&mut self, alias: &str, bytes: &[u8]) -> Result<(), RobertError> {
        match alias {
            FEDERATION_KEY_ALIAS => {
                self.federation_key = Some(FederationKey(fixed_key(alias, bytes)?));
            }
            KEY_ENCRYPTION_KEY_ALIAS => {
                self.key_encryption_key = Some(KeyEncryptionKey(fixed_key(alias, bytes)?));
            }
            REGISTER_KEY_ALIAS => {
                let key = RegistrationKey::from_bytes(bytes)
                    .map_err(|e| RobertError::Config(format!("key '{}': {}", alias, e)))?;
                self.registration_key = Some(key);
            }
            _ if alias.starts_with(SERVER_KEY_ALIAS_PREFIX) => {
                let date = parse_server_key_alias(alias).ok_or_else(|| {
                    RobertError::Config(format!("malformed server key alias '{}'", alias))
                })?;
                self.server_keys
                    .insert(date, ServerKey(fixed_key(alias, bytes)?));
            }
            _ => debug!(alias, "ignoring unknown key alias"),
        }
        Ok(())
    }

    /// Random keys for `days` consecutive days starting at `first_day`, plus
    /// fresh federation, key-encryption and registration keys.
    pub fn generate(first_day: NaiveDate, days: u32) -> Result<Self, RobertError> {
        let mut set = KeySet {
            federation_key: Some(FederationKey(random_bytes()?)),
            key_encryption_key: Some(KeyEncryptionKey(random_bytes()?)),
            registration_key: Some(RegistrationKey::generate()?),
            ..KeySet::default()
        };
        for date in first_day.iter_days().take(days as usize) {
            set.server_keys.insert(date, ServerKey(random_bytes()?));
        }
        Ok(set)
    }

    pub fn without_server_key(mut self, date: NaiveDate) -> Self {
        self.server_keys.remove(&date);
        self
    }

    pub fn server_key_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.server_keys.keys().copied()
    }

    /// Dates between the first and last day key that have no key.
    pub fn missing_days(&self) -> Vec<NaiveDate> {
        let (Some(first), Some(last)) = (
            self.server_keys.keys().next(),
            self.server_keys.keys().next_back(),
        ) else {
            return Vec::new();
        };
        first
            .iter_days()
            .take_while(|d| d < last)
            .filter(|d| !self.server_keys.contains_key(d))
            .collect()
    }

    /// Aliases of every key present in the set.
    pub fn aliases(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.server_keys.keys().map(|d| server_key_alias(*d)).collect();
        if self.federation_key.is_some() {
            names.insert(FEDERATION_KEY_ALIAS.to_string());
        }
        if self.key_encryption_key.is_some() {
            names.insert(KEY_ENCRYPTION_KEY_ALIAS.to_string());
        }
        if self.registration_key.is_some() {
            names.insert(REGISTER_KEY_ALIAS.to_string());
        }
        names
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N], RobertError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| robert_crypto::CryptoError::RngFailed(e.to_string()))?;
    Ok(bytes)
}

fn missing(alias: &str) -> RobertError {
    RobertError::Config(format!("keystore does not contain key for alias '{}'", alias))
}

/// In-memory key repository with copy-on-write reload.
pub struct KeystoreKeyRepository {
    keys: RwLock<Arc<KeySet>>,
}

impl KeystoreKeyRepository {
    pub fn new(keys: KeySet) -> Self {
        log_key_set(&keys);
        Self {
            keys: RwLock::new(Arc::new(keys)),
        }
    }

    /// Current snapshot. The lock is only held while cloning the `Arc`.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.keys.read().clone()
    }

    /// Replace all keys. In-flight readers keep the snapshot they hold.
    pub fn reload(&self, keys: KeySet) {
        log_key_set(&keys);
        *self.keys.write() = Arc::new(keys);
    }

    pub fn cached_key_names(&self) -> BTreeSet<String> {
        self.snapshot().aliases()
    }
}

fn log_key_set(keys: &KeySet) {
    for alias in keys.aliases() {
        info!(alias = %alias, "loading key");
    }
    let missing = keys.missing_days();
    if !missing.is_empty() {
        let days: Vec<String> = missing.iter().map(|d| d.to_string()).collect();
        warn!(
            count = missing.len(),
            days = %days.join(","),
            "server key repository is missing day keys"
        );
    }
}

impl KeyRepository for KeystoreKeyRepository {
    fn server_key(&self, date: NaiveDate) -> Option<ServerKey> {
        self.snapshot().server_keys.get(&date).cloned()
    }

    fn federation_key(&self) -> Result<FederationKey, RobertError> {
        self.snapshot()
            .federation_key
            .clone()
            .ok_or_else(|| missing(FEDERATION_KEY_ALIAS))
    }

    fn key_encryption_key(&self) -> Result<KeyEncryptionKey, RobertError> {
        self.snapshot()
            .key_encryption_key
            .clone()
            .ok_or_else(|| missing(KEY_ENCRYPTION_KEY_ALIAS))
    }

    fn registration_key(&self) -> Result<RegistrationKey, RobertError> {
        self.snapshot()
            .registration_key
            .clone()
            .ok_or_else(|| missing(REGISTER_KEY_ALIAS))
    }
}
