//! ROBERT crypto core: epoch clock, EBID codec, authentication, contact validation, tuple bundles.

pub mod auth;
pub mod clock;
pub mod config;
pub mod country_code;
pub mod ebid;
pub mod error;
pub mod hello;
pub mod identity;
pub mod keys;
pub mod model;
pub mod service;
pub mod tuples;

pub use auth::{compute_auth_mac, AuthRequest, AuthValidator, AuthenticatedIdentity};
pub use clock::{
    RobertClock, RobertInstant, EPOCHS_PER_DAY, EPOCH_DURATION_SECS, NTP_UNIX_OFFSET,
    SECONDS_PER_DAY,
};
pub use config::CryptoConfig;
pub use country_code::{decrypt_country_code, encrypt_country_code, CountryCodeCipher};
pub use ebid::{decrypt_ebid, encrypt_ebid, AdjacentEpoch, EbidDecoder, LadderOptions};
pub use error::RobertError;
pub use hello::{ContactValidation, ContactValidator, HelloMessage, HelloMessageDetail};
pub use identity::{
    ClientKeyBundle, IdentityRepository, IdentityService, InMemoryIdentityRepository,
    StoredIdentity,
};
pub use keys::{
    day_keys, resolve_day_key, server_key_alias, FederationKey, KeyEncryptionKey, KeyRepository,
    KeySet, KeystoreKeyRepository, ServerKey,
};
pub use model::{
    BluetoothIdentifier, CountryCode, Ebid, Ecc, EphemeralTuple, IdA, RequestType, TupleKey,
};
pub use service::{
    BundleSpan, ContactRequest, Credentials, IdFromAuth, IdFromStatus, Registration,
    RobertCryptoService,
};
pub use tuples::{decrypt_tuple_bundle, TupleGenerator};
