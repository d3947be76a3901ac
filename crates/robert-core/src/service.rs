//! Request-level entry points of the crypto core.
//!
//! Every operation returns its failure as a [`RobertError`] value after
//! logging it: `info` for caller errors, `error` for internal ones. The web
//! layer maps [`RobertError::code`] to its own status codes.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info};

use crate::auth::{AuthRequest, AuthValidator};
use crate::clock::RobertClock;
use crate::config::CryptoConfig;
use crate::error::RobertError;
use crate::hello::{ContactValidation, ContactValidator, HelloMessageDetail};
use crate::identity::{IdentityRepository, IdentityService};
use crate::keys::{KeySet, KeystoreKeyRepository};
use crate::model::{CountryCode, Ebid, Ecc, IdA, RequestType};
use crate::tuples::TupleGenerator;

/// EBID, epoch, time and MAC of an authenticated request whose type is
/// implied by the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ebid: Vec<u8>,
    pub epoch_id: i32,
    pub time: [u8; 4],
    pub mac: Vec<u8>,
}

impl Credentials {
    fn into_auth_request(self, request_type: RequestType) -> AuthRequest {
        AuthRequest {
            request_type,
            ebid: self.ebid,
            epoch_id: self.epoch_id,
            time: self.time,
            mac: self.mac,
        }
    }
}

/// Span of a tuple bundle to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleSpan {
    pub from_epoch_id: i32,
    pub number_of_days: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id_a: IdA,
    pub tuples: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFromAuth {
    pub id_a: IdA,
    pub epoch_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFromStatus {
    pub id_a: IdA,
    pub epoch_id: i32,
    pub tuples: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRequest {
    pub ebid: Vec<u8>,
    pub ecc: Vec<u8>,
    pub hello_messages: Vec<HelloMessageDetail>,
}

pub struct RobertCryptoService {
    config: CryptoConfig,
    clock: RobertClock,
    keys: Arc<KeystoreKeyRepository>,
    identities: IdentityService,
}

impl RobertCryptoService {
    pub fn new(
        config: CryptoConfig,
        keys: Arc<KeystoreKeyRepository>,
        identities: Arc<dyn IdentityRepository>,
    ) -> Self {
        let clock = RobertClock::from_config(&config);
        let identities = IdentityService::new(keys.clone(), identities);
        Self {
            config,
            clock,
            keys,
            identities,
        }
    }

    pub fn clock(&self) -> &RobertClock {
        &self.clock
    }

    pub fn country_code(&self) -> CountryCode {
        CountryCode(self.config.server_country_code)
    }

    fn validator(&self) -> AuthValidator<'_> {
        AuthValidator::new(
            &self.clock,
            self.keys.as_ref(),
            &self.identities,
            self.config.previous_day_key_max_epoch,
        )
    }

    fn tuple_generator(&self) -> TupleGenerator<'_> {
        TupleGenerator::new(&self.clock, self.keys.as_ref())
            .parallel(self.config.parallel_tuple_generation)
            .max_days(self.config.max_bundle_days)
    }

    /// Register a client and hand it its first tuple bundle.
    ///
    /// If the bundle can't be generated the new identity is removed again.
    pub fn create_registration(
        &self,
        client_public_key: &[u8],
        span: BundleSpan,
    ) -> Result<Registration, RobertError> {
        logged("create registration", || {
            let bundle = self.identities.create(client_public_key)?;
            let tuples = self
                .tuple_generator()
                .generate(
                    &bundle,
                    span.from_epoch_id,
                    span.number_of_days,
                    self.country_code(),
                )
                .inspect_err(|_| {
                    if let Err(e) = self.identities.delete(&bundle.id_a) {
                        error!(code = e.code(), "failed to remove identity after bundle error: {}", e);
                    }
                })?;
            Ok(Registration {
                id_a: bundle.id_a,
                tuples,
            })
        })
    }

    pub fn id_from_auth(&self, request: AuthRequest) -> Result<IdFromAuth, RobertError> {
        logged("id from auth", || {
            let identity = self.validator().validate(&request)?;
            Ok(IdFromAuth {
                id_a: identity.id_a,
                epoch_id: identity.epoch_id,
            })
        })
    }

    /// Authenticate a STATUS request and generate a fresh tuple bundle.
    pub fn id_from_status(
        &self,
        credentials: Credentials,
        span: BundleSpan,
    ) -> Result<IdFromStatus, RobertError> {
        logged("id from status", || {
            let request = credentials.into_auth_request(RequestType::Status);
            let identity = self.validator().validate(&request)?;
            let tuples = self.tuple_generator().generate(
                &identity.bundle,
                span.from_epoch_id,
                span.number_of_days,
                self.country_code(),
            )?;
            Ok(IdFromStatus {
                id_a: identity.id_a,
                epoch_id: identity.epoch_id,
                tuples,
            })
        })
    }

    /// Authenticate an UNREGISTER request and remove the identity.
    pub fn delete_id(&self, credentials: Credentials) -> Result<IdA, RobertError> {
        logged("delete id", || {
            let request = credentials.into_auth_request(RequestType::Unregister);
            let identity = self.validator().validate(&request)?;
            self.identities.delete(&identity.id_a)?;
            Ok(identity.id_a)
        })
    }

    pub fn validate_contact(&self, request: &ContactRequest) -> Result<ContactValidation, RobertError> {
        logged("validate contact", || {
            let ebid = Ebid::from_slice(&request.ebid)?;
            let ecc = match request.ecc.as_slice() {
                [byte] => Ecc(*byte),
                other => {
                    return Err(RobertError::MalformedInput(format!(
                        "ECC should be 1 byte but has {}",
                        other.len()
                    )))
                }
            };
            ContactValidator::new(
                &self.clock,
                self.keys.as_ref(),
                &self.identities,
                self.config.hello_message_timestamp_tolerance,
                self.config.previous_day_key_max_epoch,
            )
            .validate(self.country_code(), &ebid, ecc, &request.hello_messages)
        })
    }

    /// Swap in a new key set; in-flight requests keep the previous snapshot.
    pub fn reload_keys(&self, keys: KeySet) {
        self.keys.reload(keys);
    }

    /// Aliases of the keys currently loaded.
    pub fn key_cache_status(&self) -> BTreeSet<String> {
        self.keys.cached_key_names()
    }
}

fn logged<T>(
    operation: &str,
    handler: impl FnOnce() -> Result<T, RobertError>,
) -> Result<T, RobertError> {
    handler().inspect_err(|e| {
        if e.is_client_error() {
            info!(operation, code = e.code(), "{}", e);
        } else {
            error!(operation, code = e.code(), "{}", e);
        }
    })
}
