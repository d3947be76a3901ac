//! Authenticated request validation.
//!
//! A client proves ownership of an idA by sending one of its EBIDs with a MAC
//! computed under its `key_for_mac`:
//!
//! ```text
//! HMAC-SHA256(key_for_mac, salt ‖ ebid (8) ‖ epoch_id (4, BE) ‖ time (4))
//! ```
//!
//! The salt is the request type, so a MAC made for one purpose never
//! authenticates another.

use robert_crypto::{hmac_sha256, verify_hmac_sha256, HMAC_SHA256_LENGTH};
use tracing::debug;

use crate::clock::RobertClock;
use crate::ebid::{EbidDecoder, LadderOptions};
use crate::error::RobertError;
use crate::identity::{ClientKeyBundle, IdentityService};
use crate::keys::KeyRepository;
use crate::model::{Ebid, IdA, RequestType};

/// Raw credentials of an authenticated request, as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub request_type: RequestType,
    pub ebid: Vec<u8>,
    pub epoch_id: i32,
    /// NTP seconds truncated to 32 bits, big-endian.
    pub time: [u8; 4],
    pub mac: Vec<u8>,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub id_a: IdA,
    /// Epoch asserted by the request.
    pub epoch_id: i32,
    pub bundle: ClientKeyBundle,
}

fn auth_mac_input(request_type: RequestType, ebid: &Ebid, epoch_id: i32, time: &[u8; 4]) -> [u8; 17] {
    let mut input = [0u8; 17];
    input[0] = request_type.salt();
    input[1..9].copy_from_slice(ebid.as_bytes());
    input[9..13].copy_from_slice(&epoch_id.to_be_bytes());
    input[13..].copy_from_slice(time);
    input
}

/// MAC a client attaches to an authenticated request.
pub fn compute_auth_mac(
    key_for_mac: &[u8],
    request_type: RequestType,
    ebid: &Ebid,
    epoch_id: i32,
    time: &[u8; 4],
) -> Result<[u8; HMAC_SHA256_LENGTH], RobertError> {
    let input = auth_mac_input(request_type, ebid, epoch_id, time);
    Ok(hmac_sha256(key_for_mac, &[&input])?)
}

/// Validates [`AuthRequest`]s against day keys and registered identities.
pub struct AuthValidator<'a> {
    decoder: EbidDecoder<'a>,
    identities: &'a IdentityService,
    previous_day_key_max_epoch: i32,
}

impl<'a> AuthValidator<'a> {
    pub fn new(
        clock: &'a RobertClock,
        keys: &'a dyn KeyRepository,
        identities: &'a IdentityService,
        previous_day_key_max_epoch: i32,
    ) -> Self {
        Self {
            decoder: EbidDecoder::new(clock, keys),
            identities,
            previous_day_key_max_epoch,
        }
    }

    /// Check surface fields, decode the EBID, look up the identity, then verify the MAC.
    pub fn validate(&self, request: &AuthRequest) -> Result<AuthenticatedIdentity, RobertError> {
        if request.request_type == RequestType::Hello {
            return Err(RobertError::MalformedInput(
                "hello messages are not authenticated requests".into(),
            ));
        }
        if request.epoch_id < 0 {
            return Err(RobertError::MalformedInput(format!(
                "negative epoch id: {}",
                request.epoch_id
            )));
        }
        let expected_mac_length = request.request_type.mac_length();
        if request.mac.len() != expected_mac_length {
            return Err(RobertError::MalformedInput(format!(
                "MAC should be {} bytes but has {}",
                expected_mac_length,
                request.mac.len()
            )));
        }
        let ebid = Ebid::from_slice(&request.ebid)?;

        let options =
            LadderOptions::for_auth_request(request.epoch_id, self.previous_day_key_max_epoch);
        let bid = self.decoder.decode(&ebid, request.epoch_id, options)?;
        debug!(epoch_id = bid.epoch_id, "EBID decoded");

        let bundle = self.identities.find(&bid.id_a)?;

        let input = auth_mac_input(request.request_type, &ebid, request.epoch_id, &request.time);
        if !verify_hmac_sha256(bundle.key_for_mac(), &[&input], &request.mac) {
            return Err(RobertError::AuthenticationFailed);
        }

        Ok(AuthenticatedIdentity {
            id_a: bid.id_a,
            epoch_id: request.epoch_id,
            bundle,
        })
    }
}
