//! Hello message contact validation.
//!
//! A hello message is what a device broadcasts over Bluetooth:
//!
//! ```text
//! +-----------+------------+------------+-----------+
//! | ECC (1 B) | EBID (8 B) | time (2 B) | MAC (5 B) |
//! +-----------+------------+------------+-----------+
//! ```
//!
//! `time` holds the 16 least significant bits of the emitter's NTP seconds
//! and the MAC is `HMAC-SHA256(key_for_mac, HELLO ‖ ecc ‖ ebid ‖ time)`
//! truncated to 5 bytes. A contact is a list of hellos sharing an EBID, each
//! with the time the receiving device recorded it.

use robert_crypto::{hmac_sha256, verify_truncated_hmac_sha256};
use tracing::{debug, info};

use crate::clock::RobertClock;
use crate::country_code::CountryCodeCipher;
use crate::ebid::{EbidDecoder, LadderOptions};
use crate::error::RobertError;
use crate::identity::IdentityService;
use crate::keys::KeyRepository;
use crate::model::{BluetoothIdentifier, CountryCode, Ebid, Ecc, RequestType};

pub const HELLO_MAC_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloMessage {
    pub ecc: Ecc,
    pub ebid: Ebid,
    /// 16 least significant bits of the emission NTP seconds.
    pub time: u16,
}

impl HelloMessage {
    pub fn new(ecc: Ecc, ebid: Ebid, time: u16) -> Self {
        Self { ecc, ebid, time }
    }

    fn mac_input(&self) -> [u8; 12] {
        let mut input = [0u8; 12];
        input[0] = RequestType::Hello.salt();
        input[1] = self.ecc.0;
        input[2..10].copy_from_slice(self.ebid.as_bytes());
        input[10..].copy_from_slice(&self.time.to_be_bytes());
        input
    }

    pub fn compute_mac(&self, key_for_mac: &[u8]) -> Result<[u8; HELLO_MAC_LENGTH], RobertError> {
        let mac = hmac_sha256(key_for_mac, &[&self.mac_input()])?;
        let mut truncated = [0u8; HELLO_MAC_LENGTH];
        truncated.copy_from_slice(&mac[..HELLO_MAC_LENGTH]);
        Ok(truncated)
    }

    pub fn verify_mac(&self, key_for_mac: &[u8], mac: &[u8]) -> bool {
        mac.len() == HELLO_MAC_LENGTH
            && verify_truncated_hmac_sha256(key_for_mac, &[&self.mac_input()], mac)
    }
}

/// One reception of a hello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessageDetail {
    pub time_sent: u16,
    /// NTP seconds at which the receiving device recorded the hello.
    pub time_received: i64,
    pub mac: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidation {
    /// The EBID belongs to another federation member; nothing was decoded.
    UnsupportedCountry(CountryCode),
    Valid {
        country_code: CountryCode,
        identifier: BluetoothIdentifier,
        invalid_hello_messages: Vec<HelloMessageDetail>,
    },
}

pub struct ContactValidator<'a> {
    clock: &'a RobertClock,
    keys: &'a dyn KeyRepository,
    identities: &'a IdentityService,
    timestamp_tolerance: i64,
    previous_day_key_max_epoch: i32,
}

impl<'a> ContactValidator<'a> {
    pub fn new(
        clock: &'a RobertClock,
        keys: &'a dyn KeyRepository,
        identities: &'a IdentityService,
        timestamp_tolerance: i64,
        previous_day_key_max_epoch: i32,
    ) -> Self {
        Self {
            clock,
            keys,
            identities,
            timestamp_tolerance,
            previous_day_key_max_epoch,
        }
    }

    /// Decode the contact's country code and identity and sort its hellos
    /// into valid and invalid ones.
    ///
    /// The EBID is decoded once per hello, from that hello's reception time.
    /// Hellos that can't be decoded, or that fail the time or MAC checks, are
    /// reported in `invalid_hello_messages`. The contact fails as a whole only
    /// when no hello decodes or when hellos decode to different identifiers.
    pub fn validate(
        &self,
        server_country_code: CountryCode,
        ebid: &Ebid,
        ecc: Ecc,
        hello_messages: &[HelloMessageDetail],
    ) -> Result<ContactValidation, RobertError> {
        let country_code = CountryCodeCipher::new(&self.keys.federation_key()?)?.decrypt(ebid, ecc)?;
        if country_code != server_country_code {
            debug!(country_code = country_code.0, "contact from another country");
            return Ok(ContactValidation::UnsupportedCountry(country_code));
        }
        if hello_messages.is_empty() {
            return Err(RobertError::MalformedInput("contact has no hello message".into()));
        }

        let (identifier, decoded) = self.decode_identifier(ebid, hello_messages)?;
        let bundle = self.identities.find(&identifier.id_a)?;

        let invalid_hello_messages = hello_messages
            .iter()
            .zip(decoded)
            .filter(|(hello, decoded)| {
                if !decoded {
                    return true;
                }
                if !self.received_in_time(identifier.epoch_id, hello) {
                    return true;
                }
                let message = HelloMessage::new(ecc, *ebid, hello.time_sent);
                if !message.verify_mac(bundle.key_for_mac(), &hello.mac) {
                    info!("hello message MAC is invalid");
                    return true;
                }
                false
            })
            .map(|(hello, _)| hello.clone())
            .collect();

        Ok(ContactValidation::Valid {
            country_code,
            identifier,
            invalid_hello_messages,
        })
    }

    /// Decode `ebid` at each hello's reception time.
    ///
    /// Returns the identifier and, per hello, whether it decoded. Hellos that
    /// hit a key or epoch failure are marked and skipped.
    fn decode_identifier(
        &self,
        ebid: &Ebid,
        hello_messages: &[HelloMessageDetail],
    ) -> Result<(BluetoothIdentifier, Vec<bool>), RobertError> {
        let decoder = EbidDecoder::new(self.clock, self.keys);
        let mut identifier: Option<BluetoothIdentifier> = None;
        let mut first_error = None;
        let mut decoded = Vec::with_capacity(hello_messages.len());

        for hello in hello_messages {
            let reception = self.clock.at_ntp_timestamp(hello.time_received);
            let options = LadderOptions::for_hello_message(
                &reception,
                self.timestamp_tolerance,
                self.previous_day_key_max_epoch,
            );
            match decoder.decode(ebid, reception.epoch_id(), options) {
                Ok(current) => {
                    match identifier {
                        None => identifier = Some(current),
                        Some(known) if known != current => {
                            return Err(RobertError::Internal(format!(
                                "hello messages of one contact decode to epochs {} and {}",
                                known.epoch_id, current.epoch_id
                            )));
                        }
                        Some(_) => {}
                    }
                    decoded.push(true);
                }
                Err(e @ (RobertError::NoServerKeyFound { .. } | RobertError::EpochMismatch { .. })) => {
                    info!(
                        time_received = hello.time_received,
                        "hello message EBID could not be decoded: {}", e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    decoded.push(false);
                }
                Err(e) => return Err(e),
            }
        }

        match (identifier, first_error) {
            (Some(identifier), _) => Ok((identifier, decoded)),
            (None, Some(e)) => Err(e),
            (None, None) => Err(RobertError::MalformedInput("contact has no hello message".into())),
        }
    }

    fn received_in_time(&self, ebid_epoch: i32, hello: &HelloMessageDetail) -> bool {
        let reception = self.clock.at_ntp_timestamp(hello.time_received);
        let delta = wrapped_16_bit_distance(hello.time_sent, reception.ntp_16_lsb());
        if i64::from(delta) > self.timestamp_tolerance {
            info!(
                time_sent = hello.time_sent,
                time_received = hello.time_received,
                delta,
                "hello message reception time too far from its send time"
            );
            return false;
        }
        let epoch_distance = (i64::from(reception.epoch_id()) - i64::from(ebid_epoch)).abs();
        if epoch_distance > 1 {
            info!(
                ebid_epoch,
                reception_epoch = reception.epoch_id(),
                "hello message received outside its EBID epoch"
            );
            return false;
        }
        true
    }
}

/// Distance between two 16-bit timestamps on a 2^16 s circle.
fn wrapped_16_bit_distance(a: u16, b: u16) -> u16 {
    let forward = a.wrapping_sub(b);
    forward.min(forward.wrapping_neg())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{RobertInstant, EPOCH_DURATION_SECS};
    use crate::ebid::encrypt_ebid;
    use crate::identity::{ClientKeyBundle, InMemoryIdentityRepository};
    use crate::keys::{KeySet, KeystoreKeyRepository};
    use chrono::NaiveDate;
    use robert_crypto::RegistrationKey;
    use std::sync::Arc;

    const FRANCE: CountryCode = CountryCode(0x21);

    struct Fixture {
        clock: RobertClock,
        keys: Arc<KeystoreKeyRepository>,
        identities: IdentityService,
        bundle: ClientKeyBundle,
    }

    impl Fixture {
        fn new() -> Self {
            let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
            let keys = Arc::new(KeystoreKeyRepository::new(
                KeySet::generate(start, 3).unwrap(),
            ));
            let identities =
                IdentityService::new(keys.clone(), Arc::new(InMemoryIdentityRepository::new()));
            let client = RegistrationKey::generate().unwrap();
            let bundle = identities.create(&client.public_key_sec1()).unwrap();
            Self {
                clock: RobertClock::new(start),
                keys,
                identities,
                bundle,
            }
        }

        fn validator(&self) -> ContactValidator<'_> {
            ContactValidator::new(&self.clock, self.keys.as_ref(), &self.identities, 180, 672)
        }

        fn contact(&self, epoch_id: i32, country_code: CountryCode) -> (Ebid, Ecc) {
            let key = self
                .keys
                .server_key(self.clock.date_for_epoch(epoch_id))
                .unwrap();
            let ebid = encrypt_ebid(&key, epoch_id, &self.bundle.id_a).unwrap();
            let ecc = CountryCodeCipher::new(&self.keys.federation_key().unwrap())
                .unwrap()
                .encrypt(&ebid, country_code)
                .unwrap();
            (ebid, ecc)
        }

        fn hello(&self, ebid: Ebid, ecc: Ecc, sent: RobertInstant, delay: i64) -> HelloMessageDetail {
            let time_sent = sent.ntp_16_lsb();
            let mac = HelloMessage::new(ecc, ebid, time_sent)
                .compute_mac(self.bundle.key_for_mac())
                .unwrap();
            HelloMessageDetail {
                time_sent,
                time_received: sent.ntp_timestamp() + delay,
                mac: mac.to_vec(),
            }
        }
    }

    #[test]
    fn hello_mac_input_layout() {
        let message = HelloMessage::new(Ecc(0xEC), Ebid::new([1, 2, 3, 4, 5, 6, 7, 8]), 0xABCD);
        assert_eq!(hex::encode(message.mac_input()), "01ec0102030405060708abcd");
    }

    #[test]
    fn hello_mac_is_truncated_hmac() {
        let key = [3u8; 32];
        let message = HelloMessage::new(Ecc(1), Ebid::new([2; 8]), 7);
        let full = hmac_sha256(&key, &[&message.mac_input()]).unwrap();
        let mac = message.compute_mac(&key).unwrap();
        assert_eq!(&mac[..], &full[..5]);
        assert!(message.verify_mac(&key, &mac));
        assert!(!message.verify_mac(&key, &full));
        assert!(!message.verify_mac(&key, &mac[..4]));
    }

    #[test]
    fn valid_contact() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let sent = f.clock.at_epoch(100).plus_seconds(120);
        let hellos = vec![f.hello(ebid, ecc, sent, 2), f.hello(ebid, ecc, sent.plus_seconds(60), 1)];

        let result = f.validator().validate(FRANCE, &ebid, ecc, &hellos).unwrap();
        assert_eq!(
            result,
            ContactValidation::Valid {
                country_code: FRANCE,
                identifier: BluetoothIdentifier::new(100, f.bundle.id_a),
                invalid_hello_messages: vec![],
            }
        );
    }

    #[test]
    fn foreign_country_short_circuits() {
        let f = Fixture::new();
        let germany = CountryCode(49);
        let (ebid, ecc) = f.contact(100, germany);
        // No hellos: decoding must stop before they are needed.
        let result = f.validator().validate(FRANCE, &ebid, ecc, &[]).unwrap();
        assert_eq!(result, ContactValidation::UnsupportedCountry(germany));
    }

    #[test]
    fn empty_contact_is_rejected() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let err = f.validator().validate(FRANCE, &ebid, ecc, &[]).unwrap_err();
        assert!(matches!(err, RobertError::MalformedInput(_)));
    }

    #[test]
    fn bad_mac_and_late_reception_are_reported() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let sent = f.clock.at_epoch(100).plus_seconds(10);
        let good = f.hello(ebid, ecc, sent, 1);
        let mut forged = f.hello(ebid, ecc, sent.plus_seconds(5), 1);
        forged.mac[0] ^= 0xFF;
        let late = f.hello(ebid, ecc, sent.plus_seconds(20), 2 * EPOCH_DURATION_SECS);

        let result = f
            .validator()
            .validate(FRANCE, &ebid, ecc, &[good, forged.clone(), late.clone()])
            .unwrap();
        match result {
            ContactValidation::Valid {
                invalid_hello_messages,
                ..
            } => assert_eq!(invalid_hello_messages, vec![forged, late]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reception_delay_is_bounded_by_the_tolerance() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let sent = f.clock.at_epoch(100).plus_seconds(10);
        let on_time = f.hello(ebid, ecc, sent, 180);
        let early = f.hello(ebid, ecc, sent.plus_seconds(400), -180);
        let too_late = f.hello(ebid, ecc, sent, 181);
        let ten_minutes = f.hello(ebid, ecc, sent.plus_seconds(30), 600);

        let result = f
            .validator()
            .validate(
                FRANCE,
                &ebid,
                ecc,
                &[on_time, early, too_late.clone(), ten_minutes.clone()],
            )
            .unwrap();
        match result {
            ContactValidation::Valid {
                identifier,
                invalid_hello_messages,
                ..
            } => {
                assert_eq!(identifier.epoch_id, 100);
                assert_eq!(invalid_hello_messages, vec![too_late, ten_minutes]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn each_hello_is_decoded_at_its_own_reception_time() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let sent = f.clock.at_epoch(100).plus_seconds(10);
        // Received two epochs later: the EBID can't be decoded from there.
        let stale = f.hello(ebid, ecc, sent, 2 * EPOCH_DURATION_SECS);
        let fresh = f.hello(ebid, ecc, sent.plus_seconds(30), 5);

        match f
            .validator()
            .validate(FRANCE, &ebid, ecc, &[stale.clone(), fresh])
            .unwrap()
        {
            ContactValidation::Valid {
                identifier,
                invalid_hello_messages,
                ..
            } => {
                assert_eq!(identifier, BluetoothIdentifier::new(100, f.bundle.id_a));
                assert_eq!(invalid_hello_messages, vec![stale]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn contact_fails_when_no_hello_decodes() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let sent = f.clock.at_epoch(100).plus_seconds(10);
        let hellos = vec![
            f.hello(ebid, ecc, sent, 2 * EPOCH_DURATION_SECS),
            f.hello(ebid, ecc, sent, 3 * EPOCH_DURATION_SECS),
        ];
        let err = f.validator().validate(FRANCE, &ebid, ecc, &hellos).unwrap_err();
        assert!(matches!(err, RobertError::EpochMismatch { .. }));
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn hello_received_just_after_midnight() {
        let f = Fixture::new();
        // Last epoch of 2022-01-01, received 70 s later on 2022-01-02.
        let (ebid, ecc) = f.contact(95, FRANCE);
        let sent = f.clock.at_epoch(96).plus_seconds(-10);
        let hellos = vec![f.hello(ebid, ecc, sent, 70)];

        match f.validator().validate(FRANCE, &ebid, ecc, &hellos).unwrap() {
            ContactValidation::Valid {
                identifier,
                invalid_hello_messages,
                ..
            } => {
                assert_eq!(identifier.epoch_id, 95);
                assert!(invalid_hello_messages.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_identity() {
        let f = Fixture::new();
        let (ebid, ecc) = f.contact(100, FRANCE);
        let hellos = vec![f.hello(ebid, ecc, f.clock.at_epoch(100), 1)];
        f.identities.delete(&f.bundle.id_a).unwrap();
        let err = f.validator().validate(FRANCE, &ebid, ecc, &hellos).unwrap_err();
        assert!(matches!(err, RobertError::UnknownIdentity));
    }

    #[test]
    fn sixteen_bit_distance_wraps() {
        assert_eq!(wrapped_16_bit_distance(100, 100), 0);
        assert_eq!(wrapped_16_bit_distance(100, 280), 180);
        assert_eq!(wrapped_16_bit_distance(280, 100), 180);
        assert_eq!(wrapped_16_bit_distance(0xFFF0, 0x0010), 0x20);
        assert_eq!(wrapped_16_bit_distance(0x0010, 0xFFF0), 0x20);
        assert_eq!(wrapped_16_bit_distance(0, 0x8000), 0x8000);
    }

    #[test]
    fn ten_minute_delay_is_rejected() {
        let f = Fixture::new();
        let sent = f.clock.at("2022-01-02T12:00:00Z".parse().unwrap());
        let hello = |delay: i64| HelloMessageDetail {
            time_sent: sent.ntp_16_lsb(),
            time_received: sent.plus_seconds(delay).ntp_timestamp(),
            mac: vec![0; HELLO_MAC_LENGTH],
        };
        let validator = f.validator();
        let epoch = sent.epoch_id();
        assert!(validator.received_in_time(epoch, &hello(180)));
        assert!(validator.received_in_time(epoch, &hello(-180)));
        assert!(!validator.received_in_time(epoch, &hello(181)));
        assert!(!validator.received_in_time(epoch, &hello(600)));
        // In time, but two epochs away from the EBID's epoch.
        assert!(!validator.received_in_time(epoch - 2, &hello(0)));
        assert!(validator.received_in_time(epoch - 1, &hello(0)));
    }

}
