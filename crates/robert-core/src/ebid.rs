//! EBID codec and epoch matching.
//!
//! An EBID is the day key encryption of `epoch (24 bits) ‖ idA (40 bits)`.
//! Decoding checks the recovered epoch against the one the caller asserts,
//! tolerating bounded clock skew through a fixed sequence of retries:
//!
//! 1. decrypt with the day key of the asserted epoch
//! 2. accept an off-by-one epoch when overlap is enabled
//! 3. retry once with the previous day's key when allowed
//! 4. retry once with the asserted epoch shifted by the adjacent hint, all
//!    tolerances disabled
//!
//! A missing day key on any attempt ends decoding with `NoServerKeyFound`.

use tracing::{debug, info};

use crate::clock::{RobertClock, RobertInstant, SECONDS_PER_DAY};
use crate::error::RobertError;
use crate::keys::{resolve_day_key, KeyRepository, ServerKey};
use crate::model::{BluetoothIdentifier, Ebid, IdA};

const SECONDS_PER_HOUR: i64 = 3_600;

/// Encrypt `(epoch_id, id_a)` under a day key.
pub fn encrypt_ebid(key: &ServerKey, epoch_id: i32, id_a: &IdA) -> Result<Ebid, RobertError> {
    let block = BluetoothIdentifier::new(epoch_id, *id_a).pack();
    Ok(Ebid::new(key.cipher()?.encrypt_block(&block)))
}

/// Decrypt an EBID under a day key, with no epoch check.
pub fn decrypt_ebid(key: &ServerKey, ebid: &Ebid) -> Result<BluetoothIdentifier, RobertError> {
    let block = key.cipher()?.decrypt_block(ebid.as_bytes());
    Ok(BluetoothIdentifier::unpack(&block))
}

/// Direction of the last-resort epoch retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentEpoch {
    Previous,
    Next,
}

impl AdjacentEpoch {
    fn offset(self) -> i32 {
        match self {
            AdjacentEpoch::Previous => -1,
            AdjacentEpoch::Next => 1,
        }
    }

    /// `Previous` when `reception` is within `tolerance` seconds after the
    /// start of its UTC day, `Next` when within `tolerance` before its end.
    pub fn from_reception_time(reception: &RobertInstant, tolerance: i64) -> Option<Self> {
        let seconds = reception.seconds_of_day();
        if seconds < SECONDS_PER_HOUR && seconds < tolerance {
            Some(AdjacentEpoch::Previous)
        } else if seconds >= SECONDS_PER_DAY - SECONDS_PER_HOUR
            && SECONDS_PER_DAY - seconds < tolerance
        {
            Some(AdjacentEpoch::Next)
        } else {
            None
        }
    }
}

/// Which tolerance rungs a decode may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LadderOptions {
    /// Accept an EBID epoch one away from the asserted epoch.
    pub allow_epoch_overlap: bool,
    /// Retry once with the previous day's key.
    pub previous_day_key: bool,
    /// Retry once with the asserted epoch shifted in this direction.
    pub adjacent_epoch: Option<AdjacentEpoch>,
}

impl LadderOptions {
    /// Options for authenticated requests: exact epoch, previous-day key
    /// only for epochs in `0..=previous_day_key_max_epoch`.
    pub fn for_auth_request(epoch_id: i32, previous_day_key_max_epoch: i32) -> Self {
        Self {
            allow_epoch_overlap: false,
            previous_day_key: (0..=previous_day_key_max_epoch).contains(&epoch_id),
            adjacent_epoch: None,
        }
    }

    /// Options for hello messages received at `reception`.
    pub fn for_hello_message(
        reception: &RobertInstant,
        tolerance: i64,
        previous_day_key_max_epoch: i32,
    ) -> Self {
        let epoch_id = reception.epoch_id();
        Self {
            allow_epoch_overlap: true,
            previous_day_key: (0..=previous_day_key_max_epoch).contains(&epoch_id),
            adjacent_epoch: AdjacentEpoch::from_reception_time(reception, tolerance),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    epoch_id: i32,
    use_previous_day_key: bool,
    previous_day_key_allowed: bool,
    allow_epoch_overlap: bool,
    adjacent_epoch: Option<AdjacentEpoch>,
}

/// Decodes EBIDs against the day keys of a [`KeyRepository`].
pub struct EbidDecoder<'a> {
    clock: &'a RobertClock,
    keys: &'a dyn KeyRepository,
}

impl<'a> EbidDecoder<'a> {
    pub fn new(clock: &'a RobertClock, keys: &'a dyn KeyRepository) -> Self {
        Self { clock, keys }
    }

    /// Decrypt `ebid` and match its epoch against `epoch_id`.
    ///
    /// On success the returned identifier carries the epoch found inside the
    /// EBID, which differs from `epoch_id` only through the overlap rung.
    pub fn decode(
        &self,
        ebid: &Ebid,
        epoch_id: i32,
        options: LadderOptions,
    ) -> Result<BluetoothIdentifier, RobertError> {
        let mut attempt = Attempt {
            epoch_id,
            use_previous_day_key: false,
            previous_day_key_allowed: options.previous_day_key,
            allow_epoch_overlap: options.allow_epoch_overlap,
            adjacent_epoch: options.adjacent_epoch,
        };

        // First try plus at most the previous-day and adjacent-epoch retries.
        for _ in 0..3 {
            let date = self.clock.date_for_epoch(attempt.epoch_id);
            let day_offset = if attempt.use_previous_day_key { -1 } else { 0 };
            let Some((key_date, key)) = resolve_day_key(self.keys, date, day_offset) else {
                return Err(RobertError::NoServerKeyFound {
                    date: date + chrono::Duration::days(day_offset),
                });
            };

            let bid = decrypt_ebid(&key, ebid)?;
            if bid.epoch_id == attempt.epoch_id {
                return Ok(bid);
            }
            info!(
                ebid_epoch = bid.epoch_id,
                request_epoch = attempt.epoch_id,
                key_date = %key_date,
                "epoch from EBID and request epoch do not match"
            );

            if attempt.allow_epoch_overlap
                && (i64::from(attempt.epoch_id) - i64::from(bid.epoch_id)).abs() == 1
            {
                return Ok(bid);
            }

            if attempt.previous_day_key_allowed && !attempt.use_previous_day_key {
                debug!("retrying EBID decryption with previous day key");
                attempt.use_previous_day_key = true;
                attempt.previous_day_key_allowed = false;
                continue;
            }

            match attempt.adjacent_epoch {
                Some(adjacent) => {
                    debug!(?adjacent, "retrying EBID decryption with adjacent epoch");
                    attempt = Attempt {
                        epoch_id: attempt.epoch_id.saturating_add(adjacent.offset()),
                        use_previous_day_key: false,
                        previous_day_key_allowed: false,
                        allow_epoch_overlap: false,
                        adjacent_epoch: None,
                    };
                }
                None => {
                    return Err(RobertError::EpochMismatch {
                        auth_epoch: epoch_id,
                        ebid_epoch: bid.epoch_id,
                    })
                }
            }
        }

        Err(RobertError::Internal(
            "EBID epoch matching exceeded its retry bound".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeySet, KeystoreKeyRepository};
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()
    }

    struct Fixture {
        clock: RobertClock,
        keys: KeystoreKeyRepository,
        id_a: IdA,
    }

    impl Fixture {
        fn new(days: u32) -> Self {
            Self {
                clock: RobertClock::new(start()),
                keys: KeystoreKeyRepository::new(KeySet::generate(start(), days).unwrap()),
                id_a: IdA::new([1, 2, 3, 4, 5]),
            }
        }

        fn key_for_epoch(&self, epoch_id: i32) -> ServerKey {
            self.keys
                .server_key(self.clock.date_for_epoch(epoch_id))
                .unwrap()
        }

        fn ebid(&self, epoch_id: i32) -> Ebid {
            encrypt_ebid(&self.key_for_epoch(epoch_id), epoch_id, &self.id_a).unwrap()
        }

        fn decoder(&self) -> EbidDecoder<'_> {
            EbidDecoder::new(&self.clock, &self.keys)
        }
    }

    #[test]
    fn encrypt_then_decrypt_recovers_identifier() {
        let f = Fixture::new(1);
        let key = f.key_for_epoch(10);
        let ebid = encrypt_ebid(&key, 10, &f.id_a).unwrap();
        assert_eq!(
            decrypt_ebid(&key, &ebid).unwrap(),
            BluetoothIdentifier::new(10, f.id_a)
        );
    }

    #[test]
    fn exact_epoch_matches() {
        let f = Fixture::new(2);
        let bid = f
            .decoder()
            .decode(&f.ebid(100), 100, LadderOptions::default())
            .unwrap();
        assert_eq!(bid, BluetoothIdentifier::new(100, f.id_a));
    }

    #[test]
    fn overlap_accepts_next_epoch_and_reports_ebid_epoch() {
        let f = Fixture::new(2);
        let options = LadderOptions {
            allow_epoch_overlap: true,
            ..LadderOptions::default()
        };
        let bid = f.decoder().decode(&f.ebid(100), 101, options).unwrap();
        assert_eq!(bid.epoch_id, 100);
    }

    #[test]
    fn without_overlap_off_by_one_is_a_mismatch() {
        let f = Fixture::new(2);
        let err = f
            .decoder()
            .decode(&f.ebid(100), 101, LadderOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            RobertError::EpochMismatch {
                auth_epoch: 101,
                ebid_epoch: 100
            }
        ));
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn previous_day_key_rescues_rollover_ebid() {
        let f = Fixture::new(3);
        // Epoch 96 is the first epoch of day 2, encrypted with day 1's key.
        let ebid = encrypt_ebid(&f.key_for_epoch(95), 96, &f.id_a).unwrap();

        let err = f
            .decoder()
            .decode(&ebid, 96, LadderOptions::default())
            .unwrap_err();
        assert!(matches!(err, RobertError::EpochMismatch { .. }));

        let bid = f
            .decoder()
            .decode(&ebid, 96, LadderOptions::for_auth_request(96, 672))
            .unwrap();
        assert_eq!(bid, BluetoothIdentifier::new(96, f.id_a));
    }

    #[test]
    fn previous_day_rung_needs_the_previous_day_key() {
        let f = Fixture::new(1);
        let ebid = f.ebid(10);
        let err = f
            .decoder()
            .decode(&ebid, 11, LadderOptions::for_auth_request(11, 672))
            .unwrap_err();
        assert!(matches!(err, RobertError::NoServerKeyFound { date } if date == NaiveDate::from_ymd_opt(2021, 12, 31).unwrap()));
        assert_eq!(err.code(), 430);
    }

    #[test]
    fn previous_day_rung_is_limited_to_early_epochs() {
        assert!(LadderOptions::for_auth_request(0, 672).previous_day_key);
        assert!(LadderOptions::for_auth_request(672, 672).previous_day_key);
        assert!(!LadderOptions::for_auth_request(673, 672).previous_day_key);
        assert!(!LadderOptions::for_auth_request(-1, 672).previous_day_key);
    }

    #[test]
    fn adjacent_hint_retries_with_shifted_epoch() {
        let f = Fixture::new(3);
        // EBID for the last epoch of day 1, request asserts the first epoch of day 2.
        let ebid = f.ebid(95);
        let options = LadderOptions {
            adjacent_epoch: Some(AdjacentEpoch::Previous),
            ..LadderOptions::default()
        };
        let bid = f.decoder().decode(&ebid, 96, options).unwrap();
        assert_eq!(bid.epoch_id, 95);

        let options = LadderOptions {
            adjacent_epoch: Some(AdjacentEpoch::Next),
            ..LadderOptions::default()
        };
        let bid = f.decoder().decode(&f.ebid(96), 95, options).unwrap();
        assert_eq!(bid.epoch_id, 96);
    }

    #[test]
    fn adjacent_retry_does_not_chain_further() {
        let f = Fixture::new(3);
        let options = LadderOptions {
            allow_epoch_overlap: true,
            adjacent_epoch: Some(AdjacentEpoch::Previous),
            ..LadderOptions::default()
        };
        // Two epochs off: overlap does not apply, one adjacent retry is not enough.
        let err = f.decoder().decode(&f.ebid(100), 102, options).unwrap_err();
        assert!(matches!(err, RobertError::EpochMismatch { auth_epoch: 102, .. }));
    }

    #[test]
    fn missing_day_key_is_reported_not_mismatched() {
        let f = Fixture::new(1);
        let err = f
            .decoder()
            .decode(&f.ebid(10), 96 * 30, LadderOptions::default())
            .unwrap_err();
        assert!(matches!(err, RobertError::NoServerKeyFound { .. }));
    }

    #[test]
    fn foreign_key_ebid_is_a_mismatch() {
        let f = Fixture::new(1);
        let other = ServerKey::new([42u8; 24]);
        let ebid = encrypt_ebid(&other, 10, &f.id_a).unwrap();
        assert!(f
            .decoder()
            .decode(&ebid, 10, LadderOptions::default())
            .is_err());
    }

    #[test]
    fn adjacent_hint_from_reception_time() {
        let clock = RobertClock::new(start());
        let at = |s: &str| clock.at(s.parse().unwrap());
        assert_eq!(
            AdjacentEpoch::from_reception_time(&at("2022-01-05T00:02:59Z"), 180),
            Some(AdjacentEpoch::Previous)
        );
        assert_eq!(
            AdjacentEpoch::from_reception_time(&at("2022-01-05T00:03:00Z"), 180),
            None
        );
        assert_eq!(
            AdjacentEpoch::from_reception_time(&at("2022-01-05T23:57:01Z"), 180),
            Some(AdjacentEpoch::Next)
        );
        assert_eq!(
            AdjacentEpoch::from_reception_time(&at("2022-01-05T23:57:00Z"), 180),
            None
        );
        assert_eq!(
            AdjacentEpoch::from_reception_time(&at("2022-01-05T12:00:00Z"), 180),
            None
        );
    }
}
