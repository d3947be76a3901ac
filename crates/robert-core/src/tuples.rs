//! Ephemeral tuple bundles.
//!
//! A bundle covers the rest of the start epoch's day plus whole days after
//! it. Days without a provisioned key are skipped. The tuples are sorted by
//! epoch, serialized to JSON and sealed with AES-256-GCM under the client's
//! `key_for_tuples`, giving `IV (12 B) ‖ ciphertext ‖ tag`.

use chrono::NaiveDate;
use robert_crypto::{aes_gcm_decrypt, aes_gcm_encrypt};
use tracing::{debug, warn};

use crate::clock::{RobertClock, EPOCHS_PER_DAY};
use crate::config::DEFAULT_MAX_BUNDLE_DAYS;
use crate::country_code::CountryCodeCipher;
use crate::ebid::encrypt_ebid;
use crate::error::RobertError;
use crate::identity::ClientKeyBundle;
use crate::keys::{day_keys, KeyRepository, ServerKey};
use crate::model::{CountryCode, EphemeralTuple, IdA, MAX_EBID_EPOCH};

struct DailyTuples {
    date: NaiveDate,
    first_epoch: i32,
    epoch_count: i32,
    key: Option<ServerKey>,
}

impl DailyTuples {
    fn generate(
        &self,
        key: &ServerKey,
        id_a: &IdA,
        country_code: CountryCode,
        country_codes: &CountryCodeCipher,
    ) -> Result<Vec<EphemeralTuple>, RobertError> {
        (self.first_epoch..self.first_epoch + self.epoch_count)
            .map(|epoch_id| {
                let ebid = encrypt_ebid(key, epoch_id, id_a)?;
                let ecc = country_codes.encrypt(&ebid, country_code)?;
                Ok(EphemeralTuple::new(epoch_id, ebid, ecc))
            })
            .collect()
    }
}

pub struct TupleGenerator<'a> {
    clock: &'a RobertClock,
    keys: &'a dyn KeyRepository,
    parallel: bool,
    max_days: u32,
}

impl<'a> TupleGenerator<'a> {
    pub fn new(clock: &'a RobertClock, keys: &'a dyn KeyRepository) -> Self {
        Self {
            clock,
            keys,
            parallel: true,
            max_days: DEFAULT_MAX_BUNDLE_DAYS,
        }
    }

    /// Generate each day on its own thread.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Largest `number_of_days` a request may ask for.
    pub fn max_days(mut self, max_days: u32) -> Self {
        self.max_days = max_days;
        self
    }

    fn plan(&self, start_epoch: i32, number_of_days: u32) -> Result<Vec<DailyTuples>, RobertError> {
        let epochs_per_day = i64::from(EPOCHS_PER_DAY);
        let start = i64::from(start_epoch);
        let remaining = i64::from(self.clock.remaining_epochs_for_day(start_epoch));
        let last_epoch = start + remaining - 1 + (i64::from(number_of_days) - 1) * epochs_per_day;
        if last_epoch > i64::from(MAX_EBID_EPOCH) {
            return Err(RobertError::MalformedInput(format!(
                "bundle from epoch {} over {} days ends at epoch {}, past {}",
                start_epoch, number_of_days, last_epoch, MAX_EBID_EPOCH
            )));
        }

        day_keys(self.keys, self.clock, start_epoch, number_of_days)
            .into_iter()
            .zip(0i64..)
            .map(|((date, key), day)| {
                let (first_epoch, epoch_count) = if day == 0 {
                    (start, remaining)
                } else {
                    (start + remaining + (day - 1) * epochs_per_day, epochs_per_day)
                };
                Ok(DailyTuples {
                    date,
                    first_epoch: epoch_in_range(first_epoch)?,
                    epoch_count: epoch_in_range(epoch_count)?,
                    key,
                })
            })
            .collect()
    }

    /// Tuples for `id_a` from `start_epoch` over `number_of_days` days, sorted by epoch.
    pub fn generate_tuples(
        &self,
        id_a: &IdA,
        start_epoch: i32,
        number_of_days: i32,
        country_code: CountryCode,
    ) -> Result<Vec<EphemeralTuple>, RobertError> {
        if !(0..=MAX_EBID_EPOCH).contains(&start_epoch) {
            return Err(RobertError::MalformedInput(format!(
                "start epoch {} outside 0..={}",
                start_epoch, MAX_EBID_EPOCH
            )));
        }
        let number_of_days = u32::try_from(number_of_days)
            .ok()
            .filter(|days| (1..=self.max_days).contains(days))
            .ok_or_else(|| {
                RobertError::MalformedInput(format!(
                    "number of days must be within 1..={}, got {}",
                    self.max_days, number_of_days
                ))
            })?;

        let country_codes = CountryCodeCipher::new(&self.keys.federation_key()?)?;
        let plan = self.plan(start_epoch, number_of_days)?;

        let missing: Vec<String> = plan
            .iter()
            .filter(|day| day.key.is_none())
            .map(|day| day.date.to_string())
            .collect();
        if !missing.is_empty() {
            warn!(
                start_epoch,
                number_of_days,
                missing_server_keys = %missing.join(", "),
                "tuples request can't be fully honored"
            );
        }

        let available: Vec<(&DailyTuples, &ServerKey)> = plan
            .iter()
            .filter_map(|day| day.key.as_ref().map(|key| (day, key)))
            .collect();

        let daily = if self.parallel && available.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = available
                    .iter()
                    .map(|(day, key)| {
                        let country_codes = &country_codes;
                        scope.spawn(move || day.generate(key, id_a, country_code, country_codes))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().map_err(|_| {
                            RobertError::Internal("tuple generation worker panicked".into())
                        })?
                    })
                    .collect::<Result<Vec<_>, RobertError>>()
            })?
        } else {
            available
                .iter()
                .map(|(day, key)| day.generate(key, id_a, country_code, &country_codes))
                .collect::<Result<Vec<_>, RobertError>>()?
        };

        let mut tuples: Vec<EphemeralTuple> = daily.into_iter().flatten().collect();
        tuples.sort_by_key(|tuple| tuple.epoch_id);
        debug!(count = tuples.len(), "generated ephemeral tuples");
        Ok(tuples)
    }

    /// Generate and seal a bundle for `bundle`'s identity.
    pub fn generate(
        &self,
        bundle: &ClientKeyBundle,
        start_epoch: i32,
        number_of_days: i32,
        country_code: CountryCode,
    ) -> Result<Vec<u8>, RobertError> {
        let tuples =
            self.generate_tuples(&bundle.id_a, start_epoch, number_of_days, country_code)?;
        if tuples.is_empty() {
            return Err(RobertError::EmptyBundle);
        }
        let json = serde_json::to_vec(&tuples)?;
        Ok(aes_gcm_encrypt(bundle.key_for_tuples(), &json)?)
    }
}

fn epoch_in_range(epoch: i64) -> Result<i32, RobertError> {
    i32::try_from(epoch)
        .map_err(|_| RobertError::Internal(format!("epoch {} does not fit in 32 bits", epoch)))
}

/// Open a sealed bundle, as a client does with its `key_for_tuples`.
pub fn decrypt_tuple_bundle(
    key_for_tuples: &[u8],
    sealed: &[u8],
) -> Result<Vec<EphemeralTuple>, RobertError> {
    let json = aes_gcm_decrypt(key_for_tuples, sealed)?;
    Ok(serde_json::from_slice(&json)?)
}
