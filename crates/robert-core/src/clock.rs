//! Epoch clock.
//!
//! Time is split into 15-minute epochs counted from midnight UTC of the
//! service start date. Wire timestamps are NTP seconds (era 0, counted from
//! 1900-01-01T00:00:00Z).

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::config::CryptoConfig;

/// Length of one epoch in seconds.
pub const EPOCH_DURATION_SECS: i64 = 900;

/// Number of epochs in a UTC day.
pub const EPOCHS_PER_DAY: i32 = 96;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Seconds between the NTP era 0 origin (1900-01-01) and the unix epoch.
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Clock aware of the service start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RobertClock {
    start_date: NaiveDate,
    start_ntp: i64,
}

impl RobertClock {
    pub fn new(start_date: NaiveDate) -> Self {
        let start_unix = start_date.and_time(NaiveTime::MIN).and_utc().timestamp();
        Self {
            start_date,
            start_ntp: start_unix + NTP_UNIX_OFFSET,
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.service_start_date)
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn now(&self) -> RobertInstant {
        self.at(Utc::now())
    }

    /// Sub-second precision is dropped.
    pub fn at(&self, time: DateTime<Utc>) -> RobertInstant {
        self.at_unix_timestamp(time.timestamp())
    }

    pub fn at_unix_timestamp(&self, unix_seconds: i64) -> RobertInstant {
        self.at_ntp_timestamp(unix_seconds.saturating_add(NTP_UNIX_OFFSET))
    }

    pub fn at_ntp_timestamp(&self, ntp_seconds: i64) -> RobertInstant {
        RobertInstant {
            clock: *self,
            ntp: ntp_seconds,
        }
    }

    /// Read a 4-byte big-endian truncated NTP timestamp.
    ///
    /// Only meaningful for instants before 2036-02-07 (NTP era 0).
    pub fn at_time32(&self, time32: [u8; 4]) -> RobertInstant {
        self.at_ntp_timestamp(i64::from(u32::from_be_bytes(time32)))
    }

    /// Start instant of `epoch_id`.
    pub fn at_epoch(&self, epoch_id: i32) -> RobertInstant {
        self.at_ntp_timestamp(self.start_ntp + i64::from(epoch_id) * EPOCH_DURATION_SECS)
    }

    pub fn epoch_id(&self, time: DateTime<Utc>) -> i32 {
        self.at(time).epoch_id()
    }

    pub fn instant_for_epoch(&self, epoch_id: i32) -> RobertInstant {
        self.at_epoch(epoch_id)
    }

    /// Whole epochs from `begin` to `end`, truncated toward zero.
    pub fn epochs_between(&self, begin: &RobertInstant, end: &RobertInstant) -> i64 {
        (end.ntp - begin.ntp) / EPOCH_DURATION_SECS
    }

    /// Epochs left in the UTC day of `epoch_id`, the epoch itself included.
    pub fn remaining_epochs_for_day(&self, epoch_id: i32) -> i32 {
        EPOCHS_PER_DAY - epoch_id.rem_euclid(EPOCHS_PER_DAY)
    }

    /// UTC date `epoch_id` falls on.
    pub fn date_for_epoch(&self, epoch_id: i32) -> NaiveDate {
        add_days(
            self.start_date,
            i64::from(epoch_id.div_euclid(EPOCHS_PER_DAY)),
        )
    }
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(if days < 0 {
            NaiveDate::MIN
        } else {
            NaiveDate::MAX
        })
}

/// A point in time with second precision, bound to a [`RobertClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RobertInstant {
    ntp: i64,
    clock: RobertClock,
}

impl RobertInstant {
    pub fn ntp_timestamp(&self) -> i64 {
        self.ntp
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.ntp - NTP_UNIX_OFFSET
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.unix_timestamp(), 0)
    }

    /// Epoch index, floored; instants before the service start give negative ids.
    pub fn epoch_id(&self) -> i32 {
        let epoch = self.ntp.saturating_sub(self.clock.start_ntp).div_euclid(EPOCH_DURATION_SECS);
        epoch.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Low 32 bits of the NTP seconds, big-endian.
    pub fn time32(&self) -> [u8; 4] {
        (self.ntp as u32).to_be_bytes()
    }

    /// The 16 least significant bits of the NTP seconds.
    pub fn ntp_16_lsb(&self) -> u16 {
        self.ntp as u16
    }

    pub fn date(&self) -> NaiveDate {
        let days = self.ntp.saturating_sub(self.clock.start_ntp).div_euclid(SECONDS_PER_DAY);
        add_days(self.clock.start_date, days)
    }

    /// Seconds elapsed since the beginning of the UTC day.
    pub fn seconds_of_day(&self) -> i64 {
        self.ntp.rem_euclid(SECONDS_PER_DAY)
    }

    pub fn plus_seconds(&self, seconds: i64) -> Self {
        self.clock.at_ntp_timestamp(self.ntp.saturating_add(seconds))
    }

    pub fn plus_epochs(&self, epochs: i64) -> Self {
        self.plus_seconds(epochs.saturating_mul(EPOCH_DURATION_SECS))
    }

    pub fn plus_days(&self, days: i64) -> Self {
        self.plus_seconds(days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn truncated_to_epoch(&self) -> Self {
        let offset = (self.ntp - self.clock.start_ntp).rem_euclid(EPOCH_DURATION_SECS);
        self.clock.at_ntp_timestamp(self.ntp - offset)
    }

    pub fn truncated_to_day(&self) -> Self {
        self.clock
            .at_ntp_timestamp(self.ntp - self.ntp.rem_euclid(SECONDS_PER_DAY))
    }
}

impl fmt::Display for RobertInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(time) => write!(
                f,
                "{}={}E",
                time.format("%Y-%m-%dT%H:%M:%SZ"),
                self.epoch_id()
            ),
            None => write!(f, "ntp:{}={}E", self.ntp, self.epoch_id()),
        }
    }
}
