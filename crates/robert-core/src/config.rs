//! Crypto-core configuration.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RobertError;

/// Default server country code (33, France).
pub const DEFAULT_SERVER_COUNTRY_CODE: u8 = 0x21;

/// Default tolerance in seconds around day boundaries for hello messages.
pub const DEFAULT_HELLO_TIMESTAMP_TOLERANCE: i64 = 180;

/// Default upper bound on request epochs for which the previous day's key is tried.
pub const DEFAULT_PREVIOUS_DAY_KEY_MAX_EPOCH: i32 = 672;

/// Default cap on the number of days a single tuple bundle may span.
pub const DEFAULT_MAX_BUNDLE_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CryptoConfig {
    /// UTC date whose midnight starts epoch 0.
    pub service_start_date: NaiveDate,
    pub server_country_code: u8,
    pub hello_message_timestamp_tolerance: i64,
    /// The previous-day key is only tried for request epochs in `0..=previous_day_key_max_epoch`.
    pub previous_day_key_max_epoch: i32,
    pub parallel_tuple_generation: bool,
    pub max_bundle_days: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            service_start_date: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap_or_default(),
            server_country_code: DEFAULT_SERVER_COUNTRY_CODE,
            hello_message_timestamp_tolerance: DEFAULT_HELLO_TIMESTAMP_TOLERANCE,
            previous_day_key_max_epoch: DEFAULT_PREVIOUS_DAY_KEY_MAX_EPOCH,
            parallel_tuple_generation: true,
            max_bundle_days: DEFAULT_MAX_BUNDLE_DAYS,
        }
    }
}

impl CryptoConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, RobertError> {
        let config: Self =
            toml::from_str(content).map_err(|e| RobertError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RobertError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RobertError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), RobertError> {
        if self.hello_message_timestamp_tolerance < 0 {
            return Err(RobertError::Config(
                "hello-message-timestamp-tolerance must not be negative".into(),
            ));
        }
        if self.previous_day_key_max_epoch < 0 {
            return Err(RobertError::Config(
                "previous-day-key-max-epoch must not be negative".into(),
            ));
        }
        if self.max_bundle_days == 0 {
            return Err(RobertError::Config(
                "max-bundle-days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = CryptoConfig::from_toml_str(
            r#"
            service-start-date = "2022-01-01"
            server-country-code = 49
            hello-message-timestamp-tolerance = 60
            previous-day-key-max-epoch = 96
            parallel-tuple-generation = false
            max-bundle-days = 7
            "#,
        )
        .unwrap();
        assert_eq!(
            config.service_start_date,
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()
        );
        assert_eq!(config.server_country_code, 49);
        assert_eq!(config.hello_message_timestamp_tolerance, 60);
        assert_eq!(config.previous_day_key_max_epoch, 96);
        assert!(!config.parallel_tuple_generation);
        assert_eq!(config.max_bundle_days, 7);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = CryptoConfig::from_toml_str(r#"service-start-date = "2021-05-10""#).unwrap();
        assert_eq!(config.server_country_code, DEFAULT_SERVER_COUNTRY_CODE);
        assert_eq!(config.hello_message_timestamp_tolerance, 180);
        assert_eq!(config.previous_day_key_max_epoch, 672);
        assert!(config.parallel_tuple_generation);
        assert_eq!(config.max_bundle_days, DEFAULT_MAX_BUNDLE_DAYS);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            CryptoConfig::from_toml_str("hello-message-timestamp-tolerance = -1"),
            Err(RobertError::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_toml_str(r#"service-start-date = "not a date""#),
            Err(RobertError::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_toml_str("server-country-code = 300"),
            Err(RobertError::Config(_))
        ));
        assert!(matches!(
            CryptoConfig::from_toml_str("max-bundle-days = 0"),
            Err(RobertError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = CryptoConfig::from_file("/nonexistent/robert.toml").unwrap_err();
        assert_eq!(err.code(), 500);
    }
}
