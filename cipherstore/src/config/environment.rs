//! Environment variable handling for configuration overrides.
//!
//! `CIPHERSTORE_*` variables override values read from the configuration
//! file.

use std::env;

use crate::config::schema::StorageConfig;
use crate::error::{Error, Result};

/// Handles environment variable overrides for configuration.
///
/// # Examples
///
/// ```no_run
/// use cipherstore::config::{EnvironmentConfig, StorageConfig};
///
/// let mut config = StorageConfig::default();
/// EnvironmentConfig::apply_overrides(&mut config).unwrap();
/// ```
pub struct EnvironmentConfig;

impl EnvironmentConfig {
    /// Data directory override (consulted by the loader and the CLI).
    pub const DATA_DIR: &'static str = "CIPHERSTORE_DATA_DIR";
    /// Database file name.
    pub const FILE_NAME: &'static str = "CIPHERSTORE_FILE_NAME";
    /// Maximum concurrent readers.
    pub const MAX_READERS: &'static str = "CIPHERSTORE_MAX_READERS";
    /// Busy timeout in milliseconds.
    pub const BUSY_TIMEOUT_MS: &'static str = "CIPHERSTORE_BUSY_TIMEOUT_MS";
    /// Slow-operation threshold in milliseconds.
    pub const SLOW_OPERATION_MS: &'static str = "CIPHERSTORE_SLOW_OPERATION_MS";
    /// Keychain service name.
    pub const KEYCHAIN_SERVICE: &'static str = "CIPHERSTORE_KEYCHAIN_SERVICE";

    /// Apply environment variable overrides to config.
    ///
    /// # Errors
    ///
    /// Returns an error if any numeric variable does not parse.
    pub fn apply_overrides(config: &mut StorageConfig) -> Result<()> {
        if let Ok(file_name) = env::var(Self::FILE_NAME) {
            config.file_name = file_name;
        }

        if let Ok(value) = env::var(Self::MAX_READERS) {
            config.max_readers = Self::parse_number(Self::MAX_READERS, &value)?;
        }

        if let Ok(value) = env::var(Self::BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = Self::parse_number(Self::BUSY_TIMEOUT_MS, &value)?;
        }

        if let Ok(value) = env::var(Self::SLOW_OPERATION_MS) {
            config.slow_operation_threshold_ms =
                Self::parse_number(Self::SLOW_OPERATION_MS, &value)?;
        }

        if let Ok(service) = env::var(Self::KEYCHAIN_SERVICE) {
            config.keychain_service = service;
        }

        Ok(())
    }

    fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
        value.trim().parse().map_err(|_| Error::Validation {
            field: field.into(),
            message: format!("Must be a non-negative integer, got '{value}'"),
        })
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_numbers_roundtrip(value in any::<u32>()) {
            let parsed: u64 = EnvironmentConfig::parse_number("test", &value.to_string()).unwrap();
            prop_assert_eq!(parsed, u64::from(value));
        }

        #[test]
        fn prop_non_numeric_rejected(value in "[a-zA-Z]{1,12}") {
            let parsed: Result<u64> = EnvironmentConfig::parse_number("test", &value);
            prop_assert!(parsed.is_err());
        }
    }
}
