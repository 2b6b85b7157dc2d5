//! Configuration schema definitions.
//!
//! This module defines the settings that control where the database lives,
//! how the connection pool is tuned, and which keychain entry holds the key
//! spec.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default database file name inside the database directory.
pub const DEFAULT_FILE_NAME: &str = "cipherstore.sqlite";

/// Default keychain service name.
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "cipherstore";

/// Default keychain entry holding the key spec.
pub const DEFAULT_KEYCHAIN_KEY: &str = "db-cipher-key-spec";

/// Storage configuration.
///
/// Every field has a default, so a configuration file only needs to list
/// the settings it changes.
///
/// # Examples
///
/// ```
/// use cipherstore::config::StorageConfig;
/// use std::time::Duration;
///
/// let config = StorageConfig::new("/tmp/cipherstore");
/// assert_eq!(config.max_readers, 10);
/// assert_eq!(config.busy_timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root data directory. The database lives in `<data_dir>/database`.
    pub data_dir: PathBuf,

    /// Name of the main database file.
    pub file_name: String,

    /// Maximum number of concurrent reader connections.
    pub max_readers: usize,

    /// How long a writer waits for the write lock (milliseconds).
    pub busy_timeout_ms: u64,

    /// Threshold after which an operation is reported as slow (milliseconds).
    pub slow_operation_threshold_ms: u64,

    /// Pause before failing when the keychain cannot be used (milliseconds).
    pub key_failure_backoff_ms: u64,

    /// Keychain service name.
    pub keychain_service: String,

    /// Keychain entry holding the key spec.
    pub keychain_key: String,

    /// Service name of a legacy keychain entry to migrate on first read.
    pub legacy_keychain_service: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".cipherstore"),
            file_name: DEFAULT_FILE_NAME.to_string(),
            max_readers: 10,
            busy_timeout_ms: 5000,
            slow_operation_threshold_ms: 3000,
            key_failure_backoff_ms: 1000,
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            keychain_key: DEFAULT_KEYCHAIN_KEY.to_string(),
            legacy_keychain_service: None,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at `data_dir` with default settings.
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Sets the slow-operation threshold.
    #[must_use]
    pub fn with_slow_operation_threshold(mut self, threshold: Duration) -> Self {
        self.slow_operation_threshold_ms = duration_to_millis(threshold);
        self
    }

    /// Sets the pause applied before keychain failures are reported.
    #[must_use]
    pub fn with_key_failure_backoff(mut self, backoff: Duration) -> Self {
        self.key_failure_backoff_ms = duration_to_millis(backoff);
        self
    }

    /// Sets the keychain service and entry names.
    #[must_use]
    pub fn with_keychain_entry(mut self, service: impl Into<String>, key: impl Into<String>) -> Self {
        self.keychain_service = service.into();
        self.keychain_key = key.into();
        self
    }

    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Slow-operation threshold as a [`Duration`].
    #[must_use]
    pub const fn slow_operation_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_operation_threshold_ms)
    }

    /// Keychain failure backoff as a [`Duration`].
    #[must_use]
    pub const fn key_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.key_failure_backoff_ms)
    }

    /// Directory holding the database and its auxiliary files.
    #[must_use]
    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join("database")
    }

    /// Full path of the main database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_dir().join(&self.file_name)
    }

    /// Checks the configuration for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_readers == 0 {
            return Err(invalid("max_readers", "must be at least 1"));
        }
        if self.file_name.trim().is_empty() {
            return Err(invalid("file_name", "must not be empty"));
        }
        if self.file_name.contains(std::path::is_separator) {
            return Err(invalid("file_name", "must be a plain file name"));
        }
        if self.keychain_service.trim().is_empty() {
            return Err(invalid("keychain_service", "must not be empty"));
        }
        if self.keychain_key.trim().is_empty() {
            return Err(invalid("keychain_key", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::Validation {
        field: field.into(),
        message: message.into(),
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
