//! Error types for the cipherstore library.
//!
//! This module provides the error hierarchy shared by the key store, the
//! database handle, the migration engine and the access gateway, using
//! `thiserror` for ergonomic error handling.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::keystore::KeychainError;

/// Result type alias for operations that may fail with a cipherstore error.
///
/// # Examples
///
/// ```
/// use cipherstore::{Error, Result};
///
/// fn example_operation() -> Result<u32> {
///     Ok(42)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the cipherstore library.
#[derive(Debug, Error)]
pub enum Error {
    /// The stored key spec does not have the expected length.
    #[error("invalid key spec: expected {expected} bytes, found {length}")]
    KeySpecInvalid {
        /// The length of the stored key material.
        length: usize,
        /// The length a valid key spec must have.
        expected: usize,
    },

    /// A freshly generated key spec could not be persisted.
    #[error("failed to create key spec: {reason}")]
    KeySpecCreationFailed {
        /// Why the keychain rejected the new entry.
        reason: String,
    },

    /// The keychain could not be read (for example before the first device
    /// unlock after a restart).
    #[error("key spec inaccessible: {reason}")]
    KeySpecInaccessible {
        /// The keychain failure.
        reason: String,
    },

    /// The database handle was never successfully configured.
    #[error("database is invalid")]
    DatabaseInvalid,

    /// The database handle is suspended.
    #[error("database is suspended")]
    DatabaseSuspended,

    /// The connection pool failed to open.
    #[error("database startup failed: {reason}")]
    StartupFailed {
        /// The underlying open failure.
        reason: String,
    },

    /// The running statement was interrupted (usually by a suspension).
    #[error("database operation interrupted")]
    Interrupted,

    /// The running transaction was aborted by the engine.
    #[error("database operation aborted")]
    Aborted,

    /// A database lock timeout occurred.
    #[error("database lock timeout after {seconds}s")]
    LockTimeout {
        /// The number of seconds waited before timing out.
        seconds: u64,
    },

    /// No reader connection could be checked out in time.
    #[error("reader pool error: {0}")]
    ReaderPool(#[from] r2d2::Error),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A keychain operation failed.
    #[error("keychain error: {0}")]
    Keychain(#[from] KeychainError),

    /// A configuration error occurred.
    #[error("configuration error: {0}")]
    Configuration(#[from] serde_yaml::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A validation error occurred.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// A description of the validation failure.
        message: String,
    },

    /// A migration failed.
    #[error("migration {key} failed: {message}")]
    Migration {
        /// The key of the failing migration (`target.identifier`).
        key: String,
        /// A description of the failure.
        message: String,
    },

    /// Encrypting or decrypting an exported snapshot failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A file expected by the operation does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// The missing file.
        path: PathBuf,
    },

    /// A pending result was dropped before it was delivered.
    #[error("operation cancelled before completion")]
    Cancelled,
}

impl Error {
    /// Classifies a raw engine error, lifting interrupts, aborts and busy
    /// timeouts into dedicated variants.
    ///
    /// `busy_timeout_secs` is reported in [`Error::LockTimeout`].
    #[must_use]
    pub fn from_sqlite(err: rusqlite::Error, busy_timeout_secs: u64) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => Self::Interrupted,
            Some(ErrorCode::OperationAborted) => Self::Aborted,
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::LockTimeout {
                seconds: busy_timeout_secs,
            },
            _ => Self::Database(err),
        }
    }

    /// Returns true if this error is an interrupt or abort raised by the
    /// engine.
    ///
    /// # Examples
    ///
    /// ```
    /// use cipherstore::Error;
    ///
    /// assert!(Error::Interrupted.is_interrupt_or_abort());
    /// assert!(!Error::DatabaseInvalid.is_interrupt_or_abort());
    /// ```
    #[must_use]
    pub fn is_interrupt_or_abort(&self) -> bool {
        match self {
            Self::Interrupted | Self::Aborted => true,
            Self::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::OperationInterrupted | ErrorCode::OperationAborted)
            ),
            _ => false,
        }
    }

    /// Returns true if this error means the database cannot currently be
    /// used (invalid, suspended or interrupted).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DatabaseInvalid | Self::DatabaseSuspended) || self.is_interrupt_or_abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_key_spec_invalid_error() {
        let err = Error::KeySpecInvalid {
            length: 12,
            expected: 48,
        };
        let display = format!("{err}");
        assert!(display.contains("invalid key spec"));
        assert!(display.contains("48"));
        assert!(display.contains("12"));
    }

    #[test]
    fn test_lock_timeout_error() {
        let err = Error::LockTimeout { seconds: 5 };
        let display = format!("{err}");
        assert!(display.contains("lock timeout"));
        assert!(display.contains('5'));
    }

    #[test]
    fn test_from_sqlite_classifies_interrupt() {
        let err = Error::from_sqlite(sqlite_failure(rusqlite::ffi::SQLITE_INTERRUPT), 5);
        assert!(matches!(err, Error::Interrupted));
        assert!(err.is_interrupt_or_abort());
    }

    #[test]
    fn test_from_sqlite_classifies_abort() {
        let err = Error::from_sqlite(sqlite_failure(rusqlite::ffi::SQLITE_ABORT), 5);
        assert!(matches!(err, Error::Aborted));
    }

    #[test]
    fn test_from_sqlite_classifies_busy() {
        let err = Error::from_sqlite(sqlite_failure(rusqlite::ffi::SQLITE_BUSY), 7);
        assert!(matches!(err, Error::LockTimeout { seconds: 7 }));
    }

    #[test]
    fn test_from_sqlite_passes_through_other_errors() {
        let err = Error::from_sqlite(rusqlite::Error::QueryReturnedNoRows, 5);
        assert!(matches!(err, Error::Database(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_unavailable_errors() {
        assert!(Error::DatabaseInvalid.is_unavailable());
        assert!(Error::DatabaseSuspended.is_unavailable());
        assert!(Error::Interrupted.is_unavailable());
        assert!(!Error::Cancelled.is_unavailable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(format!("{err}").contains("I/O error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<u16> {
            Err(Error::DatabaseSuspended)
        }

        assert!(returns_result().is_err());
    }
}
