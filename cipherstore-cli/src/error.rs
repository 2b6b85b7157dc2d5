//! CLI-specific error types with exit codes.
//!
//! This module defines error types specific to the CLI layer,
//! wrapping library errors and providing appropriate exit codes.

use cipherstore::Error as LibError;
use std::fmt;

/// CLI-specific error type with exit code mapping.
#[derive(Debug)]
pub enum CliError {
    /// Library error (wrapped).
    Library(LibError),

    /// Invalid command-line arguments.
    InvalidArguments(String),

    /// I/O error.
    Io(std::io::Error),

    /// Timeout waiting for database lock.
    Timeout,

    /// The database could not be opened or is not usable right now.
    Unavailable(String),

    /// The keychain holding the database key cannot be read.
    KeyInaccessible(String),

    /// Configuration error.
    Config(String),

    /// Semantic failure (e.g., integrity check failed) - exit code 1.
    SemanticFailure(String),
}

impl CliError {
    /// Get the appropriate exit code for this error.
    ///
    /// Exit codes:
    /// - 0: Success (not an error)
    /// - 1: Semantic failure (e.g., integrity check failed)
    /// - 2: Timeout waiting for database lock
    /// - 3: Database unavailable
    /// - 4: Invalid arguments
    /// - 5: I/O error
    /// - 6: Other library error
    /// - 7: Configuration error
    /// - 8: Key inaccessible
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::SemanticFailure(_) => 1,
            CliError::Timeout => 2,
            CliError::Unavailable(_) => 3,
            CliError::InvalidArguments(_) => 4,
            CliError::Io(_) => 5,
            CliError::Library(_) => 6,
            CliError::Config(_) => 7,
            CliError::KeyInaccessible(_) => 8,
        }
    }

    /// Maps the cause recorded by a failed configure.
    pub fn from_startup(cause: &LibError) -> Self {
        match cause {
            LibError::KeySpecInaccessible { reason } => CliError::KeyInaccessible(reason.clone()),
            LibError::LockTimeout { .. } => CliError::Timeout,
            LibError::Configuration(e) => CliError::Config(e.to_string()),
            LibError::Validation { .. } => CliError::Config(cause.to_string()),
            other => CliError::Unavailable(other.to_string()),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Library(e) => write!(f, "{e}"),
            CliError::InvalidArguments(msg) => write!(f, "Invalid arguments: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
            CliError::Timeout => write!(f, "Timeout waiting for database lock"),
            CliError::Unavailable(msg) => write!(f, "Database unavailable: {msg}"),
            CliError::KeyInaccessible(msg) => write!(f, "Database key inaccessible: {msg}"),
            CliError::Config(msg) => write!(f, "Configuration error: {msg}"),
            CliError::SemanticFailure(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Library(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LibError> for CliError {
    fn from(e: LibError) -> Self {
        if e.is_unavailable() {
            return CliError::Unavailable(e.to_string());
        }
        match e {
            LibError::LockTimeout { .. } => CliError::Timeout,
            LibError::KeySpecInaccessible { reason } => CliError::KeyInaccessible(reason),
            LibError::Configuration(e) => CliError::Config(e.to_string()),
            LibError::Validation { .. } => CliError::Config(e.to_string()),
            LibError::Io(e) => CliError::Io(e),
            other => CliError::Library(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::from(LibError::LockTimeout { seconds: 5 }).exit_code(), 2);
        assert_eq!(CliError::from(LibError::DatabaseSuspended).exit_code(), 3);
        assert_eq!(CliError::from(LibError::Interrupted).exit_code(), 3);
        assert_eq!(
            CliError::from(LibError::KeySpecInaccessible {
                reason: "locked".into()
            })
            .exit_code(),
            8
        );
        assert_eq!(CliError::from(LibError::Cancelled).exit_code(), 6);
        assert_eq!(CliError::InvalidArguments(String::new()).exit_code(), 4);
    }

    #[test]
    fn test_startup_causes() {
        let cause = LibError::KeySpecInaccessible {
            reason: "locked".into(),
        };
        assert_eq!(CliError::from_startup(&cause).exit_code(), 8);
        let cause = LibError::StartupFailed {
            reason: "file is not a database".into(),
        };
        let err = CliError::from_startup(&cause);
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("file is not a database"));
    }
}
