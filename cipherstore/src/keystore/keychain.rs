//! The keychain collaborator and an in-memory implementation.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use zeroize::Zeroizing;

/// Failures reported by a [`Keychain`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeychainError {
    /// No entry exists for the requested service/key.
    #[error("keychain entry not found")]
    NotFound,

    /// The keychain exists but cannot be read right now (locked device,
    /// missing credential service, denied access).
    #[error("keychain inaccessible: {0}")]
    Inaccessible(String),

    /// Any other backend failure.
    #[error("keychain backend failure: {0}")]
    Backend(String),
}

/// Secure storage for opaque byte buffers keyed by service and key.
#[cfg_attr(test, mockall::automock)]
pub trait Keychain: Send + Sync {
    /// Reads the entry.
    ///
    /// # Errors
    ///
    /// Returns [`KeychainError::NotFound`] if no entry exists.
    fn get(&self, service: &str, key: &str) -> Result<Zeroizing<Vec<u8>>, KeychainError>;

    /// Creates or overwrites the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn set(&self, service: &str, key: &str, data: &[u8]) -> Result<(), KeychainError>;

    /// Removes the entry. Removing a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the removal.
    fn remove(&self, service: &str, key: &str) -> Result<(), KeychainError>;

    /// Moves `key` from `legacy_service` to `service` if the legacy entry
    /// exists and the new one does not.
    ///
    /// Returns `true` if an entry was moved.
    ///
    /// # Errors
    ///
    /// Returns an error if reading, writing or removing fails.
    fn migrate_legacy(
        &self,
        legacy_service: &str,
        service: &str,
        key: &str,
    ) -> Result<bool, KeychainError> {
        match self.get(service, key) {
            Ok(_) => return Ok(false),
            Err(KeychainError::NotFound) => {}
            Err(err) => return Err(err),
        }
        let legacy = match self.get(legacy_service, key) {
            Ok(data) => data,
            Err(KeychainError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        };
        self.set(service, key, &legacy)?;
        self.remove(legacy_service, key)?;
        Ok(true)
    }
}

/// An in-process keychain with failure injection, for tests and ephemeral
/// tooling.
///
/// # Examples
///
/// ```
/// use cipherstore::keystore::{Keychain, MemoryKeychain};
///
/// let keychain = MemoryKeychain::new();
/// keychain.set("svc", "key", b"secret").unwrap();
/// assert_eq!(keychain.get("svc", "key").unwrap().as_slice(), b"secret");
/// ```
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), Zeroizing<Vec<u8>>>>,
    read_failure: Mutex<Option<KeychainError>>,
    write_failure: Mutex<Option<KeychainError>>,
}

impl MemoryKeychain {
    /// Creates an empty keychain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `get` fail with `error`.
    pub fn fail_reads_with(&self, error: KeychainError) {
        *self.read_failure.lock() = Some(error);
    }

    /// Makes every subsequent `set` fail with `error`.
    pub fn fail_writes_with(&self, error: KeychainError) {
        *self.write_failure.lock() = Some(error);
    }

    /// Removes injected failures.
    pub fn clear_failures(&self) {
        *self.read_failure.lock() = None;
        *self.write_failure.lock() = None;
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn contains(&self, service: &str, key: &str) -> bool {
        self.entries
            .lock()
            .contains_key(&(service.to_string(), key.to_string()))
    }
}

impl std::fmt::Debug for MemoryKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeychain")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Keychain for MemoryKeychain {
    fn get(&self, service: &str, key: &str) -> Result<Zeroizing<Vec<u8>>, KeychainError> {
        if let Some(err) = self.read_failure.lock().clone() {
            return Err(err);
        }
        self.entries
            .lock()
            .get(&(service.to_string(), key.to_string()))
            .map(|data| Zeroizing::new(data.to_vec()))
            .ok_or(KeychainError::NotFound)
    }

    fn set(&self, service: &str, key: &str, data: &[u8]) -> Result<(), KeychainError> {
        if let Some(err) = self.write_failure.lock().clone() {
            return Err(err);
        }
        self.entries.lock().insert(
            (service.to_string(), key.to_string()),
            Zeroizing::new(data.to_vec()),
        );
        Ok(())
    }

    fn remove(&self, service: &str, key: &str) -> Result<(), KeychainError> {
        self.entries
            .lock()
            .remove(&(service.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_keychain_roundtrip() {
        let keychain = MemoryKeychain::new();
        assert!(matches!(keychain.get("svc", "k"), Err(KeychainError::NotFound)));

        keychain.set("svc", "k", &[1, 2, 3]).unwrap();
        assert_eq!(keychain.get("svc", "k").unwrap().as_slice(), &[1, 2, 3]);

        keychain.set("svc", "k", &[4]).unwrap();
        assert_eq!(keychain.get("svc", "k").unwrap().as_slice(), &[4]);

        keychain.remove("svc", "k").unwrap();
        assert!(!keychain.contains("svc", "k"));
        keychain.remove("svc", "k").unwrap();
    }

    #[test]
    fn test_failure_injection() {
        let keychain = MemoryKeychain::new();
        keychain.fail_reads_with(KeychainError::Inaccessible("locked".into()));
        keychain.fail_writes_with(KeychainError::Backend("full".into()));

        assert!(matches!(
            keychain.get("svc", "k"),
            Err(KeychainError::Inaccessible(_))
        ));
        assert!(keychain.set("svc", "k", b"x").is_err());

        keychain.clear_failures();
        keychain.set("svc", "k", b"x").unwrap();
    }

    #[test]
    fn test_migrate_legacy_moves_entry() {
        let keychain = MemoryKeychain::new();
        keychain.set("legacy", "k", b"old").unwrap();

        assert!(keychain.migrate_legacy("legacy", "svc", "k").unwrap());
        assert_eq!(keychain.get("svc", "k").unwrap().as_slice(), b"old");
        assert!(!keychain.contains("legacy", "k"));

        // Nothing left to move
        assert!(!keychain.migrate_legacy("legacy", "svc", "k").unwrap());
    }

    #[test]
    fn test_migrate_legacy_keeps_existing_entry() {
        let keychain = MemoryKeychain::new();
        keychain.set("legacy", "k", b"old").unwrap();
        keychain.set("svc", "k", b"new").unwrap();

        assert!(!keychain.migrate_legacy("legacy", "svc", "k").unwrap());
        assert_eq!(keychain.get("svc", "k").unwrap().as_slice(), b"new");
        assert!(keychain.contains("legacy", "k"));
    }
}
