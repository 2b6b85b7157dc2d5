//! Key spec generation, retrieval and recovery.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::keychain::{Keychain, KeychainError};
use crate::app_context::AppContext;
use crate::config::StorageConfig;
use crate::database::DatabaseFiles;
use crate::error::{Error, Result};

/// Length of a key spec: a 32-byte key followed by a 16-byte salt.
pub const KEY_SPEC_LENGTH: usize = 48;

/// Raw database key material.
///
/// The bytes are zeroed when the value is dropped, whichever way the
/// owning scope is left.
pub struct KeySpec(Zeroizing<Vec<u8>>);

impl KeySpec {
    /// Generates a fresh key spec from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; KEY_SPEC_LENGTH]);
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps stored key material, rejecting any length other than
    /// [`KEY_SPEC_LENGTH`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySpecInvalid`] on a length mismatch.
    pub fn from_bytes(bytes: Zeroizing<Vec<u8>>) -> Result<Self> {
        if bytes.len() != KEY_SPEC_LENGTH {
            return Err(Error::KeySpecInvalid {
                length: bytes.len(),
                expected: KEY_SPEC_LENGTH,
            });
        }
        Ok(Self(bytes))
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The SQLCipher raw-key blob literal (`x'<hex key><hex salt>'`).
    #[must_use]
    pub fn to_blob_literal(&self) -> Zeroizing<String> {
        let hex = Zeroizing::new(hex::encode(self.as_bytes()));
        Zeroizing::new(format!("x'{}'", hex.as_str()))
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySpec([REDACTED])")
    }
}

/// Reads, generates and destroys the key spec held in a [`Keychain`].
pub struct KeySpecStore {
    keychain: Arc<dyn Keychain>,
    context: Arc<dyn AppContext>,
    service: String,
    key: String,
    legacy_service: Option<String>,
    backoff: Duration,
    files: DatabaseFiles,
}

impl KeySpecStore {
    /// Creates a store for the keychain entry named in `config`.
    #[must_use]
    pub fn new(
        config: &StorageConfig,
        keychain: Arc<dyn Keychain>,
        context: Arc<dyn AppContext>,
    ) -> Self {
        Self {
            keychain,
            context,
            service: config.keychain_service.clone(),
            key: config.keychain_key.clone(),
            legacy_service: config.legacy_keychain_service.clone(),
            backoff: config.key_failure_backoff(),
            files: DatabaseFiles::new(config.database_path()),
        }
    }

    /// Returns the stored key spec, generating and persisting one if none
    /// exists.
    ///
    /// A stored spec of the wrong length is treated as corruption: outside
    /// a test harness all storage (database files and keychain entry) is
    /// wiped before a replacement is generated.
    ///
    /// # Errors
    ///
    /// - [`Error::KeySpecCreationFailed`] if a new spec cannot be persisted
    /// - [`Error::KeySpecInaccessible`] if the keychain cannot be read
    pub fn get_or_generate(&self) -> Result<KeySpec> {
        self.migrate_legacy_entry();

        match self.fetch() {
            Ok(spec) => return Ok(spec),
            Err(Error::KeySpecInvalid { length, .. }) => {
                log::warn!("Stored database key spec has invalid length {length}, resetting storage");
                if self.context.is_running_tests() {
                    log::debug!("Skipping storage reset inside test harness");
                } else {
                    self.reset_storage();
                }
            }
            Err(Error::Keychain(KeychainError::NotFound)) => {}
            Err(Error::Keychain(err)) => return Err(self.inaccessible(&err)),
            Err(err) => return Err(err),
        }

        self.generate_and_store()
    }

    /// Reads the stored key spec without generating one.
    ///
    /// # Errors
    ///
    /// Returns the keychain error (including `NotFound`) or
    /// [`Error::KeySpecInvalid`].
    pub fn fetch(&self) -> Result<KeySpec> {
        let bytes = self.keychain.get(&self.service, &self.key)?;
        KeySpec::from_bytes(bytes)
    }

    /// Deletes the keychain entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the keychain rejects the removal.
    pub fn remove(&self) -> Result<()> {
        self.keychain.remove(&self.service, &self.key)?;
        Ok(())
    }

    fn migrate_legacy_entry(&self) {
        let Some(legacy) = self.legacy_service.as_deref() else {
            return;
        };
        match self.keychain.migrate_legacy(legacy, &self.service, &self.key) {
            Ok(true) => log::info!("Migrated database key spec from legacy keychain service"),
            Ok(false) => {}
            Err(err) => log::warn!("Unable to migrate legacy database key spec: {err}"),
        }
    }

    fn generate_and_store(&self) -> Result<KeySpec> {
        let spec = KeySpec::generate();
        if let Err(err) = self.keychain.set(&self.service, &self.key, spec.as_bytes()) {
            // Give any in-flight background work a chance to finish before
            // the caller gives up on the database.
            thread::sleep(self.backoff);
            log::error!("Unable to persist new database key spec: {err}");
            return Err(Error::KeySpecCreationFailed {
                reason: err.to_string(),
            });
        }
        log::info!("Generated new database key spec");
        Ok(spec)
    }

    fn inaccessible(&self, err: &KeychainError) -> Error {
        let context = &self.context;
        if context.is_main_app() && (context.has_ui_context() || context.is_in_background()) {
            thread::sleep(self.backoff);
            log::error!(
                "Database key spec inaccessible (main app, background: {}): {err}",
                context.is_in_background()
            );
        } else {
            log::error!("Database key spec inaccessible: {err}");
        }
        Error::KeySpecInaccessible {
            reason: err.to_string(),
        }
    }

    fn reset_storage(&self) {
        self.files.delete_all();
        if let Err(err) = self.remove() {
            log::error!("Failed to remove corrupt database key spec: {err}");
        }
    }
}
