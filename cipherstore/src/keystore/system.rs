//! Keychain backed by the operating system credential store.
//!
//! Entries are stored as base64 text because the credential APIs only
//! accept strings.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use zeroize::Zeroizing;

use super::keychain::{Keychain, KeychainError};

/// The platform credential store (Keychain, Credential Manager, Secret
/// Service) accessed through `keyring`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKeychain;

impl SystemKeychain {
    /// Creates a handle to the platform credential store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn entry(service: &str, key: &str) -> Result<Entry, KeychainError> {
        Entry::new(service, key).map_err(map_error)
    }
}

impl Keychain for SystemKeychain {
    fn get(&self, service: &str, key: &str) -> Result<Zeroizing<Vec<u8>>, KeychainError> {
        let encoded = Zeroizing::new(Self::entry(service, key)?.get_password().map_err(map_error)?);
        let decoded = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| KeychainError::Backend(format!("decode entry: {e}")))?;
        Ok(Zeroizing::new(decoded))
    }

    fn set(&self, service: &str, key: &str, data: &[u8]) -> Result<(), KeychainError> {
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(data));
        Self::entry(service, key)?
            .set_password(&encoded)
            .map_err(map_error)
    }

    fn remove(&self, service: &str, key: &str) -> Result<(), KeychainError> {
        match Self::entry(service, key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(map_error(err)),
        }
    }
}

fn map_error(err: keyring::Error) -> KeychainError {
    match err {
        keyring::Error::NoEntry => KeychainError::NotFound,
        keyring::Error::NoStorageAccess(inner) => KeychainError::Inaccessible(inner.to_string()),
        other => KeychainError::Backend(other.to_string()),
    }
}
