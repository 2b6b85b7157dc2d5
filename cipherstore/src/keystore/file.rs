//! Keychain stored as owner-only files in a directory.
//!
//! For hosts without a credential service (servers, CI, containers). Each
//! entry is one file named after its service and key, written through a
//! temporary file and renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use super::keychain::{Keychain, KeychainError};
use crate::files;

/// A directory of protected key files.
///
/// # Examples
///
/// ```no_run
/// use cipherstore::keystore::{FileKeychain, Keychain};
///
/// let keychain = FileKeychain::new("/tmp/cipherstore/keychain");
/// keychain.set("svc", "key", b"secret").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileKeychain {
    dir: PathBuf,
}

impl FileKeychain {
    /// Creates a keychain rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The directory holding the entries.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, service: &str, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.key", sanitize(service), sanitize(key)))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn io_error(err: &io::Error) -> KeychainError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        KeychainError::Inaccessible(err.to_string())
    } else {
        KeychainError::Backend(err.to_string())
    }
}

impl Keychain for FileKeychain {
    fn get(&self, service: &str, key: &str) -> Result<Zeroizing<Vec<u8>>, KeychainError> {
        match fs::read(self.entry_path(service, key)) {
            Ok(data) => Ok(Zeroizing::new(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(KeychainError::NotFound),
            Err(e) => Err(io_error(&e)),
        }
    }

    fn set(&self, service: &str, key: &str, data: &[u8]) -> Result<(), KeychainError> {
        files::ensure_directory_exists(&self.dir)
            .map_err(|e| KeychainError::Backend(e.to_string()))?;

        let path = self.entry_path(service, key);
        let staging = path.with_extension("key.tmp");
        fs::write(&staging, data).map_err(|e| io_error(&e))?;
        files::protect(&staging).map_err(|e| KeychainError::Backend(e.to_string()))?;
        fs::rename(&staging, &path).map_err(|e| io_error(&e))?;
        files::protect(&self.dir).map_err(|e| KeychainError::Backend(e.to_string()))
    }

    fn remove(&self, service: &str, key: &str) -> Result<(), KeychainError> {
        files::delete_if_exists(&self.entry_path(service, key))
            .map(|_| ())
            .map_err(|e| KeychainError::Backend(e.to_string()))
    }
}
