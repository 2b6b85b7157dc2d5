//! Password-protected export of the database key for support tooling.
//!
//! The key spec is encrypted with XChaCha20-Poly1305 under a key derived
//! from the password with Argon2id, and written next to the database:
//!
//! ```text
//! magic (8) || salt (16) || nonce (24) || ciphertext (48 + 16 tag)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::files;
use crate::keystore::KeySpec;
use crate::storage::Storage;

/// File name of the exported key, inside the database directory.
pub const EXPORTED_KEY_FILE_NAME: &str = "key.enc";

const MAGIC: &[u8; 8] = b"CSKEYv01";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("key derivation: {e}")))?;
    Ok(key)
}

fn encrypt(spec: &KeySpec, password: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), spec.as_bytes())
        .map_err(|e| Error::Crypto(format!("encrypt: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a key file written by [`Storage::export_encrypted_snapshot`].
///
/// # Errors
///
/// Returns [`Error::FileNotFound`] if the file is missing,
/// [`Error::Crypto`] for a malformed file or wrong password, and
/// [`Error::KeySpecInvalid`] if the plaintext has the wrong length.
pub fn decrypt_exported_key(path: &Path, password: &str) -> Result<KeySpec> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let data = fs::read(path)?;
    if data.len() <= HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(Error::Crypto("not an exported key file".into()));
    }
    let salt = &data[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = &data[MAGIC.len() + SALT_LEN..HEADER_LEN];

    let key = derive_key(password, salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), &data[HEADER_LEN..])
        .map_err(|_| Error::Crypto("wrong password or corrupted key file".into()))?;
    KeySpec::from_bytes(Zeroizing::new(plaintext))
}

impl Storage {
    /// Writes the key spec, encrypted with `password`, to
    /// `<data_dir>/database/key.enc`.
    ///
    /// Returns the database path and the key file path.
    ///
    /// # Errors
    ///
    /// Fails if the handle is not valid, the password is empty, the key
    /// spec cannot be read, or the file cannot be written.
    pub fn export_encrypted_snapshot(&self, password: &str) -> Result<(PathBuf, PathBuf)> {
        if password.is_empty() {
            return Err(Error::Validation {
                field: "password".into(),
                message: "must not be empty".into(),
            });
        }
        if !self.is_valid() {
            return Err(Error::DatabaseInvalid);
        }

        let spec = self.key_store().fetch()?;
        let encrypted = encrypt(&spec, password)?;
        let key_path = self.config().database_dir().join(EXPORTED_KEY_FILE_NAME);
        fs::write(&key_path, encrypted)?;
        files::protect(&key_path)?;

        log::info!("Exported encrypted key to {}", key_path.display());
        Ok((self.database_path(), key_path))
    }
}
