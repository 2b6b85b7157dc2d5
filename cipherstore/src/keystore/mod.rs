//! Secret key storage.
//!
//! The database key spec lives in a [`Keychain`]: the platform credential
//! store in production, a protected directory on headless hosts, or memory
//! in tests. [`KeySpecStore`] owns the get-or-generate flow on top of it.

mod file;
mod keychain;
mod spec;
mod system;

#[cfg(test)]
pub use keychain::MockKeychain;
pub use file::FileKeychain;
pub use keychain::{Keychain, KeychainError, MemoryKeychain};
pub use spec::{KeySpec, KeySpecStore, KEY_SPEC_LENGTH};
pub use system::SystemKeychain;
