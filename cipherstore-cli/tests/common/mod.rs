//! Common test utilities for CLI integration tests.
//!
//! Every environment uses its own data directory and the file keychain, so
//! tests never touch the platform credential store.

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::TempDir;

/// File name of the key entry written by the file keychain with the default
/// service and key.
pub const KEY_ENTRY_FILE: &str = "cipherstore.db-cipher-key-spec.key";

/// Test environment with isolated data directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for the duration of the test)
    #[allow(dead_code)]
    temp_dir: TempDir,
    /// Path to the cipherstore data directory
    pub data_dir: PathBuf,
}

#[allow(dead_code)]
impl TestEnv {
    /// Create a new test environment. The data directory is not created;
    /// the first command that opens the database creates it.
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let data_dir = temp_dir.path().join("cipherstore-data");
        Self { temp_dir, data_dir }
    }

    /// A command builder with no flags and a clean environment.
    pub fn command_bare(&self) -> Command {
        let mut cmd = Command::cargo_bin("cipherstore").expect("Failed to find cipherstore binary");
        for var in [
            "CIPHERSTORE_DATA_DIR",
            "CIPHERSTORE_KEYCHAIN",
            "CIPHERSTORE_EXPORT_PASSWORD",
            "CIPHERSTORE_BUSY_TIMEOUT_MS",
            "CIPHERSTORE_MAX_READERS",
            "CIPHERSTORE_LOG_MODE",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// A command builder using this environment's data directory and the
    /// file keychain.
    pub fn command(&self) -> Command {
        let mut cmd = self.command_bare();
        cmd.arg("--data-dir")
            .arg(&self.data_dir)
            .arg("--keychain")
            .arg("file");
        cmd
    }

    /// Path of the main database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database").join("cipherstore.sqlite")
    }

    /// Path of the key entry in the file keychain.
    pub fn key_entry_path(&self) -> PathBuf {
        self.data_dir.join("keychain").join(KEY_ENTRY_FILE)
    }

    /// Opens (and so creates) the database.
    pub fn init(&self) {
        self.command().arg("status").assert().success();
    }
}
