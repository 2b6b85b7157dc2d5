//! Utility functions for CLI operations.
//!
//! This module provides common utility functions used across CLI commands:
//! data directory resolution, configuration loading, opening the handle,
//! and output formatting.

use crate::error::CliError;
use cipherstore::config::ConfigLoader;
use cipherstore::keystore::{FileKeychain, Keychain, SystemKeychain};
use cipherstore::{ProcessContext, Storage, StorageConfig};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the directory holding file keychain entries.
pub const FILE_KEYCHAIN_DIR: &str = "keychain";

/// Where the database key is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum KeychainKind {
    /// The platform credential store
    System,
    /// A protected directory inside the data directory (headless hosts)
    File,
}

/// Global CLI options shared across all commands.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    /// Enable verbose output.
    pub verbose: bool,

    /// Suppress non-essential output.
    pub quiet: bool,

    /// Override the data directory location.
    pub data_dir: Option<PathBuf>,

    /// Override the busy timeout (in seconds).
    pub busy_timeout: Option<u64>,

    /// Where the key is kept.
    pub keychain: KeychainKind,
}

/// Resolve the data directory: `--data-dir` (or its environment variable)
/// first, then the library default.
pub fn resolve_data_dir(global: &GlobalOptions) -> Result<PathBuf, CliError> {
    match &global.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => ConfigLoader::default_data_dir().map_err(|e| CliError::Config(e.to_string())),
    }
}

/// Load configuration for the resolved data directory.
///
/// Configuration is merged from multiple sources with precedence:
/// 1. Global options (highest priority)
/// 2. Environment variables
/// 3. `<data_dir>/config.yaml`
/// 4. Built-in defaults (lowest priority)
pub fn load_configuration(global: &GlobalOptions) -> Result<StorageConfig, CliError> {
    let data_dir = resolve_data_dir(global)?;
    let mut config = ConfigLoader::load(&data_dir).map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(seconds) = global.busy_timeout {
        config = config.with_busy_timeout(Duration::from_secs(seconds));
    }
    log::debug!("Using database at {}", config.database_path().display());
    Ok(config)
}

fn keychain(global: &GlobalOptions, data_dir: &Path) -> Arc<dyn Keychain> {
    match global.keychain {
        KeychainKind::System => Arc::new(SystemKeychain::new()),
        KeychainKind::File => Arc::new(FileKeychain::new(data_dir.join(FILE_KEYCHAIN_DIR))),
    }
}

/// Build the handle without configuring it.
pub fn build_storage(global: &GlobalOptions) -> Result<Arc<Storage>, CliError> {
    let config = load_configuration(global)?;
    let keychain = keychain(global, &config.data_dir);
    Storage::builder(config)
        .keychain(keychain)
        .app_context(Arc::new(ProcessContext::helper()))
        .build()
        .map_err(CliError::from)
}

/// Build and configure the handle.
///
/// # Errors
///
/// Maps the recorded startup cause: an inaccessible key gives exit code 8,
/// anything else that prevents opening gives exit code 3.
pub fn open_storage(global: &GlobalOptions) -> Result<Arc<Storage>, CliError> {
    let storage = build_storage(global)?;
    if let Err(e) = storage.configure() {
        return Err(match storage.startup_error() {
            Some(cause) => CliError::from_startup(&cause),
            None => CliError::from(e),
        });
    }
    Ok(storage)
}

/// Format a Unix timestamp (seconds) for display.
pub fn format_timestamp(seconds: i64) -> String {
    use chrono::{DateTime, Utc};
    match DateTime::<Utc>::from_timestamp(seconds, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => seconds.to_string(),
    }
}

/// Shorten a path for display.
///
/// If the path is within the home directory, show it as ~/...
/// Otherwise, show the full path.
pub fn shorten_path(path: &Path) -> String {
    if let Some(home) = home::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(86_400 + 61), "1970-01-02 00:01:01");
    }

    #[test]
    fn test_shorten_path_outside_home() {
        assert_eq!(shorten_path(Path::new("/var/lib/x")), "/var/lib/x");
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let global = GlobalOptions {
            verbose: false,
            quiet: false,
            data_dir: Some(PathBuf::from("/tmp/cs")),
            busy_timeout: None,
            keychain: KeychainKind::File,
        };
        assert_eq!(resolve_data_dir(&global).unwrap(), PathBuf::from("/tmp/cs"));
    }
}
