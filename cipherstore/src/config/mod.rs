//! Configuration system for cipherstore.
//!
//! Settings are merged from the following sources (highest to lowest):
//!
//! 1. Programmatic overrides (builder methods on [`StorageConfig`])
//! 2. Environment variables (`CIPHERSTORE_*`)
//! 3. `<data_dir>/config.yaml`
//! 4. Built-in defaults
//!
//! # Examples
//!
//! ```
//! use cipherstore::config::StorageConfig;
//! use std::time::Duration;
//!
//! let config = StorageConfig::new("/tmp/cipherstore")
//!     .with_busy_timeout(Duration::from_secs(2));
//! assert_eq!(config.busy_timeout_ms, 2000);
//! ```

pub mod environment;
pub mod loader;
pub mod schema;

pub use environment::EnvironmentConfig;
pub use loader::{ConfigLoader, CONFIG_FILE_NAME};
pub use schema::{StorageConfig, DEFAULT_FILE_NAME, DEFAULT_KEYCHAIN_KEY, DEFAULT_KEYCHAIN_SERVICE};
