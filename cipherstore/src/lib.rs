#![deny(missing_docs, unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # cipherstore
//!
//! Lifecycle management for a local encrypted SQLite database.
//!
//! The library provisions the database key in a keychain, opens a pooled
//! SQLCipher database with it, runs ordered migrations with progress
//! reporting, and gates every read and write so that a suspended or
//! invalid handle fails fast instead of touching the file.
//!
//! ## Core Types
//!
//! - [`Storage`] and [`StorageBuilder`]: the database handle and its lifecycle
//! - [`keystore::KeySpecStore`]: get-or-generate of the key spec
//! - [`database::ConnectionPool`]: one writer, bounded readers
//! - [`migration::Migration`] and [`migration::MigrationTarget`]: ordered migrations
//! - [`observation::ValueObservation`]: re-fetch on committed changes
//! - [`Error`] and [`Result`]: error handling types
//! - [`Logger`] and [`LogLevel`]: logging infrastructure
//!
//! ## Examples
//!
//! ```
//! use cipherstore::keystore::MemoryKeychain;
//! use cipherstore::{ProcessContext, Storage, StorageConfig};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let storage = Storage::builder(StorageConfig::new(dir.path()))
//!     .keychain(Arc::new(MemoryKeychain::new()))
//!     .app_context(Arc::new(ProcessContext::test_harness()))
//!     .in_memory()
//!     .build()
//!     .unwrap();
//! storage.configure().unwrap();
//!
//! storage.write(|conn| {
//!     conn.execute_batch("CREATE TABLE notes (body TEXT)")?;
//!     Ok(())
//! });
//! let count = storage.read(|conn| {
//!     Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get::<_, i64>(0))?)
//! });
//! assert_eq!(count, Some(0));
//! ```

pub mod app_context;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod keystore;
pub mod logging;
pub mod migration;
pub mod observation;
#[cfg(feature = "snapshot-export")]
pub mod snapshot;
pub mod storage;

// Re-export key types at crate root for convenience
pub use app_context::{AppContext, ProcessContext};
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use logging::{init_logger, LogLevel, Logger};
pub use storage::{Lifecycle, Storage, StorageBuilder};
