//! Schema migration engine.
//!
//! Migrations are grouped by [`MigrationTarget`] into ordered waves. A run
//! computes the global order (see [`order`]), skips every key already
//! recorded in the `applied_migrations` table, and executes the rest one
//! transaction each, reporting progress weighted by each migration's
//! expected duration.
//!
//! # Examples
//!
//! ```
//! use cipherstore::migration::{Migration, MigrationContext};
//! use rusqlite::Connection;
//!
//! struct CreateMessages;
//!
//! impl Migration for CreateMessages {
//!     fn identifier(&self) -> &str {
//!         "create_messages"
//!     }
//!
//!     fn migrate(&self, conn: &Connection, context: &MigrationContext<'_>) -> cipherstore::Result<()> {
//!         conn.execute_batch("CREATE TABLE messages (id INTEGER PRIMARY KEY, body TEXT)")?;
//!         context.report_progress(1.0);
//!         Ok(())
//!     }
//! }
//! ```

mod ordering;
mod progress;
mod requirement;
mod runner;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::database::schema::{SELECT_APPLIED_MIGRATIONS, SELECT_APPLIED_MIGRATIONS_TABLE_EXISTS};
use crate::error::Result;

pub use ordering::{migration_key, order, unperformed, MigrationEntry};
pub use progress::{ProgressCallback, ProgressEstimator};
pub(crate) use progress::ProgressReporter;
pub use requirement::MigrationRequirement;
pub use runner::{MigrationContext, MigrationHooks, MigrationReport, RequirementProcessor};
pub(crate) use runner::MigrationRun;

/// One schema or data migration.
pub trait Migration: Send + Sync {
    /// Identifier, unique within the owning target.
    fn identifier(&self) -> &str;

    /// Lower bound on how long the migration takes; used to weight progress.
    fn min_expected_run_duration(&self) -> Duration {
        Duration::ZERO
    }

    /// Requirements that must be processed before the body runs.
    fn requirements(&self) -> &[MigrationRequirement] {
        &[]
    }

    /// Whether running this migration requires a configuration sync
    /// afterwards.
    fn needs_config_sync(&self) -> bool {
        false
    }

    /// Runs the migration inside the run's write transaction.
    ///
    /// # Errors
    ///
    /// Any error rolls the migration back and ends the run.
    fn migrate(&self, conn: &Connection, context: &MigrationContext<'_>) -> Result<()>;
}

/// A component that owns a sequence of migration waves.
pub trait MigrationTarget: Send + Sync {
    /// Identifier; prefixes every migration key and orders targets within
    /// a wave.
    fn identifier(&self) -> &str;

    /// Waves of migrations, each wave in strict execution order.
    fn migrations(&self) -> Vec<Vec<Arc<dyn Migration>>>;
}

/// Reads the applied migration keys. A database without the
/// `applied_migrations` table has none.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn applied_keys(conn: &Connection) -> Result<Vec<String>> {
    Ok(applied_migrations(conn)?.into_iter().map(|m| m.key).collect())
}

/// A migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// `target.identifier`
    pub key: String,
    /// Seconds since the Unix epoch.
    pub applied_at: i64,
}

/// Reads the applied migrations in application order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let exists: i64 = conn.query_row(SELECT_APPLIED_MIGRATIONS_TABLE_EXISTS, [], |row| row.get(0))?;
    if exists == 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(SELECT_APPLIED_MIGRATIONS)?;
    let applied = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                key: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(applied)
}

/// [`applied_keys`] as a set.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn applied_key_set(conn: &Connection) -> Result<HashSet<String>> {
    Ok(applied_keys(conn)?.into_iter().collect())
}
