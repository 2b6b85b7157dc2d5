//! SQL for the metadata tables owned by the lifecycle manager.
//!
//! Application tables are created by migrations; the only table managed
//! here records which migrations have run.

/// Creates the applied-migrations table.
pub const CREATE_APPLIED_MIGRATIONS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS applied_migrations (
        key TEXT PRIMARY KEY NOT NULL,
        applied_at INTEGER NOT NULL
    )";

/// Checks whether the applied-migrations table exists.
pub const SELECT_APPLIED_MIGRATIONS_TABLE_EXISTS: &str =
    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'applied_migrations'";

/// Lists applied migrations in application order.
pub const SELECT_APPLIED_MIGRATIONS: &str =
    "SELECT key, applied_at FROM applied_migrations ORDER BY applied_at, rowid";

/// Records a migration key.
pub const INSERT_APPLIED_MIGRATION: &str =
    "INSERT OR IGNORE INTO applied_migrations (key, applied_at) VALUES (?1, ?2)";
