//! Global migration ordering.
//!
//! Targets contribute waves of migrations. The flat order runs wave 0 of
//! every target, then wave 1 of every target, and so on. Within a wave,
//! targets are ordered by identifier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

use super::{Migration, MigrationTarget};

/// One migration at its place in the global order.
#[derive(Clone)]
pub struct MigrationEntry {
    /// `"<target>.<migration>"`.
    pub key: String,
    /// Owning target identifier.
    pub target: String,
    /// Wave index within the target.
    pub wave: usize,
    /// The migration itself.
    pub migration: Arc<dyn Migration>,
}

impl MigrationEntry {
    /// Minimum expected run duration of the migration.
    #[must_use]
    pub fn expected_duration(&self) -> Duration {
        self.migration.min_expected_run_duration()
    }
}

impl std::fmt::Debug for MigrationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEntry")
            .field("key", &self.key)
            .field("wave", &self.wave)
            .finish_non_exhaustive()
    }
}

/// The key under which a migration is recorded once applied.
#[must_use]
pub fn migration_key(target: &str, migration: &str) -> String {
    format!("{target}.{migration}")
}

/// Flattens the targets' waves into the global order.
///
/// # Errors
///
/// Returns [`Error::Migration`] if two migrations share a key.
pub fn order(targets: &[Arc<dyn MigrationTarget>]) -> Result<Vec<MigrationEntry>> {
    let mut sorted: Vec<(String, Vec<Vec<Arc<dyn Migration>>>)> = targets
        .iter()
        .map(|t| (t.identifier().to_string(), t.migrations()))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let wave_count = sorted.iter().map(|(_, waves)| waves.len()).max().unwrap_or(0);
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for wave in 0..wave_count {
        for (target, waves) in &sorted {
            let Some(migrations) = waves.get(wave) else {
                continue;
            };
            for migration in migrations {
                let key = migration_key(target, migration.identifier());
                if !seen.insert(key.clone()) {
                    return Err(Error::Migration {
                        key,
                        message: "duplicate migration key".into(),
                    });
                }
                entries.push(MigrationEntry {
                    key,
                    target: target.clone(),
                    wave,
                    migration: Arc::clone(migration),
                });
            }
        }
    }
    Ok(entries)
}

/// Entries not yet recorded in `applied`, in order.
#[must_use]
pub fn unperformed(entries: &[MigrationEntry], applied: &HashSet<String>) -> Vec<MigrationEntry> {
    entries
        .iter()
        .filter(|e| !applied.contains(&e.key))
        .cloned()
        .collect()
}
