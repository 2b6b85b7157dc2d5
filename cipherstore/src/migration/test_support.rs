//! Migration doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::{Migration, MigrationContext, MigrationRequirement, MigrationTarget};
use crate::error::{Error, Result};

pub(crate) struct NoopMigration {
    id: String,
    duration: Duration,
    requirements: Vec<MigrationRequirement>,
    config_sync: bool,
    fail: bool,
    pub(crate) runs: Arc<AtomicUsize>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl NoopMigration {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            duration: Duration::ZERO,
            requirements: Vec::new(),
            config_sync: false,
            fail: false,
            runs: Arc::new(AtomicUsize::new(0)),
            log: None,
        }
    }

    pub(crate) fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub(crate) fn requiring(mut self, requirements: &[MigrationRequirement]) -> Self {
        self.requirements = requirements.to_vec();
        self
    }

    pub(crate) fn syncing_config(mut self) -> Self {
        self.config_sync = true;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn logging_to(mut self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

impl Migration for NoopMigration {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn min_expected_run_duration(&self) -> Duration {
        self.duration
    }

    fn requirements(&self) -> &[MigrationRequirement] {
        &self.requirements
    }

    fn needs_config_sync(&self) -> bool {
        self.config_sync
    }

    fn migrate(&self, conn: &Connection, context: &MigrationContext<'_>) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(context.key().to_string());
        }
        context.report_progress(0.5);
        conn.execute_batch("CREATE TABLE IF NOT EXISTS migration_marker (v INTEGER)")?;
        conn.execute("INSERT INTO migration_marker VALUES (1)", [])?;
        if self.fail {
            return Err(Error::Migration {
                key: context.key().to_string(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

pub(crate) fn dynamic(migration: NoopMigration) -> Arc<dyn Migration> {
    Arc::new(migration)
}

pub(crate) struct StaticTarget {
    id: String,
    waves: Vec<Vec<Arc<dyn Migration>>>,
}

impl StaticTarget {
    pub(crate) fn new(id: &str, waves: &[&[&str]]) -> Arc<dyn MigrationTarget> {
        Self::from_names(
            id,
            waves
                .iter()
                .map(|w| w.iter().map(|s| (*s).to_string()).collect())
                .collect(),
        )
    }

    pub(crate) fn from_names(id: &str, waves: Vec<Vec<String>>) -> Arc<dyn MigrationTarget> {
        Self::from_migrations(
            id,
            waves
                .into_iter()
                .map(|w| {
                    w.iter()
                        .map(|name| Arc::new(NoopMigration::new(name)) as Arc<dyn Migration>)
                        .collect()
                })
                .collect(),
        )
    }

    pub(crate) fn from_migrations(
        id: &str,
        waves: Vec<Vec<Arc<dyn Migration>>>,
    ) -> Arc<dyn MigrationTarget> {
        Arc::new(Self {
            id: id.to_string(),
            waves,
        })
    }
}

impl MigrationTarget for StaticTarget {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn migrations(&self) -> Vec<Vec<Arc<dyn Migration>>> {
        self.waves.clone()
    }
}
