//! Common test utilities for integration tests.
//!
//! Fixtures open handles against a temporary data directory with an
//! in-memory keychain, and provide configurable migrations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tempfile::TempDir;

use cipherstore::keystore::MemoryKeychain;
use cipherstore::migration::{Migration, MigrationContext, MigrationRequirement, MigrationTarget};
use cipherstore::{ProcessContext, Result, Storage, StorageConfig};

/// A handle plus everything it depends on. The directory lives as long as
/// the fixture.
pub struct Fixture {
    pub dir: TempDir,
    pub keychain: Arc<MemoryKeychain>,
    pub storage: Arc<Storage>,
}

impl Fixture {
    /// An unconfigured handle on an encrypted file database.
    pub fn file_backed() -> Self {
        Self::build(false)
    }

    /// A configured handle on an in-memory database.
    #[allow(dead_code)]
    pub fn in_memory() -> Self {
        let fixture = Self::build(true);
        fixture.storage.configure().unwrap();
        fixture
    }

    fn build(in_memory: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let keychain = Arc::new(MemoryKeychain::new());
        let config = StorageConfig::new(dir.path()).with_key_failure_backoff(Duration::ZERO);
        let mut builder = Storage::builder(config)
            .keychain(keychain.clone())
            .app_context(Arc::new(ProcessContext::test_harness()));
        if in_memory {
            builder = builder.in_memory();
        }
        Self {
            storage: builder.build().unwrap(),
            keychain,
            dir,
        }
    }
}

/// A migration that records its executions and reports half-way progress.
pub struct TestMigration {
    id: String,
    duration: Duration,
    requirements: Vec<MigrationRequirement>,
    config_sync: bool,
    pub runs: Arc<AtomicUsize>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

#[allow(dead_code)]
impl TestMigration {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            duration: Duration::ZERO,
            requirements: Vec::new(),
            config_sync: false,
            runs: Arc::new(AtomicUsize::new(0)),
            log: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn requiring(mut self, requirements: &[MigrationRequirement]) -> Self {
        self.requirements = requirements.to_vec();
        self
    }

    pub fn syncing_config(mut self) -> Self {
        self.config_sync = true;
        self
    }

    pub fn logging_to(mut self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub fn into_dyn(self) -> Arc<dyn Migration> {
        Arc::new(self)
    }
}

impl Migration for TestMigration {
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
        conn.execute_batch("CREATE TABLE IF NOT EXISTS migration_log (key TEXT)")?;
        conn.execute("INSERT INTO migration_log VALUES (?1)", [context.key()])?;
        context.report_progress(0.5);
        Ok(())
    }
}

/// A target with fixed waves.
pub struct TestTarget {
    id: String,
    waves: Vec<Vec<Arc<dyn Migration>>>,
}

#[allow(dead_code)]
impl TestTarget {
    pub fn new(id: &str, waves: Vec<Vec<Arc<dyn Migration>>>) -> Arc<dyn MigrationTarget> {
        Arc::new(Self {
            id: id.to_string(),
            waves,
        })
    }

    /// Waves of plain migrations that append their key to `log`.
    pub fn logging(
        id: &str,
        waves: &[&[&str]],
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn MigrationTarget> {
        Self::new(
            id,
            waves
                .iter()
                .map(|wave| {
                    wave.iter()
                        .map(|name| TestMigration::new(name).logging_to(log).into_dyn())
                        .collect()
                })
                .collect(),
        )
    }
}

impl MigrationTarget for TestTarget {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn migrations(&self) -> Vec<Vec<Arc<dyn Migration>>> {
        self.waves.clone()
    }
}
