//! Migration entry points on the handle.

use std::sync::Arc;

use crate::database::ConnectionPool;
use crate::migration::{
    applied_key_set, order, unperformed, MigrationEntry, MigrationHooks, MigrationReport,
    MigrationRun, MigrationTarget,
};

use super::Storage;

enum MigrationPlan {
    Finished(MigrationReport),
    Pending(Arc<ConnectionPool>, Vec<MigrationEntry>),
}

impl Storage {
    /// Works out what a run would do. A run with nothing pending is
    /// finished here: migrations are marked completed without touching the
    /// writer.
    fn plan_migrations(&self, targets: &[Arc<dyn MigrationTarget>]) -> MigrationPlan {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("Cannot run migrations: {e}");
                return MigrationPlan::Finished(MigrationReport::failed(e));
            }
        };
        let entries = match order(targets) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Invalid migration set: {e}");
                return MigrationPlan::Finished(MigrationReport::failed(e));
            }
        };
        let pending = if entries.is_empty() {
            Vec::new()
        } else {
            match self.try_read(|conn| applied_key_set(conn)) {
                Ok(applied) => unperformed(&entries, &applied),
                Err(e) => return MigrationPlan::Finished(MigrationReport::failed(e)),
            }
        };

        if pending.is_empty() {
            log::debug!("No pending migrations ({} known)", entries.len());
            self.state.lock().has_completed_migrations = true;
            return MigrationPlan::Finished(MigrationReport::nothing_to_do());
        }
        MigrationPlan::Pending(pool, pending)
    }

    /// Runs every pending migration of `targets` on the calling thread.
    ///
    /// A run with nothing pending marks migrations completed without
    /// touching the writer and skips requirement processing.
    pub fn run_migrations(
        &self,
        targets: &[Arc<dyn MigrationTarget>],
        hooks: MigrationHooks,
    ) -> MigrationReport {
        let (pool, pending) = match self.plan_migrations(targets) {
            MigrationPlan::Finished(report) => return report,
            MigrationPlan::Pending(pool, pending) => (pool, pending),
        };

        log::info!("Running {} pending migration(s)", pending.len());
        let run = MigrationRun::new(pending, hooks);
        *self.active_migration.lock() = Some(run.reporter());
        let report = run.execute(&pool, &|| self.ensure_not_suspended(), &|| self.is_suspended());
        *self.active_migration.lock() = None;

        let mut state = self.state.lock();
        state.has_completed_migrations = true;
        if !report.performed.is_empty() {
            state.has_successfully_written = true;
        }
        report
    }

    /// Runs the migrations on the background write queue and hands the
    /// report to `completion` there.
    ///
    /// When nothing is pending (or the handle is unusable) `completion`
    /// runs on the calling thread instead, without waiting for queued
    /// writes.
    pub fn run_migrations_async(
        self: &Arc<Self>,
        targets: Vec<Arc<dyn MigrationTarget>>,
        hooks: MigrationHooks,
        completion: impl FnOnce(MigrationReport) + Send + 'static,
    ) {
        if let MigrationPlan::Finished(report) = self.plan_migrations(&targets) {
            completion(report);
            return;
        }
        // Planned again on the queue, where runs are serialized
        let storage = Arc::clone(self);
        self.write_queue.dispatch(move || {
            completion(storage.run_migrations(&targets, hooks));
        });
    }

    /// Reports intra-migration progress for the running migration `key`.
    /// Ignored when no run is active.
    pub fn report_migration_progress(&self, key: &str, fraction: f64) {
        let reporter = self.active_migration.lock().clone();
        if let Some(reporter) = reporter {
            reporter.report(key, fraction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::ProcessContext;
    use crate::config::StorageConfig;
    use crate::dispatch::Pending;
    use crate::error::{Error, Result};
    use crate::keystore::MemoryKeychain;
    use crate::migration::{Migration, MigrationContext, MigrationRequirement};
    use parking_lot::Mutex;
    use rusqlite::Connection;
    use std::time::Duration;
    use tempfile::tempdir;

    struct ReportingMigration {
        storage: Mutex<Option<Arc<Storage>>>,
    }

    impl Migration for ReportingMigration {
        fn identifier(&self) -> &str {
            "reporting"
        }

        fn min_expected_run_duration(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn migrate(&self, _conn: &Connection, context: &MigrationContext<'_>) -> Result<()> {
            if let Some(storage) = self.storage.lock().take() {
                storage.report_migration_progress(context.key(), 0.25);
            }
            Ok(())
        }
    }

    struct Target(Vec<Vec<Arc<dyn Migration>>>);

    impl MigrationTarget for Target {
        fn identifier(&self) -> &str {
            "app"
        }

        fn migrations(&self) -> Vec<Vec<Arc<dyn Migration>>> {
            self.0.clone()
        }
    }

    fn storage() -> Arc<Storage> {
        let dir = tempdir().unwrap();
        let storage = Storage::builder(StorageConfig::new(dir.path()))
            .keychain(Arc::new(MemoryKeychain::new()))
            .app_context(Arc::new(ProcessContext::test_harness()))
            .in_memory()
            .build()
            .unwrap();
        storage.configure().unwrap();
        storage
    }

    #[test]
    fn test_report_progress_through_handle() {
        let storage = storage();
        let migration = Arc::new(ReportingMigration {
            storage: Mutex::new(Some(Arc::clone(&storage))),
        });
        let targets: Vec<Arc<dyn MigrationTarget>> =
            vec![Arc::new(Target(vec![vec![migration as Arc<dyn Migration>]]))];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let report = storage.run_migrations(
            &targets,
            MigrationHooks::new().with_progress(move |p, _| sink.lock().push(p)),
        );
        assert!(report.is_success());
        assert!(seen.lock().iter().any(|p| (p - 0.25).abs() < 1e-9));
        assert!(storage.has_completed_migrations());

        // Outside a run the call is ignored
        storage.report_migration_progress("app.reporting", 0.5);
    }

    #[test]
    fn test_second_run_is_empty() {
        let storage = storage();
        let processed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&processed);
        let migration: Arc<dyn Migration> = Arc::new(ReportingMigration {
            storage: Mutex::new(None),
        });
        let targets: Vec<Arc<dyn MigrationTarget>> = vec![Arc::new(Target(vec![vec![migration]]))];

        assert_eq!(
            storage
                .run_migrations(&targets, MigrationHooks::new())
                .performed,
            ["app.reporting"]
        );

        let hooks = MigrationHooks::new().with_requirement_processor(move |_, r: MigrationRequirement| {
            sink.lock().push(r);
            Ok(())
        });
        let second = storage.run_migrations(&targets, hooks);
        assert!(second.is_success());
        assert!(second.performed.is_empty());
        assert!(!second.needs_config_sync);
        assert!(processed.lock().is_empty());
    }

    #[test]
    fn test_suspended_run_fails_fast() {
        let storage = storage();
        storage.suspend();
        let report = storage.run_migrations(&[], MigrationHooks::new());
        assert!(matches!(report.result, Err(Error::DatabaseSuspended)));
        assert!(!storage.has_completed_migrations());
    }

    #[test]
    fn test_empty_async_run_does_not_wait_for_writer() {
        let storage = storage();
        let (started_tx, started) = std::sync::mpsc::channel();
        storage.write_async(
            move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(800));
                Ok(())
            },
            |_: Result<()>| {},
        );
        started.recv().unwrap();

        let begin = std::time::Instant::now();
        let (completer, pending) = Pending::channel();
        storage.run_migrations_async(Vec::new(), MigrationHooks::new(), move |report| {
            completer.complete(report.result.map(|()| report.performed.len()));
        });
        let delivered = pending.wait_timeout(Duration::from_millis(200));

        assert!(matches!(delivered, Some(Ok(0))));
        assert!(begin.elapsed() < Duration::from_millis(200));
        assert!(storage.has_completed_migrations());
    }

    #[test]
    fn test_async_run_delivers_report() {
        let storage = storage();
        let (completer, pending) = Pending::channel();
        storage.run_migrations_async(Vec::new(), MigrationHooks::new(), move |report| {
            completer.complete(report.result.map(|()| report.performed.len()));
        });
        assert_eq!(pending.wait().unwrap(), 0);
        assert!(storage.has_completed_migrations());
    }
}
