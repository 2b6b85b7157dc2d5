//! Integration tests for the migration engine driven through the handle.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cipherstore::dispatch::Pending;
use cipherstore::migration::{applied_keys, MigrationHooks, MigrationRequirement, MigrationTarget};

use common::{Fixture, TestMigration, TestTarget};

#[test]
fn test_waves_interleave_across_targets() {
    let fixture = Fixture::in_memory();
    let log = Arc::new(Mutex::new(Vec::new()));
    let targets = vec![
        TestTarget::logging("b", &[&["b1"], &["b2"]], &log),
        TestTarget::logging("a", &[&["a1", "a2"], &["a3"]], &log),
    ];

    let report = fixture.storage.run_migrations(&targets, MigrationHooks::new());

    assert!(report.is_success());
    let expected = ["a.a1", "a.a2", "b.b1", "a.a3", "b.b2"];
    assert_eq!(*log.lock(), expected);
    assert_eq!(report.performed, expected);
    let applied = fixture.storage.try_read(|conn| applied_keys(conn)).unwrap();
    assert_eq!(applied, expected);
}

#[test]
fn test_second_run_executes_nothing() {
    let fixture = Fixture::in_memory();
    let migration = TestMigration::new("sync").syncing_config();
    let runs = Arc::clone(&migration.runs);
    let targets = vec![TestTarget::new("app", vec![vec![migration.into_dyn()]])];

    let first = fixture.storage.run_migrations(&targets, MigrationHooks::new());
    assert!(first.needs_config_sync);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let second = fixture.storage.run_migrations(&targets, MigrationHooks::new());
    assert!(second.is_success());
    assert!(second.performed.is_empty());
    assert!(!second.needs_config_sync);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(fixture.storage.has_completed_migrations());
}

#[test]
fn test_shared_requirement_processed_once() {
    let fixture = Fixture::in_memory();
    let processed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&processed);
    let targets = vec![TestTarget::new(
        "app",
        vec![vec![
            TestMigration::new("first")
                .requiring(&[MigrationRequirement::SessionIdCached])
                .into_dyn(),
            TestMigration::new("second")
                .requiring(&[MigrationRequirement::SessionIdCached])
                .into_dyn(),
        ]],
    )];

    let hooks = MigrationHooks::new().with_requirement_processor(move |_, requirement| {
        sink.lock().push(requirement);
        Ok(())
    });
    let report = fixture.storage.run_migrations(&targets, hooks);

    assert!(report.is_success());
    assert_eq!(
        *processed.lock(),
        [
            MigrationRequirement::SessionIdCached,
            MigrationRequirement::ConfigStateLoaded
        ]
    );
}

#[test]
fn test_progress_is_weighted_by_expected_duration() {
    let fixture = Fixture::in_memory();
    let targets = vec![TestTarget::new(
        "app",
        vec![vec![
            TestMigration::new("short")
                .with_duration(Duration::from_secs(2))
                .into_dyn(),
            TestMigration::new("long")
                .with_duration(Duration::from_secs(8))
                .into_dyn(),
        ]],
    )];
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let report = fixture.storage.run_migrations(
        &targets,
        MigrationHooks::new().with_progress(move |progress, _| sink.lock().push(progress)),
    );

    assert!(report.is_success());
    let seen = seen.lock();
    let close = |expected: f64| seen.iter().any(|p| (p - expected).abs() < 1e-9);
    assert!(close(0.10), "{seen:?}");
    assert!(close(0.60), "{seen:?}");
    assert!((seen.last().copied().unwrap() - 1.0).abs() < 1e-9);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_duplicate_keys_fail_the_run() {
    let fixture = Fixture::in_memory();
    let targets: Vec<Arc<dyn MigrationTarget>> = vec![TestTarget::new(
        "app",
        vec![vec![
            TestMigration::new("same").into_dyn(),
            TestMigration::new("same").into_dyn(),
        ]],
    )];

    let report = fixture.storage.run_migrations(&targets, MigrationHooks::new());
    assert!(report.result.is_err());
    assert!(report.performed.is_empty());
}

#[test]
fn test_async_migration_then_write() {
    let fixture = Fixture::in_memory();
    let storage = Arc::clone(&fixture.storage);
    let targets = vec![TestTarget::new(
        "app",
        vec![vec![TestMigration::new("create").into_dyn()]],
    )];

    let (completer, migrated) = Pending::channel();
    storage.run_migrations_async(targets, MigrationHooks::new(), move |report| {
        completer.complete(report.result.map(|()| report.performed));
    });
    assert_eq!(migrated.wait().unwrap(), ["app.create"]);

    let rows = storage
        .write_publisher(|conn| {
            conn.execute("INSERT INTO migration_log VALUES ('after')", [])?;
            Ok(conn.query_row("SELECT count(*) FROM migration_log", [], |r| r.get::<_, i64>(0))?)
        })
        .wait()
        .unwrap();
    assert_eq!(rows, 2);
    assert!(storage.has_successfully_written());
}

#[test]
fn test_async_run_with_nothing_pending_skips_write_queue() {
    let fixture = Fixture::file_backed();
    let storage = Arc::clone(&fixture.storage);
    storage.configure().unwrap();
    let targets = vec![TestTarget::new(
        "app",
        vec![vec![TestMigration::new("create").into_dyn()]],
    )];
    assert!(storage
        .run_migrations(&targets, MigrationHooks::new())
        .is_success());

    // Hold the writer on the write queue
    let (started_tx, started) = std::sync::mpsc::channel();
    storage.write_async(
        move |_| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(800));
            Ok(())
        },
        |_: cipherstore::Result<()>| {},
    );
    started.recv().unwrap();

    let begin = Instant::now();
    let (completer, done) = Pending::channel();
    storage.run_migrations_async(targets, MigrationHooks::new(), move |report| {
        completer.complete(report.result.map(|()| report.performed.len()));
    });

    assert!(matches!(
        done.wait_timeout(Duration::from_millis(200)),
        Some(Ok(0))
    ));
    assert!(begin.elapsed() < Duration::from_millis(200));
}
