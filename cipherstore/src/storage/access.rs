//! Read/write gateway.
//!
//! Every access follows the same path: check that the handle is usable,
//! arm the slow-operation timer, run the body in a transaction (suspension
//! is checked again once the connection is held), record success, and turn
//! failures into `None` or an error result depending on the variant.

use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::dispatch::{Pending, Scheduler, TimerQueue, TimerToken};
use crate::error::{Error, Result};
use crate::observation::{
    self, AccessGate, ObservationHandle, TransactionObserver, ValueObservation,
};

use super::Storage;

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Deferred transaction on a reader.
    Read,
    /// Immediate transaction on the writer.
    Write,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Diagnostics for one operation. Lives only as long as the operation.
#[derive(Debug)]
pub struct CallContext<'a> {
    storage: &'a Storage,
    location: &'static Location<'static>,
    kind: AccessKind,
    started: Instant,
}

impl<'a> CallContext<'a> {
    fn new(storage: &'a Storage, kind: AccessKind, location: &'static Location<'static>) -> Self {
        Self {
            storage,
            location,
            kind,
            started: Instant::now(),
        }
    }

    /// Where the operation was requested.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Read or write.
    #[must_use]
    pub const fn kind(&self) -> AccessKind {
        self.kind
    }

    /// Time since the operation started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The handle the operation runs against.
    #[must_use]
    pub const fn storage(&self) -> &'a Storage {
        self.storage
    }
}

struct SlowOperationTimer {
    token: Option<TimerToken>,
}

impl SlowOperationTimer {
    fn arm(context: &CallContext<'_>, threshold: Duration) -> Self {
        let location = context.location;
        let kind = context.kind;
        let token = TimerQueue::shared().map(|timers| {
            timers.schedule(threshold, move || {
                log::warn!(
                    "Slow database {kind} from {location} still running after {:.1}s",
                    threshold.as_secs_f64()
                );
            })
        });
        Self { token }
    }

    /// Stops the timer. Returns whether the operation was reported slow.
    fn disarm(self, context: &CallContext<'_>) -> bool {
        let Some(token) = self.token else {
            return false;
        };
        let slow = !token.cancel() && token.has_fired();
        if slow {
            log::warn!(
                "Slow database {} from {} completed after {:.1}s",
                context.kind,
                context.location,
                context.elapsed().as_secs_f64()
            );
        }
        slow
    }
}

/// How a failed access is logged. Invalid handles are not logged: callers
/// learn about them from the result. Interrupts come from suspension;
/// aborts are only expected while suspended.
fn failure_level(error: &Error, suspended: bool) -> Option<log::Level> {
    match error {
        Error::DatabaseInvalid => None,
        Error::DatabaseSuspended | Error::Interrupted => Some(log::Level::Info),
        Error::Aborted if suspended => Some(log::Level::Info),
        _ => Some(log::Level::Error),
    }
}

impl Storage {
    fn perform<T>(
        &self,
        context: &CallContext<'_>,
        body: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let pool = self.pool()?;
        let timer = SlowOperationTimer::arm(context, self.config.slow_operation_threshold());
        let guarded = |conn: &Connection| {
            self.ensure_not_suspended()?;
            body(conn)
        };
        let result = match context.kind {
            AccessKind::Read => pool.read(guarded),
            AccessKind::Write => pool.write(guarded),
        };
        let _ = timer.disarm(context);

        if result.is_ok() {
            let mut state = self.state.lock();
            match context.kind {
                AccessKind::Read => state.has_successfully_read = true,
                AccessKind::Write => state.has_successfully_written = true,
            }
        }
        result
    }

    fn log_failure(&self, context: &CallContext<'_>, error: &Error) {
        match failure_level(error, self.is_suspended()) {
            Some(log::Level::Info) => log::info!(
                "Database {} from {} skipped: {error}",
                context.kind,
                context.location
            ),
            Some(_) => log::error!(
                "Database {} from {} failed after {:.3}s: {error}",
                context.kind,
                context.location,
                context.elapsed().as_secs_f64()
            ),
            None => {}
        }
    }

    fn run<T>(
        &self,
        kind: AccessKind,
        location: &'static Location<'static>,
        body: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let context = CallContext::new(self, kind, location);
        let result = self.perform(&context, body);
        if let Err(e) = &result {
            self.log_failure(&context, e);
        }
        result
    }

    /// Runs `body` in a write transaction. Returns `None` if the database is
    /// unavailable or the body failed (the failure is logged).
    #[track_caller]
    pub fn write<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Option<T> {
        self.run(AccessKind::Write, Location::caller(), body).ok()
    }

    /// Like [`write`](Self::write) but returns the error.
    ///
    /// # Errors
    ///
    /// [`Error::DatabaseInvalid`], [`Error::DatabaseSuspended`], a
    /// classified engine error, or the body's error.
    #[track_caller]
    pub fn try_write<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.run(AccessKind::Write, Location::caller(), body)
    }

    /// Runs `body` in a write transaction on the background write queue and
    /// passes the outcome to `completion` there.
    #[track_caller]
    pub fn write_async<T: 'static>(
        self: &Arc<Self>,
        body: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
        completion: impl FnOnce(Result<T>) + Send + 'static,
    ) {
        let location = Location::caller();
        let storage = Arc::clone(self);
        self.write_queue.dispatch(move || {
            completion(storage.run(AccessKind::Write, location, body));
        });
    }

    /// Runs `body` in a write transaction on the background write queue.
    #[track_caller]
    pub fn write_publisher<T: Send + 'static>(
        self: &Arc<Self>,
        body: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
    ) -> Pending<T> {
        let location = Location::caller();
        let storage = Arc::clone(self);
        self.write_queue
            .submit(move || storage.run(AccessKind::Write, location, body))
    }

    /// Runs `body` in a read transaction. Returns `None` if the database is
    /// unavailable or the body failed (the failure is logged).
    #[track_caller]
    pub fn read<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Option<T> {
        self.run(AccessKind::Read, Location::caller(), body).ok()
    }

    /// Like [`read`](Self::read) but returns the error.
    ///
    /// # Errors
    ///
    /// See [`try_write`](Self::try_write).
    #[track_caller]
    pub fn try_read<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.run(AccessKind::Read, Location::caller(), body)
    }

    /// Runs `body` in a read transaction on the background read queue.
    #[track_caller]
    pub fn read_publisher<T: Send + 'static>(
        self: &Arc<Self>,
        body: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
    ) -> Pending<T> {
        let location = Location::caller();
        let storage = Arc::clone(self);
        self.read_queue
            .submit(move || storage.run(AccessKind::Read, location, body))
    }

    /// Starts observing a value. If the database is unusable `on_error`
    /// receives the reason and the returned handle is inert.
    ///
    /// Refreshes that come due while the handle is suspended are not run;
    /// `on_error` receives [`Error::DatabaseSuspended`] instead.
    pub fn observe<T: Send + 'static>(
        self: &Arc<Self>,
        observation: ValueObservation<T>,
        scheduler: Arc<dyn Scheduler>,
        on_error: impl Fn(Error) + Send + Sync + 'static,
        on_change: impl Fn(T) + Send + Sync + 'static,
    ) -> ObservationHandle {
        match self.pool() {
            Ok(pool) => observation::start(
                &pool,
                self.access_gate(),
                observation,
                scheduler,
                Arc::new(on_error),
                Arc::new(on_change),
            ),
            Err(e) => {
                if matches!(e, Error::DatabaseSuspended) {
                    log::info!("Not starting observation: {e}");
                }
                on_error(Error::DatabaseInvalid);
                ObservationHandle::inert()
            }
        }
    }

    fn access_gate(self: &Arc<Self>) -> AccessGate {
        let storage = Arc::downgrade(self);
        Arc::new(move || match storage.upgrade() {
            Some(storage) => storage.ensure_not_suspended(),
            None => Err(Error::DatabaseInvalid),
        })
    }

    /// Registers a raw transaction observer from the write queue.
    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) -> Pending<()> {
        match self.pool() {
            Ok(pool) => self.write_queue.submit(move || {
                pool.add_observer(observer);
                Ok(())
            }),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Unregisters a raw transaction observer from the write queue.
    pub fn remove_observer(&self, observer: Arc<dyn TransactionObserver>) -> Pending<()> {
        match self.pool() {
            Ok(pool) => self.write_queue.submit(move || {
                pool.remove_observer(&observer);
                Ok(())
            }),
            Err(e) => Pending::ready(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::ProcessContext;
    use crate::config::StorageConfig;
    use crate::dispatch::ImmediateScheduler;
    use crate::keystore::MemoryKeychain;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

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
            .try_write(|conn| {
                conn.execute_batch("CREATE TABLE notes (body TEXT)")?;
                Ok(())
            })
            .unwrap();
        storage
    }

    fn count(storage: &Storage) -> Option<i64> {
        storage.read(|conn| Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get(0))?))
    }

    #[test]
    fn test_write_then_read() {
        let storage = storage();
        let inserted = storage.write(|conn| {
            conn.execute("INSERT INTO notes VALUES ('a')", [])?;
            Ok(conn.last_insert_rowid())
        });
        assert_eq!(inserted, Some(1));
        assert_eq!(count(&storage), Some(1));
        assert!(storage.has_successfully_read());
        assert!(storage.has_successfully_written());
    }

    #[test]
    fn test_suspended_write_never_runs_body() {
        let storage = storage();
        storage.suspend();

        let ran = AtomicBool::new(false);
        let result = storage.write(|_| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(result.is_none());
        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(
            storage.try_read(|_| Ok(())),
            Err(Error::DatabaseSuspended)
        ));

        storage.resume();
        assert_eq!(count(&storage), Some(0));
    }

    #[test]
    fn test_body_error_becomes_none() {
        let storage = storage();
        let result: Option<()> = storage.write(|conn| {
            conn.execute("INSERT INTO missing VALUES (1)", [])?;
            Ok(())
        });
        assert!(result.is_none());
        assert!(storage.try_write(|_| Err::<(), _>(Error::Cancelled)).is_err());
    }

    #[test]
    fn test_invalid_storage() {
        let dir = tempdir().unwrap();
        let storage = Storage::builder(StorageConfig::new(dir.path()))
            .keychain(Arc::new(MemoryKeychain::new()))
            .in_memory()
            .build()
            .unwrap();

        assert!(storage.read(|_| Ok(())).is_none());
        assert!(matches!(
            storage.try_write(|_| Ok(())),
            Err(Error::DatabaseInvalid)
        ));
        assert!(matches!(
            storage.read_publisher(|_| Ok(())).wait(),
            Err(Error::DatabaseInvalid)
        ));
    }

    #[test]
    fn test_write_async_and_publishers() {
        let storage = storage();
        let (completer, done) = Pending::channel();
        storage.write_async(
            |conn| Ok(conn.execute("INSERT INTO notes VALUES ('x')", [])?),
            move |result| completer.complete(result),
        );
        assert_eq!(done.wait().unwrap(), 1);

        let written = storage.write_publisher(|conn| Ok(conn.execute("INSERT INTO notes VALUES ('y')", [])?));
        assert_eq!(written.wait().unwrap(), 1);

        let total = storage
            .read_publisher(|conn| Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get::<_, i64>(0))?));
        assert_eq!(total.wait().unwrap(), 2);
    }

    #[test]
    fn test_failure_levels() {
        assert_eq!(failure_level(&Error::DatabaseInvalid, false), None);
        assert_eq!(failure_level(&Error::DatabaseInvalid, true), None);
        assert_eq!(
            failure_level(&Error::DatabaseSuspended, true),
            Some(log::Level::Info)
        );
        assert_eq!(failure_level(&Error::Interrupted, false), Some(log::Level::Info));
        assert_eq!(failure_level(&Error::Aborted, true), Some(log::Level::Info));
        assert_eq!(failure_level(&Error::Aborted, false), Some(log::Level::Error));
        assert_eq!(failure_level(&Error::Cancelled, true), Some(log::Level::Error));
    }

    #[test]
    fn test_slow_operation_timer_fires() {
        let storage = storage();
        let context = CallContext::new(&storage, AccessKind::Write, Location::caller());

        let timer = SlowOperationTimer::arm(&context, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));
        assert!(timer.disarm(&context));

        let timer = SlowOperationTimer::arm(&context, Duration::from_secs(30));
        assert!(!timer.disarm(&context));
    }

    #[test]
    fn test_slow_operation_still_completes() {
        let dir = tempdir().unwrap();
        let config =
            StorageConfig::new(dir.path()).with_slow_operation_threshold(Duration::from_millis(10));
        let storage = Storage::builder(config)
            .keychain(Arc::new(MemoryKeychain::new()))
            .app_context(Arc::new(ProcessContext::test_harness()))
            .in_memory()
            .build()
            .unwrap();
        storage.configure().unwrap();

        let value = storage.write(|_| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(7)
        });
        assert_eq!(value, Some(7));
        assert!(storage.has_successfully_written());
    }

    #[test]
    fn test_call_context_records_caller() {
        let storage = storage();
        let context = CallContext::new(&storage, AccessKind::Read, Location::caller());
        assert_eq!(context.location().file(), file!());
        assert_eq!(context.kind(), AccessKind::Read);
        assert!(std::ptr::eq(context.storage(), &*storage));
    }

    #[test]
    fn test_observe_value() {
        let storage = storage();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observation = ValueObservation::tracking_tables(["notes"], |conn| {
            Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get::<_, i64>(0))?)
        });

        let handle = storage.observe(
            observation,
            Arc::new(ImmediateScheduler),
            |_| {},
            move |v| sink.lock().push(v),
        );
        storage.write(|conn| Ok(conn.execute("INSERT INTO notes VALUES ('z')", [])?));
        drop(handle);
        storage.write(|conn| Ok(conn.execute("INSERT INTO notes VALUES ('w')", [])?));

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn test_observe_invalid_reports_error() {
        let dir = tempdir().unwrap();
        let storage = Storage::builder(StorageConfig::new(dir.path()))
            .keychain(Arc::new(MemoryKeychain::new()))
            .in_memory()
            .build()
            .unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&errors);

        let handle = storage.observe(
            ValueObservation::tracking(|_| Ok(())),
            Arc::new(ImmediateScheduler),
            move |e| {
                assert!(matches!(e, Error::DatabaseInvalid));
                sink.fetch_add(1, Ordering::SeqCst);
            },
            |()| {},
        );
        assert!(!handle.is_active());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_observer_registration() {
        struct Counter(AtomicUsize);
        impl TransactionObserver for Counter {
            fn observes(&self, table: &str) -> bool {
                table == "notes"
            }
            fn database_did_commit(&self, _tables: &BTreeSet<String>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let storage = storage();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        storage.add_observer(counter.clone()).wait().unwrap();
        storage.write(|conn| Ok(conn.execute("INSERT INTO notes VALUES ('a')", [])?));
        storage.remove_observer(counter.clone()).wait().unwrap();
        storage.write(|conn| Ok(conn.execute("INSERT INTO notes VALUES ('b')", [])?));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
