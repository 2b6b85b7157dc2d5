//! The connection pool: one writer, a bounded set of readers.
//!
//! Writes are serialized on the writer connection inside `BEGIN IMMEDIATE`
//! transactions. Reads check out a read-only connection from an r2d2 pool
//! (opened lazily, up to `max_readers`) and run in a deferred transaction,
//! so in WAL mode they never block the writer. In-memory pools have no
//! separate readers and run reads on the writer.
//!
//! Committed writes are reported to registered [`TransactionObserver`]s
//! with the set of tables they touched. Observers run after the writer has
//! been released, so they may read from the pool.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, InterruptHandle, TransactionBehavior};

use crate::error::{Error, Result};
use crate::observation::TransactionObserver;

use super::config::{PoolConfig, PoolLocation};
use super::connection::{self, ConnectionSetup, Role};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type Interrupts = Arc<Mutex<Vec<InterruptHandle>>>;

/// Records the interrupt handle of every reader the r2d2 pool opens.
struct RegisterInterrupts(Interrupts);

impl std::fmt::Debug for RegisterInterrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterInterrupts")
            .field("handles", &self.0.lock().len())
            .finish()
    }
}

impl CustomizeConnection<Connection, rusqlite::Error> for RegisterInterrupts {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        self.0.lock().push(conn.get_interrupt_handle());
        Ok(())
    }
}

/// A pool of connections to one database.
pub struct ConnectionPool {
    id: u64,
    config: PoolConfig,
    writer: Mutex<Connection>,
    readers: Option<Pool<SqliteConnectionManager>>,
    interrupts: Interrupts,
    observers: Mutex<Vec<Arc<dyn TransactionObserver>>>,
    changed_tables: Arc<Mutex<BTreeSet<String>>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens the pool. The writer connection is opened (and the setup hook
    /// run on it) immediately; readers are opened on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer cannot be opened or configured, which
    /// includes a setup hook failure or a wrong encryption key.
    ///
    /// # Examples
    ///
    /// ```
    /// use cipherstore::database::{ConnectionPool, PoolConfig};
    ///
    /// let pool = ConnectionPool::open(PoolConfig::in_memory(), None).unwrap();
    /// pool.write(|conn| {
    ///     conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1);")?;
    ///     Ok(())
    /// })
    /// .unwrap();
    /// let count: i64 = pool
    ///     .read(|conn| Ok(conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0))?))
    ///     .unwrap();
    /// assert_eq!(count, 1);
    /// ```
    pub fn open(config: PoolConfig, setup: Option<ConnectionSetup>) -> Result<Self> {
        let writer = connection::open(&config, Role::Writer, setup.as_ref())
            .map_err(|e| classify(e, &config))?;

        let changed_tables = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&changed_tables);
        writer.update_hook(Some(
            move |_action, _db: &str, table: &str, _rowid: i64| {
                sink.lock().insert(table.to_string());
            },
        ));

        let interrupts: Interrupts = Arc::new(Mutex::new(vec![writer.get_interrupt_handle()]));
        let readers = match &config.location {
            PoolLocation::File(path) => Some(build_readers(
                connection::reader_manager(path, &config, setup),
                &config,
                Arc::clone(&interrupts),
            )),
            PoolLocation::Memory => None,
        };
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Opened connection pool {id} ({:?})", config.location);

        Ok(Self {
            id,
            config,
            writer: Mutex::new(writer),
            readers,
            interrupts,
            observers: Mutex::new(Vec::new()),
            changed_tables,
        })
    }

    /// Process-unique identity of this pool.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The configuration the pool was opened with.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of reader connections opened so far.
    #[must_use]
    pub fn open_readers(&self) -> usize {
        self.readers.as_ref().map_or(0, |readers| {
            usize::try_from(readers.state().connections).unwrap_or(usize::MAX)
        })
    }

    /// Runs `body` in an immediate write transaction and commits it if the
    /// body succeeds. Observers are notified after the writer is released.
    ///
    /// # Errors
    ///
    /// Returns the body's error (after rolling back), or a classified engine
    /// error: [`Error::LockTimeout`], [`Error::Interrupted`],
    /// [`Error::Aborted`].
    pub fn write<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let outcome = {
            let mut conn = self.writer.lock();
            self.changed_tables.lock().clear();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| self.classify(e.into()))?;
            match body(&tx) {
                Ok(value) => {
                    tx.commit().map_err(|e| self.classify(e.into()))?;
                    Ok((value, std::mem::take(&mut *self.changed_tables.lock())))
                }
                // Dropping the transaction rolls it back
                Err(e) => Err(self.classify(e)),
            }
        };

        match outcome {
            Ok((value, tables)) => {
                self.notify_commit(&tables);
                Ok(value)
            }
            Err(e) => {
                self.notify_rollback();
                Err(e)
            }
        }
    }

    /// Runs `body` in a deferred transaction on a read-only connection.
    ///
    /// Blocks while all `max_readers` readers are checked out, for at most
    /// the busy timeout.
    ///
    /// # Errors
    ///
    /// Returns the body's error, [`Error::ReaderPool`] if no reader could be
    /// checked out, or a classified engine error.
    pub fn read<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let Some(readers) = &self.readers else {
            let mut conn = self.writer.lock();
            return run_deferred(&mut conn, body).map_err(|e| self.classify(e));
        };

        let mut conn = readers.get()?;
        run_deferred(&mut conn, body).map_err(|e| self.classify(e))
    }

    /// Interrupts whatever statement each connection is currently running.
    /// Connections stay open and usable.
    pub fn interrupt(&self) {
        let handles = self.interrupts.lock();
        for handle in handles.iter() {
            handle.interrupt();
        }
        log::debug!("Interrupted {} connection(s) of pool {}", handles.len(), self.id);
    }

    /// Registers an observer for committed writes.
    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.lock().push(observer);
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, observer: &Arc<dyn TransactionObserver>) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    fn notify_commit(&self, tables: &BTreeSet<String>) {
        if tables.is_empty() {
            return;
        }
        let observers: Vec<_> = self.observers.lock().clone();
        for observer in observers {
            if tables.iter().any(|t| observer.observes(t)) {
                observer.database_did_commit(tables);
            }
        }
    }

    fn notify_rollback(&self) {
        let observers: Vec<_> = self.observers.lock().clone();
        for observer in observers {
            observer.database_did_rollback();
        }
    }

    fn classify(&self, err: Error) -> Error {
        classify(err, &self.config)
    }
}

fn classify(err: Error, config: &PoolConfig) -> Error {
    match err {
        Error::Database(e) => Error::from_sqlite(e, config.busy_timeout.as_secs()),
        other => other,
    }
}

fn build_readers(
    manager: SqliteConnectionManager,
    config: &PoolConfig,
    interrupts: Interrupts,
) -> Pool<SqliteConnectionManager> {
    // Readers live as long as the pool so every interrupt handle stays live
    Pool::builder()
        .max_size(u32::try_from(config.max_readers.max(1)).unwrap_or(u32::MAX))
        .min_idle(Some(0))
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(config.busy_timeout.max(MIN_CHECKOUT_WAIT))
        .connection_customizer(Box::new(RegisterInterrupts(interrupts)))
        .build_unchecked(manager)
}

const MIN_CHECKOUT_WAIT: Duration = Duration::from_millis(100);

fn run_deferred<T>(
    conn: &mut Connection,
    body: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    let value = body(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn same_observer(a: &Arc<dyn TransactionObserver>, b: &Arc<dyn TransactionObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
