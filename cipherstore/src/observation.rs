//! Change observation.
//!
//! Two layers: raw [`TransactionObserver`]s receive the set of tables each
//! committed write touched; [`ValueObservation`]s build on them to re-fetch
//! a value whenever a relevant write commits and deliver it through a
//! [`Scheduler`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use rusqlite::Connection;

use crate::database::ConnectionPool;
use crate::dispatch::Scheduler;
use crate::error::{Error, Result};

/// Receives notifications about committed and rolled back writes.
pub trait TransactionObserver: Send + Sync {
    /// Whether changes to `table` are of interest.
    fn observes(&self, table: &str) -> bool;

    /// Called after a write that changed at least one observed table has
    /// committed. `tables` holds every table the write changed.
    fn database_did_commit(&self, tables: &BTreeSet<String>);

    /// Called after a write was rolled back.
    fn database_did_rollback(&self) {}
}

type Fetch<T> = Arc<dyn Fn(&Connection) -> Result<T> + Send + Sync>;

/// Decides whether the pool may be touched right now.
pub(crate) type AccessGate = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A value derived from the database, re-fetched after relevant writes.
///
/// # Examples
///
/// ```
/// use cipherstore::observation::ValueObservation;
///
/// let count = ValueObservation::tracking_tables(["messages"], |conn| {
///     Ok(conn.query_row("SELECT count(*) FROM messages", [], |r| r.get::<_, i64>(0))?)
/// });
/// assert_eq!(count.tables(), ["messages"]);
/// ```
pub struct ValueObservation<T> {
    tables: Vec<String>,
    fetch: Fetch<T>,
}

impl<T> Clone for ValueObservation<T> {
    fn clone(&self) -> Self {
        Self {
            tables: self.tables.clone(),
            fetch: Arc::clone(&self.fetch),
        }
    }
}

impl<T> ValueObservation<T> {
    /// Observes every table.
    pub fn tracking(fetch: impl Fn(&Connection) -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            tables: Vec::new(),
            fetch: Arc::new(fetch),
        }
    }

    /// Observes only the named tables.
    pub fn tracking_tables<S: Into<String>>(
        tables: impl IntoIterator<Item = S>,
        fetch: impl Fn(&Connection) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            fetch: Arc::new(fetch),
        }
    }

    /// The observed tables. Empty means all tables.
    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    fn tracks(&self, table: &str) -> bool {
        self.tables.is_empty() || self.tables.iter().any(|t| t.eq_ignore_ascii_case(table))
    }
}

impl<T> std::fmt::Debug for ValueObservation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueObservation")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

/// Keeps an observation alive. Dropping it cancels the observation.
pub struct ObservationHandle {
    registration: Option<(Weak<ConnectionPool>, Arc<dyn TransactionObserver>)>,
    cancelled: Arc<AtomicBool>,
}

impl ObservationHandle {
    /// A handle that observes nothing.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            registration: None,
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the observation is still delivering.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops the observation. Deliveries already scheduled are skipped.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some((pool, observer)) = self.registration.take() {
            if let Some(pool) = pool.upgrade() {
                pool.remove_observer(&observer);
            }
        }
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ObservationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

struct Delivery<T> {
    fetch: Fetch<T>,
    pool: Weak<ConnectionPool>,
    gate: AccessGate,
    scheduler: Arc<dyn Scheduler>,
    on_change: Arc<dyn Fn(T) + Send + Sync>,
    on_error: Arc<dyn Fn(Error) + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            fetch: Arc::clone(&self.fetch),
            pool: Weak::clone(&self.pool),
            gate: Arc::clone(&self.gate),
            scheduler: Arc::clone(&self.scheduler),
            on_change: Arc::clone(&self.on_change),
            on_error: Arc::clone(&self.on_error),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<T: Send + 'static> Delivery<T> {
    fn refresh(&self) {
        let delivery = self.clone();
        self.scheduler.schedule(Box::new(move || delivery.fetch_and_deliver()));
    }

    fn fetch_and_deliver(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let fetch = Arc::clone(&self.fetch);
        let gate = Arc::clone(&self.gate);
        // Checked again once a connection is held
        let result = (self.gate)().and_then(|()| {
            pool.read(move |conn| {
                gate()?;
                fetch(conn)
            })
        });
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        match result {
            Ok(value) => (self.on_change)(value),
            Err(e) => (self.on_error)(e),
        }
    }
}

struct ObservationCore<T> {
    observation: ValueObservation<T>,
    delivery: Delivery<T>,
}

impl<T: Send + 'static> TransactionObserver for ObservationCore<T> {
    fn observes(&self, table: &str) -> bool {
        self.observation.tracks(table)
    }

    fn database_did_commit(&self, _tables: &BTreeSet<String>) {
        self.delivery.refresh();
    }
}

/// Registers `observation` on `pool` and schedules the initial fetch.
/// Every fetch first asks `gate`; a refusal goes to `on_error` and the
/// pool is left alone.
pub(crate) fn start<T: Send + 'static>(
    pool: &Arc<ConnectionPool>,
    gate: AccessGate,
    observation: ValueObservation<T>,
    scheduler: Arc<dyn Scheduler>,
    on_error: Arc<dyn Fn(Error) + Send + Sync>,
    on_change: Arc<dyn Fn(T) + Send + Sync>,
) -> ObservationHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let delivery = Delivery {
        fetch: Arc::clone(&observation.fetch),
        pool: Arc::downgrade(pool),
        gate,
        scheduler,
        on_change,
        on_error,
        cancelled: Arc::clone(&cancelled),
    };
    let core = Arc::new(ObservationCore {
        observation,
        delivery: delivery.clone(),
    });
    let observer: Arc<dyn TransactionObserver> = core;
    pool.add_observer(Arc::clone(&observer));
    delivery.refresh();

    ObservationHandle {
        registration: Some((Arc::downgrade(pool), observer)),
        cancelled,
    }
}
