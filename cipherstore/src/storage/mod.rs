//! The database handle.
//!
//! [`Storage`] owns the connection pool and its lifecycle: configuring it
//! (key provisioning, directory protection, pool open), suspending and
//! resuming access, and tearing everything down. Reads, writes and
//! observations go through the gateway methods in `access`; migrations
//! through `migrate`.
//!
//! ```text
//! Unconfigured -> Configuring -> Valid <-> (suspended)
//!                      |           |
//!                      v           v
//!                   Invalid    Destroyed -> Configuring (reconfigure)
//! ```

mod access;
mod migrate;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rusqlite::Connection;
use zeroize::Zeroizing;

use crate::app_context::{AppContext, ProcessContext};
use crate::config::{ConfigLoader, StorageConfig};
use crate::database::{ConnectionPool, ConnectionSetup, DatabaseFiles, PoolConfig};
use crate::dispatch::DispatchQueue;
use crate::error::{Error, Result};
use crate::files;
use crate::keystore::{KeySpecStore, Keychain, SystemKeychain};
use crate::migration::ProgressReporter;

pub use access::{AccessKind, CallContext};

static HAS_CREATED_VALID_INSTANCE: AtomicBool = AtomicBool::new(false);

/// Opens the pool in place of the keyed, file-backed one (tests, tooling).
pub type PoolFactory = Arc<dyn Fn() -> Result<ConnectionPool> + Send + Sync>;

/// Where the handle is in its lifecycle. Suspension is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built but not configured yet.
    Unconfigured,
    /// `configure` is running.
    Configuring,
    /// The pool is open.
    Valid,
    /// Configuration failed; see [`Storage::startup_error`].
    Invalid,
    /// All storage was deleted.
    Destroyed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

struct State {
    lifecycle: Lifecycle,
    pool: Option<Arc<ConnectionPool>>,
    startup_error: Option<Arc<Error>>,
    is_suspended: bool,
    has_completed_migrations: bool,
    has_successfully_read: bool,
    has_successfully_written: bool,
}

/// Handle to the encrypted database.
pub struct Storage {
    config: StorageConfig,
    key_store: Arc<KeySpecStore>,
    pool_factory: Option<PoolFactory>,
    state: Mutex<State>,
    active_migration: Mutex<Option<Arc<ProgressReporter>>>,
    write_queue: DispatchQueue,
    read_queue: DispatchQueue,
}

/// Builds a [`Storage`] with injected collaborators.
///
/// # Examples
///
/// ```
/// use cipherstore::keystore::MemoryKeychain;
/// use cipherstore::{ProcessContext, Storage, StorageConfig};
/// use std::sync::Arc;
///
/// let dir = tempfile::tempdir().unwrap();
/// let storage = Storage::builder(StorageConfig::new(dir.path()))
///     .keychain(Arc::new(MemoryKeychain::new()))
///     .app_context(Arc::new(ProcessContext::test_harness()))
///     .in_memory()
///     .build()
///     .unwrap();
/// storage.configure().unwrap();
/// assert!(storage.is_valid());
/// ```
pub struct StorageBuilder {
    config: StorageConfig,
    keychain: Option<Arc<dyn Keychain>>,
    context: Option<Arc<dyn AppContext>>,
    pool_factory: Option<PoolFactory>,
}

impl StorageBuilder {
    /// Uses `keychain` instead of the system credential store.
    #[must_use]
    pub fn keychain(mut self, keychain: Arc<dyn Keychain>) -> Self {
        self.keychain = Some(keychain);
        self
    }

    /// Uses `context` instead of a foreground main-app context.
    #[must_use]
    pub fn app_context(mut self, context: Arc<dyn AppContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Opens pools with `factory`, bypassing key handling.
    #[must_use]
    pub fn pool_factory(mut self, factory: PoolFactory) -> Self {
        self.pool_factory = Some(factory);
        self
    }

    /// Opens a fresh unencrypted in-memory pool on every configure.
    #[must_use]
    pub fn in_memory(self) -> Self {
        self.pool_factory(Arc::new(|| ConnectionPool::open(PoolConfig::in_memory(), None)))
    }

    /// Builds the handle. It still needs [`Storage::configure`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the background
    /// queues cannot be started.
    pub fn build(self) -> Result<Arc<Storage>> {
        self.config.validate()?;
        let keychain = self.keychain.unwrap_or_else(|| Arc::new(SystemKeychain::new()));
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(ProcessContext::main_app()));
        let key_store = Arc::new(KeySpecStore::new(&self.config, keychain, context));

        Ok(Arc::new(Storage {
            key_store,
            pool_factory: self.pool_factory,
            state: Mutex::new(State {
                lifecycle: Lifecycle::Unconfigured,
                pool: None,
                startup_error: None,
                is_suspended: false,
                has_completed_migrations: false,
                has_successfully_read: false,
                has_successfully_written: false,
            }),
            active_migration: Mutex::new(None),
            write_queue: DispatchQueue::new("cipherstore.write")?,
            read_queue: DispatchQueue::new("cipherstore.read")?,
            config: self.config,
        }))
    }
}

impl Storage {
    /// Starts building a handle for `config`.
    #[must_use]
    pub fn builder(config: StorageConfig) -> StorageBuilder {
        StorageBuilder {
            config,
            keychain: None,
            context: None,
            pool_factory: None,
        }
    }

    /// The process-wide handle: configuration loaded from the resolved data
    /// directory, system keychain, configured on first use.
    ///
    /// Configuration failures are recorded on the handle, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the handle
    /// cannot be built.
    pub fn shared() -> Result<Arc<Self>> {
        static SHARED: OnceLock<Arc<Storage>> = OnceLock::new();
        if let Some(storage) = SHARED.get() {
            return Ok(Arc::clone(storage));
        }
        let config = ConfigLoader::load(&ConfigLoader::resolve_data_dir()?)?;
        let candidate = Self::builder(config).build()?;
        let storage = SHARED.get_or_init(|| candidate);
        if storage.begin_configuring(false) {
            let _ = storage.finish_configuring();
        }
        Ok(Arc::clone(storage))
    }

    /// Whether any handle in this process has reached [`Lifecycle::Valid`]
    /// since the last storage reset.
    #[must_use]
    pub fn has_created_valid_instance() -> bool {
        HAS_CREATED_VALID_INSTANCE.load(Ordering::SeqCst)
    }

    /// Provisions the key and opens the pool.
    ///
    /// On failure the handle stays invalid and the cause is kept in
    /// [`startup_error`](Self::startup_error).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartupFailed`] describing the cause.
    pub fn configure(&self) -> Result<()> {
        self.begin_configuring(true);
        self.finish_configuring()
    }

    /// Drops the current pool (if any) and configures again. Used after
    /// [`reset_all_storage`](Self::reset_all_storage).
    ///
    /// # Errors
    ///
    /// See [`configure`](Self::configure).
    pub fn reconfigure(&self) -> Result<()> {
        log::info!("Reconfiguring database");
        self.state.lock().pool = None;
        self.configure()
    }

    fn begin_configuring(&self, force: bool) -> bool {
        let mut state = self.state.lock();
        if !force && state.lifecycle != Lifecycle::Unconfigured {
            return false;
        }
        state.lifecycle = Lifecycle::Configuring;
        state.startup_error = None;
        true
    }

    fn finish_configuring(&self) -> Result<()> {
        let opened = self.open_pool();
        let mut state = self.state.lock();
        match opened {
            Ok(pool) => {
                log::info!("Database configured (pool {})", pool.id());
                state.pool = Some(Arc::new(pool));
                state.lifecycle = Lifecycle::Valid;
                HAS_CREATED_VALID_INSTANCE.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                log::error!("Database startup failed: {e}");
                let reason = e.to_string();
                state.pool = None;
                state.lifecycle = Lifecycle::Invalid;
                state.startup_error = Some(Arc::new(e));
                Err(Error::StartupFailed { reason })
            }
        }
    }

    fn open_pool(&self) -> Result<ConnectionPool> {
        let dir = self.config.database_dir();
        files::ensure_directory_exists(&dir)?;
        files::protect(&dir)?;

        if let Some(factory) = &self.pool_factory {
            return factory();
        }

        // Fail early (and generate on first run); the copy is zeroed on drop
        drop(self.key_store.get_or_generate()?);

        let config = PoolConfig::new(self.config.database_path())
            .with_max_readers(self.config.max_readers)
            .with_busy_timeout(self.config.busy_timeout());
        let key_store = Arc::clone(&self.key_store);
        let setup: ConnectionSetup = Arc::new(move |conn: &Connection| {
            let spec = key_store.fetch()?;
            let pragma = Zeroizing::new(format!("PRAGMA key = \"{}\";", spec.to_blob_literal().as_str()));
            conn.execute_batch(&pragma)?;
            conn.execute_batch("PRAGMA cipher_plaintext_header_size = 32;")?;
            Ok(())
        });

        ConnectionPool::open(config, Some(setup)).map_err(|e| Error::StartupFailed {
            reason: e.to_string(),
        })
    }

    /// Suspends access: every new operation fails fast and running
    /// statements are interrupted. Idempotent.
    pub fn suspend(&self) {
        let pool = {
            let mut state = self.state.lock();
            if state.is_suspended {
                return;
            }
            state.is_suspended = true;
            state.pool.clone()
        };
        log::info!("Database suspended");
        if let Some(pool) = pool {
            pool.interrupt();
        }
    }

    /// Lifts a suspension. The pool is reused as is. Idempotent.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.is_suspended {
            state.is_suspended = false;
            log::info!("Database resumed");
        }
    }

    /// Deletes the database files, any exported key file and the key spec.
    /// The handle ends up [`Lifecycle::Destroyed`] until reconfigured.
    pub fn reset_all_storage(&self) {
        log::warn!("Resetting all database storage");
        let pool = {
            let mut state = self.state.lock();
            state.lifecycle = Lifecycle::Destroyed;
            state.has_completed_migrations = false;
            state.pool.take()
        };
        HAS_CREATED_VALID_INSTANCE.store(false, Ordering::SeqCst);
        drop(pool);

        self.file_paths().delete_all();
        #[cfg(feature = "snapshot-export")]
        {
            let exported = self
                .config
                .database_dir()
                .join(crate::snapshot::EXPORTED_KEY_FILE_NAME);
            if let Err(e) = files::delete_if_exists(&exported) {
                log::error!("Failed to delete {}: {e}", exported.display());
            }
        }
        if let Err(e) = self.key_store.remove() {
            log::error!("Failed to remove database key spec: {e}");
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Whether the pool is open.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let state = self.state.lock();
        state.lifecycle == Lifecycle::Valid && state.pool.is_some()
    }

    /// Whether access is suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().is_suspended
    }

    /// Whether a migration run has completed since the last reset.
    #[must_use]
    pub fn has_completed_migrations(&self) -> bool {
        self.state.lock().has_completed_migrations
    }

    /// Whether any read has succeeded.
    #[must_use]
    pub fn has_successfully_read(&self) -> bool {
        self.state.lock().has_successfully_read
    }

    /// Whether any write has succeeded.
    #[must_use]
    pub fn has_successfully_written(&self) -> bool {
        self.state.lock().has_successfully_written
    }

    /// The error recorded by the last failed configure.
    #[must_use]
    pub fn startup_error(&self) -> Option<Arc<Error>> {
        self.state.lock().startup_error.clone()
    }

    /// Identity of the current pool.
    #[must_use]
    pub fn pool_id(&self) -> Option<u64> {
        self.state.lock().pool.as_ref().map(|p| p.id())
    }

    /// The configuration the handle was built with.
    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Path of the main database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.config.database_path()
    }

    /// The database file and its WAL/SHM siblings.
    #[must_use]
    pub fn file_paths(&self) -> DatabaseFiles {
        DatabaseFiles::new(self.database_path())
    }

    pub(crate) fn key_store(&self) -> &KeySpecStore {
        &self.key_store
    }

    /// The pool, or why it cannot be used.
    fn pool(&self) -> Result<Arc<ConnectionPool>> {
        let state = self.state.lock();
        if state.is_suspended {
            return Err(Error::DatabaseSuspended);
        }
        match (&state.pool, state.lifecycle) {
            (Some(pool), Lifecycle::Valid) => Ok(Arc::clone(pool)),
            _ => Err(Error::DatabaseInvalid),
        }
    }

    fn ensure_not_suspended(&self) -> Result<()> {
        if self.is_suspended() {
            Err(Error::DatabaseSuspended)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Storage")
            .field("path", &self.config.database_path())
            .field("lifecycle", &state.lifecycle)
            .field("suspended", &state.is_suspended)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{KeychainError, MemoryKeychain};
    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    fn storage(dir: &TempDir) -> (Arc<Storage>, Arc<MemoryKeychain>) {
        let keychain = Arc::new(MemoryKeychain::new());
        let storage = Storage::builder(StorageConfig::new(dir.path()))
            .keychain(keychain.clone())
            .app_context(Arc::new(ProcessContext::test_harness()))
            .build()
            .unwrap();
        (storage, keychain)
    }

    #[test]
    #[serial]
    fn test_configure_creates_encrypted_database() {
        let dir = tempdir().unwrap();
        let (storage, keychain) = storage(&dir);
        assert_eq!(storage.state(), Lifecycle::Unconfigured);

        storage.configure().unwrap();
        assert!(storage.is_valid());
        assert!(Storage::has_created_valid_instance());
        assert!(storage.database_path().exists());
        assert!(keychain.contains(
            &storage.config().keychain_service,
            &storage.config().keychain_key
        ));

        // Without the key the file is unreadable
        let raw = Connection::open(storage.database_path()).unwrap();
        assert!(raw
            .query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
            .is_err());
    }

    #[test]
    #[serial]
    fn test_configure_records_key_failure() {
        let dir = tempdir().unwrap();
        let (storage, keychain) = storage(&dir);
        keychain.fail_reads_with(KeychainError::Inaccessible("locked".into()));

        let err = storage.configure().unwrap_err();
        assert!(matches!(err, Error::StartupFailed { .. }));
        assert_eq!(storage.state(), Lifecycle::Invalid);
        assert!(!storage.is_valid());
        assert!(matches!(
            storage.startup_error().as_deref(),
            Some(Error::KeySpecInaccessible { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_suspend_resume_keeps_pool() {
        let dir = tempdir().unwrap();
        let (storage, _) = storage(&dir);
        storage.configure().unwrap();
        let id = storage.pool_id();

        storage.suspend();
        storage.suspend();
        assert!(storage.is_suspended());
        assert!(matches!(storage.pool(), Err(Error::DatabaseSuspended)));

        storage.resume();
        storage.resume();
        assert!(!storage.is_suspended());
        assert_eq!(storage.pool_id(), id);
    }

    #[test]
    #[serial]
    fn test_reset_and_reconfigure() {
        let dir = tempdir().unwrap();
        let (storage, keychain) = storage(&dir);
        storage.configure().unwrap();
        let service = storage.config().keychain_service.clone();
        let key = storage.config().keychain_key.clone();
        let old_key = keychain.get(&service, &key).unwrap();

        storage.reset_all_storage();
        assert_eq!(storage.state(), Lifecycle::Destroyed);
        assert!(!storage.is_valid());
        assert!(storage.file_paths().existing().is_empty());
        assert!(!keychain.contains(&service, &key));

        storage.reconfigure().unwrap();
        assert!(storage.is_valid());
        let new_key = keychain.get(&service, &key).unwrap();
        assert_ne!(old_key.as_slice(), new_key.as_slice());
    }

    #[test]
    #[serial]
    fn test_in_memory_skips_key_handling() {
        let dir = tempdir().unwrap();
        let keychain = Arc::new(MemoryKeychain::new());
        let storage = Storage::builder(StorageConfig::new(dir.path()))
            .keychain(keychain.clone())
            .app_context(Arc::new(ProcessContext::test_harness()))
            .in_memory()
            .build()
            .unwrap();
        storage.configure().unwrap();

        assert!(storage.is_valid());
        assert!(!storage.database_path().exists());
        assert!(!keychain.contains(
            &storage.config().keychain_service,
            &storage.config().keychain_key
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::new(dir.path());
        config.max_readers = 0;
        assert!(Storage::builder(config).build().is_err());
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(Lifecycle::Destroyed.to_string(), "destroyed");
    }
}
