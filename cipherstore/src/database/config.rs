//! Pool configuration and on-disk file layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::files;

/// Where the pool's database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolLocation {
    /// A database file (with `-wal`/`-shm` siblings in WAL mode).
    File(PathBuf),
    /// A private in-memory database. Reads share the writer connection.
    Memory,
}

/// Configuration for a [`ConnectionPool`](super::ConnectionPool).
///
/// # Examples
///
/// ```
/// use cipherstore::database::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new("/tmp/cipherstore.sqlite")
///     .with_max_readers(4)
///     .with_busy_timeout(Duration::from_secs(10));
/// assert_eq!(config.max_readers, 4);
/// assert!(!config.is_in_memory());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Database location.
    pub location: PoolLocation,
    /// Upper bound on concurrently open reader connections.
    pub max_readers: usize,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl PoolConfig {
    /// Creates a configuration for a database file with default settings:
    /// 10 readers and a 5 second busy timeout.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            location: PoolLocation::File(path.as_ref().to_path_buf()),
            max_readers: 10,
            busy_timeout: Duration::from_millis(5000),
        }
    }

    /// Creates a configuration for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: PoolLocation::Memory,
            max_readers: 1,
            busy_timeout: Duration::from_millis(5000),
        }
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the reader bound. Values below one are raised to one.
    #[must_use]
    pub fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers.max(1);
        self
    }

    /// Whether this is an in-memory database.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.location == PoolLocation::Memory
    }

    /// The database file path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            PoolLocation::File(path) => Some(path),
            PoolLocation::Memory => None,
        }
    }
}

/// The main database file and its write-ahead-log siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseFiles {
    /// Main database file.
    pub main: PathBuf,
    /// Write-ahead log (`<main>-wal`).
    pub wal: PathBuf,
    /// Shared-memory index (`<main>-shm`).
    pub shm: PathBuf,
}

impl DatabaseFiles {
    /// Derives the file set from the main database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use cipherstore::database::DatabaseFiles;
    /// use std::path::PathBuf;
    ///
    /// let files = DatabaseFiles::new("/data/db.sqlite");
    /// assert_eq!(files.wal, PathBuf::from("/data/db.sqlite-wal"));
    /// assert_eq!(files.shm, PathBuf::from("/data/db.sqlite-shm"));
    /// ```
    #[must_use]
    pub fn new(main: impl AsRef<Path>) -> Self {
        let main = main.as_ref().to_path_buf();
        Self {
            wal: sibling(&main, "-wal"),
            shm: sibling(&main, "-shm"),
            main,
        }
    }

    /// All three paths, main first.
    #[must_use]
    pub fn all(&self) -> [&Path; 3] {
        [&self.main, &self.wal, &self.shm]
    }

    /// Paths that currently exist on disk.
    #[must_use]
    pub fn existing(&self) -> Vec<&Path> {
        self.all().into_iter().filter(|p| p.exists()).collect()
    }

    /// Deletes each file independently. A failure on one file is logged
    /// and does not stop the others.
    ///
    /// Returns `true` if no deletion failed.
    pub fn delete_all(&self) -> bool {
        let mut clean = true;
        for path in self.all() {
            match files::delete_if_exists(path) {
                Ok(true) => log::debug!("Deleted {}", path.display()),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Failed to delete {}: {e}", path.display());
                    clean = false;
                }
            }
        }
        clean
    }
}

fn sibling(main: &Path, suffix: &str) -> PathBuf {
    let mut name = main.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
