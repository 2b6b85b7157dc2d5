//! Opening individual connections.
//!
//! Every connection goes through the same sequence: open with the right
//! flags, run the setup hook (which must come first so an encryption key is
//! applied before anything touches the file), then apply the pragmas.
//! Readers are opened by the r2d2 manager built in [`reader_manager`],
//! which runs the same sequence from its init hook.

use std::path::Path;
use std::sync::Arc;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::files;

use super::config::{PoolConfig, PoolLocation};

/// Hook run on every new connection before it is used.
pub type ConnectionSetup = Arc<dyn Fn(&Connection) -> Result<()> + Send + Sync>;

/// Which role a connection plays in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Writer,
    Reader,
}

/// Opens one connection for `role`.
pub(crate) fn open(
    config: &PoolConfig,
    role: Role,
    setup: Option<&ConnectionSetup>,
) -> Result<Connection> {
    let conn = match &config.location {
        PoolLocation::Memory => Connection::open_in_memory()?,
        PoolLocation::File(path) => {
            if role == Role::Writer {
                if let Some(parent) = path.parent() {
                    files::ensure_directory_exists(parent)?;
                }
            }
            Connection::open_with_flags(path, flags(role))?
        }
    };
    prepare(&conn, config, role, setup)?;
    Ok(conn)
}

/// Builds the manager the reader pool opens connections with.
pub(crate) fn reader_manager(
    path: &Path,
    config: &PoolConfig,
    setup: Option<ConnectionSetup>,
) -> SqliteConnectionManager {
    let config = config.clone();
    SqliteConnectionManager::file(path)
        .with_flags(flags(Role::Reader))
        .with_init(move |conn| {
            prepare(conn, &config, Role::Reader, setup.as_ref()).map_err(into_sqlite)
        })
}

fn flags(role: Role) -> OpenFlags {
    match role {
        Role::Writer => {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        }
        Role::Reader => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    }
}

// The r2d2 init hook only speaks rusqlite errors
fn into_sqlite(err: Error) -> rusqlite::Error {
    match err {
        Error::Database(e) => e,
        other => rusqlite::Error::UserFunctionError(other.to_string().into()),
    }
}

fn prepare(
    conn: &Connection,
    config: &PoolConfig,
    role: Role,
    setup: Option<&ConnectionSetup>,
) -> Result<()> {
    if let Some(setup) = setup {
        setup(conn)?;
    }

    conn.busy_timeout(config.busy_timeout)?;
    if role == Role::Writer && !config.is_in_memory() {
        // journal_mode returns the resulting mode as a row
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    }
    if role == Role::Reader {
        conn.execute_batch("PRAGMA query_only = ON")?;
    }

    // Forces the first page read so a wrong key fails here, not on first use
    let _: i64 = conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))?;

    Ok(())
}
