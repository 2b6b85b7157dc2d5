//! Connection management for the encrypted database.
//!
//! A [`ConnectionPool`] serializes writes through a single writer
//! connection and serves reads from a bounded set of read-only
//! connections. Every connection runs the same setup hook (the key
//! pragma in production) before it is handed out.
//!
//! # Examples
//!
//! ```
//! use cipherstore::database::{ConnectionPool, PoolConfig};
//!
//! let pool = ConnectionPool::open(PoolConfig::in_memory(), None).unwrap();
//! pool.write(|conn| {
//!     conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1);")?;
//!     Ok(())
//! })
//! .unwrap();
//! let count: i64 = pool
//!     .read(|conn| Ok(conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0))?))
//!     .unwrap();
//! assert_eq!(count, 1);
//! ```

mod config;
mod connection;
mod pool;
pub(crate) mod schema;

pub use config::{DatabaseFiles, PoolConfig, PoolLocation};
pub use connection::ConnectionSetup;
pub use pool::ConnectionPool;
