//! Query translation and connection core for a PostgreSQL client driver.
//!
//! - [`translation`] rewrites portable `?` / `:name` placeholders into native
//!   `$n` markers and injects or emulates `LIMIT`/`OFFSET`.
//! - [`classify`] maps native diagnostics onto the portable [`ErrorKind`] taxonomy.
//! - [`pgsql::Connection`] owns one native handle and drives connect/disconnect,
//!   transactions and savepoints, prepared statements and sequences.
//! - [`native`] is the seam to the wire client; the `postgres` feature provides
//!   one on `tokio-postgres`.

pub mod classify;
pub mod error;
pub mod native;
pub mod pgsql;
pub mod prelude;
pub mod results;
pub mod translation;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ErrorKind, ErrorRecord, NativeError, PgDriverError};
pub use pgsql::{Connection, DriverConfig, DriverOptions, Dsn};
pub use results::{CustomDbRow, ResultSet};
pub use types::{Binds, RowValues, TypeHints};
