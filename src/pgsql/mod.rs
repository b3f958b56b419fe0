//! PostgreSQL connection state machine: connect/disconnect, transactions and
//! savepoints, prepared statements, quoting, sequences and server version.

mod capture;
mod config;
mod connection;
mod hooks;
mod prepared;
mod quote;
mod sequence;
mod transaction;
mod version;

pub use config::{DriverConfig, DriverOptions, Dsn, Protocol};
pub use connection::Connection;
pub use hooks::{HookPhase, QueryEvent, QueryHook, TracingHook};
pub use prepared::{PreparedStatement, StatementHandle, StatementNamer, map_prepare_datatype};
pub use quote::{escape_literal, escape_pattern, quote_identifier_always};
pub use transaction::{AccessMode, IsolationLevel, TransactionOptions};
pub use version::{ServerVersion, ServerVersionInfo};

#[cfg(feature = "postgres")]
use crate::native::TokioPgConnector;

/// A connection backed by the `tokio-postgres` client.
#[cfg(feature = "postgres")]
pub type PgConnection = Connection<TokioPgConnector>;

#[cfg(feature = "postgres")]
impl Connection<TokioPgConnector> {
    /// Create an unconnected connection using the `tokio-postgres` client.
    ///
    /// # Errors
    /// Returns `ConfigError` when `config` fails validation.
    pub fn postgres(config: DriverConfig) -> Result<Self, crate::error::PgDriverError> {
        Connection::new(TokioPgConnector, config)
    }
}
