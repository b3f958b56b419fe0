//! The seam between the driver core and a concrete PostgreSQL client.
//!
//! Everything behind these traits is opaque to the core: it connects, runs
//! statements, reports diagnostic text, and closes. All calls block.

use crate::error::NativeError;
use crate::results::ResultSet;
use crate::types::RowValues;

#[cfg(feature = "postgres")]
mod tokio_pg;

#[cfg(feature = "postgres")]
pub use tokio_pg::{TokioPgClient, TokioPgConnector, pg_type_for_name};

/// One live native connection handle.
pub trait NativeClient {
    /// Run `sql` and wait for its result.
    ///
    /// # Errors
    /// Returns the server's diagnostic when the statement fails.
    fn execute(&mut self, sql: &str) -> Result<ResultSet, NativeError>;

    /// Dispatch `sql` without waiting for the result.
    ///
    /// # Errors
    /// Returns a diagnostic when the query could not be sent.
    fn send_query(&mut self, sql: &str) -> Result<(), NativeError>;

    /// Fetch the result of the outstanding dispatched query, `None` if there is none.
    ///
    /// # Errors
    /// Returns the server's diagnostic when the dispatched statement failed.
    fn get_result(&mut self) -> Result<Option<ResultSet>, NativeError>;

    /// Whether [`NativeClient::prepare`] creates a server statement natively.
    fn supports_native_prepare(&self) -> bool {
        false
    }

    /// Create a named server-side prepared statement with declared parameter types.
    ///
    /// # Errors
    /// Returns the server's diagnostic when the statement is rejected.
    fn prepare(&mut self, name: &str, sql: &str, types: &[String]) -> Result<(), NativeError> {
        let _ = (name, sql, types);
        Err(NativeError::new("native prepare is not supported by this client"))
    }

    /// Run a statement created by [`NativeClient::prepare`] or a textual `PREPARE`.
    ///
    /// # Errors
    /// Returns the server's diagnostic when execution fails.
    fn execute_prepared(&mut self, name: &str, params: &[RowValues])
    -> Result<ResultSet, NativeError>;

    /// Drop a named prepared statement.
    ///
    /// # Errors
    /// Returns the server's diagnostic when the statement cannot be released.
    fn deallocate(&mut self, name: &str) -> Result<(), NativeError> {
        self.execute(&format!("DEALLOCATE {name}")).map(|_| ())
    }

    /// A server parameter reported for this session, e.g. `server_version`.
    fn parameter_status(&mut self, name: &str) -> Option<String>;

    /// Switch the client encoding.
    ///
    /// # Errors
    /// Returns a diagnostic when the encoding is not accepted.
    fn set_client_encoding(&mut self, charset: &str) -> Result<(), NativeError>;

    /// Liveness probe used when a failure produced no diagnostic text.
    fn is_alive(&self) -> bool;

    /// Close the handle.
    ///
    /// # Errors
    /// Returns a diagnostic if the handle could not be closed cleanly.
    fn close(self) -> Result<(), NativeError>
    where
        Self: Sized;
}

/// Factory for native handles.
pub trait Connector {
    type Client: NativeClient;

    /// Open a connection described by a libpq-style `conninfo` string.
    ///
    /// # Errors
    /// Returns the native connect diagnostic on failure.
    fn connect(&self, conninfo: &str, persistent: bool) -> Result<Self::Client, NativeError>;
}
