//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::classify::{Diagnostic, classify};
pub use crate::error::{ErrorKind, ErrorRecord, NativeError, PgDriverError};
pub use crate::native::{Connector, NativeClient};
pub use crate::pgsql::{
    AccessMode, Connection, DriverConfig, DriverOptions, Dsn, HookPhase, IsolationLevel,
    PreparedStatement, Protocol, QueryEvent, QueryHook, ServerVersion, ServerVersionInfo,
    StatementHandle, TracingHook, TransactionOptions,
};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::translation::{
    BindNamePattern, Dialect, NativeQuery, Placeholder, PlaceholderMap, RewrittenQuery,
    apply_limit, rewrite_placeholders,
};
pub use crate::types::{Binds, RowValues, TypeHints};

#[cfg(feature = "postgres")]
pub use crate::native::{TokioPgClient, TokioPgConnector};
#[cfg(feature = "postgres")]
pub use crate::pgsql::PgConnection;
