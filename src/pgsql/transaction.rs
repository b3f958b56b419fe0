use std::fmt;
use std::str::FromStr;

use crate::error::PgDriverError;
use crate::native::Connector;

use super::Connection;

/// Transaction isolation levels accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = PgDriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ]
        .into_iter()
        .find(|level| level.as_sql().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| {
            PgDriverError::Unsupported(format!("isolation level is not supported: {s}"))
        })
    }
}

/// `READ WRITE` or `READ ONLY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Extra session transaction characteristics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub access_mode: Option<AccessMode>,
}

impl<C: Connector> Connection<C> {
    /// Start a transaction, or set `savepoint` inside the open one.
    ///
    /// Starting a transaction while one is open is a no-op.
    ///
    /// # Errors
    /// `InvalidOperation` for a savepoint outside a transaction; classified
    /// `Native` errors from the server.
    pub fn begin_transaction(&mut self, savepoint: Option<&str>) -> Result<(), PgDriverError> {
        if let Some(savepoint) = savepoint {
            if !self.in_transaction {
                return Err(PgDriverError::InvalidOperation(
                    "savepoint cannot be set when changes are auto committed".to_string(),
                ));
            }
            self.do_query(&format!("SAVEPOINT {savepoint}"), true, "begin_transaction")?;
            tracing::debug!(savepoint, "savepoint set");
            return Ok(());
        }
        if self.in_transaction {
            return Ok(());
        }
        if !self.cleanup_registered && self.options.persistent {
            // a persistent handle outlives us; roll back on drop
            self.cleanup_registered = true;
        }
        self.do_query("BEGIN", true, "begin_transaction")?;
        self.in_transaction = true;
        tracing::debug!("transaction started");
        Ok(())
    }

    /// Commit the open transaction, or release `savepoint`.
    ///
    /// # Errors
    /// `InvalidOperation` outside a transaction; classified `Native` errors.
    pub fn commit(&mut self, savepoint: Option<&str>) -> Result<(), PgDriverError> {
        if !self.in_transaction {
            return Err(PgDriverError::InvalidOperation(
                "commit/release savepoint cannot be done changes are auto committed".to_string(),
            ));
        }
        if let Some(savepoint) = savepoint {
            self.do_query(&format!("RELEASE SAVEPOINT {savepoint}"), true, "commit")?;
            return Ok(());
        }
        self.do_query("COMMIT", true, "commit")?;
        self.in_transaction = false;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Roll back the open transaction, or back to `savepoint`.
    ///
    /// # Errors
    /// `InvalidOperation` outside a transaction; classified `Native` errors.
    pub fn rollback(&mut self, savepoint: Option<&str>) -> Result<(), PgDriverError> {
        if !self.in_transaction {
            return Err(PgDriverError::InvalidOperation(
                "rollback cannot be done changes are auto committed".to_string(),
            ));
        }
        if let Some(savepoint) = savepoint {
            self.do_query(&format!("ROLLBACK TO SAVEPOINT {savepoint}"), true, "rollback")?;
            return Ok(());
        }
        self.do_query("ROLLBACK", true, "rollback")?;
        self.in_transaction = false;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    /// Set the session's default isolation level (and optional access mode).
    ///
    /// `level` is one of `READ UNCOMMITTED`, `READ COMMITTED`,
    /// `REPEATABLE READ` or `SERIALIZABLE`.
    ///
    /// # Errors
    /// `Unsupported` for any other level, before anything is sent.
    pub fn set_transaction_isolation(
        &mut self,
        level: &str,
        options: &TransactionOptions,
    ) -> Result<(), PgDriverError> {
        let level: IsolationLevel = level.parse()?;
        let mut query = format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        );
        if let Some(mode) = options.access_mode {
            query.push_str(", ");
            query.push_str(mode.as_sql());
        }
        self.do_query(&query, true, "set_transaction_isolation")?;
        Ok(())
    }
}
