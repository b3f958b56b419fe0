use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::PgDriverError;
use crate::native::{Connector, NativeClient};
use crate::results::ResultSet;
use crate::translation::{Dialect, PlaceholderMap, apply_limit, inline_params, rewrite_placeholders};
use crate::types::{Binds, TypeHints};

use super::Connection;
use super::hooks::HookPhase;

/// Generates prepared statement handle names for one connection.
#[derive(Debug, Default)]
pub struct StatementNamer {
    counter: u64,
}

impl StatementNamer {
    /// Next handle name from `format` (`{driver}` and `{id}` substituted),
    /// lowercased and cut to `max_len` characters.
    pub fn next_name(&mut self, format: &str, driver: &str, max_len: usize) -> String {
        self.counter += 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        #[allow(clippy::cast_possible_truncation)]
        let salt = rand::random::<u64>() ^ (nanos as u64);
        let id = format!("{}{salt:016x}", self.counter);
        format
            .replace("{driver}", driver)
            .replace("{id}", &id)
            .to_lowercase()
            .chars()
            .take(max_len)
            .collect()
    }
}

/// Server type for a portable type hint.
#[must_use]
pub fn map_prepare_datatype(hint: &str) -> String {
    match hint {
        "integer" => "int",
        "boolean" => "bool",
        "decimal" | "float" => "numeric",
        "clob" => "text",
        "blob" => "bytea",
        other => other,
    }
    .to_string()
}

/// How a prepared statement exists on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementHandle {
    /// Created by the native client's prepare call.
    Native(String),
    /// Created with a textual `PREPARE name (...) AS ...`.
    Textual(String),
    /// Nothing on the server; literals are inlined at execution.
    Emulated,
}

impl StatementHandle {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            StatementHandle::Native(name) | StatementHandle::Textual(name) => Some(name),
            StatementHandle::Emulated => None,
        }
    }
}

/// A statement ready for repeated execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    handle: StatementHandle,
    placeholders: PlaceholderMap,
    param_types: Vec<String>,
    result_types: Vec<String>,
    query: String,
    is_manip: bool,
    limit: u64,
    offset: u64,
    dialect: Dialect,
}

impl PreparedStatement {
    #[must_use]
    pub fn handle(&self) -> &StatementHandle {
        &self.handle
    }

    #[must_use]
    pub fn placeholders(&self) -> &PlaceholderMap {
        &self.placeholders
    }

    /// Server types declared for each parameter, in identity order.
    #[must_use]
    pub fn param_types(&self) -> &[String] {
        &self.param_types
    }

    #[must_use]
    pub fn result_types(&self) -> &[String] {
        &self.result_types
    }

    /// Native query text, limit already applied.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn is_manip(&self) -> bool {
        self.is_manip
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<C: Connector> Connection<C> {
    /// Prepare `query` for repeated execution.
    ///
    /// The pending limit is consumed and applied; placeholders are rewritten to
    /// native markers. Parameter types come from `param_types` (by name, then
    /// by position) and default to `text`.
    ///
    /// # Errors
    /// `SyntaxError` for malformed placeholders, `PrepareFailed` when the server
    /// rejects the statement.
    pub fn prepare(
        &mut self,
        query: &str,
        param_types: &TypeHints,
        result_types: &[String],
        is_manip: bool,
    ) -> Result<PreparedStatement, PgDriverError> {
        let (limit, offset) = self.take_limit();
        let query = self.run_hooks("prepare", query, is_manip, HookPhase::Pre, None)?;
        let dialect = self.options.dialect;
        let limited = apply_limit(&query, is_manip, limit, offset, dialect);
        let bind_name = self.bind_name_pattern()?;
        let native = rewrite_placeholders(limited.sql(), dialect, &bind_name)?;

        let types: Vec<String> = native
            .placeholders
            .iter()
            .enumerate()
            .map(|(position, placeholder)| {
                param_types
                    .hint_for(placeholder, position)
                    .map_or_else(|| "text".to_string(), map_prepare_datatype)
            })
            .collect();

        let handle = if self.options.emulate_prepared {
            StatementHandle::Emulated
        } else {
            self.create_server_statement(&native.sql, &types)?
        };

        let statement = PreparedStatement {
            handle,
            placeholders: native.placeholders,
            param_types: types,
            result_types: result_types.to_vec(),
            query: native.sql,
            is_manip,
            limit,
            offset,
            dialect,
        };
        self.run_hooks("prepare", &statement.query, is_manip, HookPhase::Post, None)?;
        Ok(statement)
    }

    fn create_server_statement(
        &mut self,
        sql: &str,
        types: &[String],
    ) -> Result<StatementHandle, PgDriverError> {
        let name = self.namer.next_name(
            &self.options.statement_format,
            self.options.dialect.driver_name(),
            self.options.max_identifiers_length,
        );
        let client = self.ensure_connected()?;

        if client.supports_native_prepare() {
            let prepared = client.prepare(&name, sql, types);
            return match prepared {
                Ok(()) => {
                    tracing::debug!(statement = %name, "prepared natively");
                    Ok(StatementHandle::Native(name))
                }
                Err(err) => Err(PgDriverError::PrepareFailed {
                    record: self.classify_native(&err),
                    statement: name,
                }),
            };
        }

        let types_clause = if types.is_empty() {
            String::new()
        } else {
            format!(" ({})", types.join(", "))
        };
        let statement = format!("PREPARE {name}{types_clause} AS {sql}");
        match self.do_query(&statement, true, "prepare") {
            Ok(_) => Ok(StatementHandle::Textual(name)),
            Err(PgDriverError::Native { record, .. }) => Err(PgDriverError::PrepareFailed {
                statement: name,
                record,
            }),
            Err(err) => Err(err),
        }
    }

    /// Execute `statement` with `binds` in placeholder order.
    ///
    /// # Errors
    /// `ParameterError` when a placeholder has no value; classified `Native`
    /// errors from the server.
    pub fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        binds: &Binds,
    ) -> Result<ResultSet, PgDriverError> {
        let values = binds.ordered(&statement.placeholders)?;
        match &statement.handle {
            StatementHandle::Emulated => {
                let literals: Vec<String> = values.iter().map(|v| self.quote(v)).collect();
                let sql = inline_params(&statement.query, statement.dialect, &literals)?;
                self.do_query(&sql, statement.is_manip, "execute")
            }
            StatementHandle::Textual(name) => {
                let sql = if values.is_empty() {
                    format!("EXECUTE {name}")
                } else {
                    let literals: Vec<String> = values.iter().map(|v| self.quote(v)).collect();
                    format!("EXECUTE {name} ({})", literals.join(", "))
                };
                self.do_query(&sql, statement.is_manip, "execute")
            }
            StatementHandle::Native(name) => {
                let query =
                    self.run_hooks("execute", &statement.query, statement.is_manip, HookPhase::Pre, None)?;
                if self.options.disable_query {
                    return Ok(ResultSet::default());
                }
                let client = self.ensure_connected()?;
                let outcome = client.execute_prepared(name, &values);
                let result =
                    outcome.map_err(|err| self.native_failure("Could not execute statement", &err))?;
                self.run_hooks(
                    "execute",
                    &query,
                    statement.is_manip,
                    HookPhase::Post,
                    Some(result.rows_affected),
                )?;
                Ok(result)
            }
        }
    }

    /// Release the server-side statement.
    ///
    /// # Errors
    /// Classified `Native` errors from `DEALLOCATE`.
    pub fn free_prepared(&mut self, statement: PreparedStatement) -> Result<(), PgDriverError> {
        match statement.handle {
            StatementHandle::Emulated => Ok(()),
            StatementHandle::Textual(name) => {
                self.do_query(&format!("DEALLOCATE {name}"), true, "free")?;
                Ok(())
            }
            StatementHandle::Native(name) => {
                let client = self.ensure_connected()?;
                let outcome = client.deallocate(&name);
                outcome.map_err(|err| {
                    self.native_failure(&format!("Could not free statement {name}"), &err)
                })
            }
        }
    }
}
