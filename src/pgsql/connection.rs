use crate::classify::{Diagnostic, classify, init_patterns};
use crate::error::{ErrorRecord, NativeError, PgDriverError};
use crate::native::{Connector, NativeClient};
use crate::results::ResultSet;
use crate::translation::{BindNamePattern, apply_limit};
use crate::types::{RowValues, float_text};

use super::capture::{CaptureFlag, DiagnosticCapture};
use super::config::{DriverConfig, DriverOptions, Dsn};
use super::hooks::{HookPhase, QueryEvent, QueryHook};
use super::prepared::StatementNamer;
use super::version::ServerVersion;

/// The context a native handle was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectedContext {
    pub(crate) dsn: Dsn,
    pub(crate) database_name: String,
    pub(crate) persistent: bool,
}

/// A single logical connection to one PostgreSQL server.
///
/// Owns at most one live native handle. The handle is opened lazily on the
/// first statement (or by [`Connection::connect`]) and released by
/// [`Connection::disconnect`] or on drop. All calls block.
///
/// ```rust
/// use pgsql_driver::prelude::*;
/// use pgsql_driver::test_utils::MockConnector;
///
/// let mock = MockConnector::new();
/// let mut conn = Connection::new(mock.clone(), DriverConfig::default())?;
/// conn.begin_transaction(None)?;
/// conn.exec("DELETE FROM jobs WHERE done")?;
/// conn.commit(None)?;
/// assert!(mock.statements().contains(&"COMMIT".to_string()));
/// # Ok::<(), PgDriverError>(())
/// ```
pub struct Connection<C: Connector> {
    pub(crate) connector: C,
    pub(crate) dsn: Dsn,
    pub(crate) database_name: String,
    pub(crate) options: DriverOptions,
    bind_name: Option<(String, BindNamePattern)>,
    pub(crate) client: Option<C::Client>,
    pub(crate) connected: Option<ConnectedContext>,
    parked: Option<(ConnectedContext, C::Client)>,
    pub(crate) in_transaction: bool,
    pub(crate) cleanup_registered: bool,
    pub(crate) server_info: Option<String>,
    pub(crate) standard_conforming_strings: bool,
    capture: CaptureFlag,
    limit: u64,
    offset: u64,
    last_query: Option<String>,
    hooks: Vec<Box<dyn QueryHook>>,
    pub(crate) namer: StatementNamer,
    awaiting_result: bool,
}

impl<C: Connector> Connection<C> {
    /// Create an unconnected `Connection`.
    ///
    /// # Errors
    /// Returns `ConfigError` when `config` fails validation.
    pub fn new(connector: C, config: DriverConfig) -> Result<Self, PgDriverError> {
        config.validate()?;
        init_patterns();
        let DriverConfig { dsn, options } = config;
        Ok(Self {
            connector,
            database_name: dsn.database.clone().unwrap_or_default(),
            dsn,
            options,
            bind_name: None,
            client: None,
            connected: None,
            parked: None,
            in_transaction: false,
            cleanup_registered: false,
            server_info: None,
            standard_conforming_strings: true,
            capture: CaptureFlag::default(),
            limit: 0,
            offset: 0,
            last_query: None,
            hooks: Vec::new(),
            namer: StatementNamer::default(),
            awaiting_result: false,
        })
    }

    #[must_use]
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Options take effect on the next call; persistence changes force a
    /// reconnect on the next [`Connection::connect`].
    pub fn options_mut(&mut self) -> &mut DriverOptions {
        &mut self.options
    }

    #[must_use]
    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    /// Replace the DSN. The open handle is kept until the next `connect()`.
    pub fn set_dsn(&mut self, dsn: Dsn) {
        self.dsn = dsn;
    }

    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Select the database for the next `connect()`; returns the previous name.
    pub fn set_database(&mut self, name: impl Into<String>) -> String {
        std::mem::replace(&mut self.database_name, name.into())
    }

    pub fn add_hook(&mut self, hook: Box<dyn QueryHook>) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Text of the last statement handed to the native layer (before hooks).
    #[must_use]
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// True only while a connect attempt is in progress.
    #[must_use]
    pub fn diagnostics_captured(&self) -> bool {
        self.capture.is_active()
    }

    /// Limit and offset applied to the next `query`, `exec`, `prepare` or
    /// `standalone_query`, then reset.
    pub fn set_limit(&mut self, limit: u64, offset: u64) {
        self.limit = limit;
        self.offset = offset;
    }

    pub(crate) fn take_limit(&mut self) -> (u64, u64) {
        let pending = (self.limit, self.offset);
        self.limit = 0;
        self.offset = 0;
        pending
    }

    fn requested_context(&self) -> ConnectedContext {
        ConnectedContext {
            dsn: self.dsn.clone(),
            database_name: self.database_name.clone(),
            persistent: self.options.persistent,
        }
    }

    /// Open the native handle unless one is already open for the same DSN,
    /// database and persistence mode.
    ///
    /// Session setup runs right after the native connect. If a setup step
    /// fails, the handle stays open and the error is returned.
    ///
    /// # Errors
    /// `ConnectFailed` when the native connect fails; `Native` when a
    /// session setup statement fails.
    pub fn connect(&mut self) -> Result<(), PgDriverError> {
        let wanted = self.requested_context();
        if self.client.is_some() {
            if self.connected.as_ref() == Some(&wanted) {
                return Ok(());
            }
            self.disconnect(false)?;
        }

        if let Some((context, client)) = self.parked.take() {
            if context == wanted {
                tracing::debug!(database = %wanted.database_name, "reusing persistent connection");
                self.install(client, context);
                return Ok(());
            }
            if let Err(err) = client.close() {
                tracing::warn!(%err, "closing parked persistent connection failed");
            }
        }

        let mut client = self.open_native(
            self.dsn.username.as_deref(),
            self.dsn.password.as_deref(),
            &wanted.database_name,
            wanted.persistent,
        )?;
        let setup = configure_session(&mut client, &self.dsn);
        self.install(client, wanted);
        match setup {
            Ok(()) => {
                self.standard_conforming_strings = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "session setup failed; handle left open");
                Err(err)
            }
        }
    }

    fn install(&mut self, client: C::Client, context: ConnectedContext) {
        tracing::debug!(
            database = %context.database_name,
            persistent = context.persistent,
            "connected"
        );
        self.client = Some(client);
        self.connected = Some(context);
        self.server_info = None;
        self.awaiting_result = false;
    }

    /// Native connect with diagnostic capture scoped to the attempt.
    pub(crate) fn open_native(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        persistent: bool,
    ) -> Result<C::Client, PgDriverError> {
        let conninfo = self.dsn.conninfo(username, password, database);
        let _capture = DiagnosticCapture::enable(&self.capture);
        tracing::debug!(database, persistent, "opening native connection");
        self.connector
            .connect(&conninfo, persistent)
            .map_err(|err| self.connect_failure(err))
    }

    fn connect_failure(&self, err: NativeError) -> PgDriverError {
        let native = if self.capture.is_active() {
            err.message
        } else {
            String::new()
        };
        PgDriverError::ConnectFailed {
            message: "unable to establish a connection".to_string(),
            native,
        }
    }

    /// Close the connection. An open transaction is rolled back first on the
    /// handle it was started on.
    ///
    /// A persistent handle is parked instead of closed unless `force` is set,
    /// and is picked up again by the next matching `connect()`.
    /// Returns `false` when there was nothing to disconnect.
    ///
    /// # Errors
    /// `DisconnectFailed` when the native close reports an error.
    pub fn disconnect(&mut self, force: bool) -> Result<bool, PgDriverError> {
        if self.client.is_none() {
            return Ok(false);
        }
        if self.in_transaction {
            if let Err(err) = self.rollback(None) {
                tracing::warn!(%err, "rollback before disconnect failed");
            }
            self.in_transaction = false;
        }

        let Some(client) = self.client.take() else {
            return Ok(false);
        };
        let context = self.connected.take();
        self.server_info = None;
        self.awaiting_result = false;

        match context {
            Some(context) if context.persistent && !force => {
                tracing::debug!(database = %context.database_name, "parking persistent connection");
                self.parked = Some((context, client));
            }
            _ => {
                client
                    .close()
                    .map_err(|err| PgDriverError::DisconnectFailed(err.message))?;
                tracing::debug!("disconnected");
            }
        }
        Ok(true)
    }

    pub(crate) fn ensure_connected(&mut self) -> Result<&mut C::Client, PgDriverError> {
        if self.client.is_none() {
            self.connect()?;
        }
        self.client.as_mut().ok_or_else(|| {
            PgDriverError::ConnectionError("no native connection available".to_string())
        })
    }

    pub(crate) fn bind_name_pattern(&mut self) -> Result<BindNamePattern, PgDriverError> {
        let format = &self.options.bindname_format;
        if let Some((cached, pattern)) = &self.bind_name {
            if cached == format {
                return Ok(pattern.clone());
            }
        }
        let pattern = BindNamePattern::new(format)?;
        self.bind_name = Some((format.clone(), pattern.clone()));
        Ok(pattern)
    }

    /// Run hooks for `phase`; for `Pre` the (possibly replaced) query is returned.
    pub(crate) fn run_hooks(
        &mut self,
        scope: &str,
        query: &str,
        is_manip: bool,
        phase: HookPhase,
        rows: Option<usize>,
    ) -> Result<String, PgDriverError> {
        match phase {
            HookPhase::Pre => tracing::debug!(scope, query, is_manip, "pre"),
            HookPhase::Post => tracing::debug!(scope, query, is_manip, rows, "post"),
        }
        let mut current = query.to_string();
        for hook in &mut self.hooks {
            let event = QueryEvent {
                scope,
                query: &current,
                is_manip,
                phase,
                rows,
            };
            if let Some(replacement) = hook.on_query(&event)? {
                if phase == HookPhase::Pre {
                    current = replacement;
                }
            }
        }
        Ok(current)
    }

    /// Classify a native failure against the current handle's liveness.
    pub(crate) fn native_failure(&self, context: &str, err: &NativeError) -> PgDriverError {
        PgDriverError::Native {
            context: context.to_string(),
            record: self.classify_native(err),
        }
    }

    pub(crate) fn classify_native(&self, err: &NativeError) -> ErrorRecord {
        let alive = self.client.as_ref().is_some_and(|client| client.is_alive());
        classify(
            Diagnostic::Text {
                message: &err.message,
                sqlstate: err.sqlstate.as_deref(),
            },
            alive,
        )
    }

    /// Send one statement through hooks and the native handle.
    pub(crate) fn do_query(
        &mut self,
        query: &str,
        is_manip: bool,
        scope: &str,
    ) -> Result<ResultSet, PgDriverError> {
        self.last_query = Some(query.to_string());
        let query = self.run_hooks(scope, query, is_manip, HookPhase::Pre, None)?;
        if self.options.disable_query {
            return Ok(ResultSet::default());
        }
        if self.awaiting_result {
            return Err(PgDriverError::InvalidOperation(
                "a dispatched query has not been fetched yet".to_string(),
            ));
        }

        let multi_query = self.options.multi_query;
        let client = self.ensure_connected()?;
        let outcome = if multi_query {
            client
                .send_query(&query)
                .and_then(|()| client.get_result())
                .and_then(|result| {
                    result.ok_or_else(|| {
                        NativeError::new("Could not get the first result from a multi query")
                    })
                })
        } else {
            client.execute(&query)
        };
        let result = outcome.map_err(|err| self.native_failure("Could not execute statement", &err))?;

        self.run_hooks(
            scope,
            &query,
            is_manip,
            HookPhase::Post,
            Some(result.rows_affected),
        )?;
        Ok(result)
    }

    /// Run a read query, applying any pending limit.
    ///
    /// # Errors
    /// Classified `Native` errors from the server, or hook/connect failures.
    pub fn query(&mut self, sql: &str) -> Result<ResultSet, PgDriverError> {
        let (limit, offset) = self.take_limit();
        let rewritten = apply_limit(sql, false, limit, offset, self.options.dialect);
        self.do_query(rewritten.sql(), false, "query")
    }

    /// Run a manipulation statement and return the affected row count. A
    /// pending limit is emulated through row identity.
    ///
    /// # Errors
    /// Classified `Native` errors from the server, or hook/connect failures.
    pub fn exec(&mut self, sql: &str) -> Result<usize, PgDriverError> {
        let (limit, offset) = self.take_limit();
        let rewritten = apply_limit(sql, true, limit, offset, self.options.dialect);
        Ok(self.do_query(rewritten.sql(), true, "exec")?.rows_affected)
    }

    /// First column of the first row as text; `None` for no rows or NULL.
    ///
    /// # Errors
    /// As [`Connection::query`].
    pub fn query_one(&mut self, sql: &str) -> Result<Option<String>, PgDriverError> {
        let result = self.query(sql)?;
        Ok(result.first_value().and_then(value_text))
    }

    pub(crate) fn query_int(&mut self, sql: &str) -> Result<i64, PgDriverError> {
        let result = self.do_query(sql, false, "query")?;
        match result.first_value() {
            Some(value) => value.as_int().ok_or_else(|| {
                PgDriverError::InvalidOperation(format!(
                    "expected an integer from {sql:?}, got {value:?}"
                ))
            }),
            None => Err(PgDriverError::InvalidOperation(format!(
                "{sql:?} returned no rows"
            ))),
        }
    }

    /// Dispatch `sql` without waiting for its result.
    ///
    /// # Errors
    /// `InvalidOperation` if an earlier dispatch has not been fetched yet.
    pub fn send_query(&mut self, sql: &str) -> Result<(), PgDriverError> {
        if self.awaiting_result {
            return Err(PgDriverError::InvalidOperation(
                "only one dispatched query may be outstanding".to_string(),
            ));
        }
        self.last_query = Some(sql.to_string());
        let query = self.run_hooks("send", sql, false, HookPhase::Pre, None)?;
        if self.options.disable_query {
            return Ok(());
        }
        let client = self.ensure_connected()?;
        let sent = client.send_query(&query);
        sent.map_err(|err| self.native_failure("Could not execute statement", &err))?;
        self.awaiting_result = true;
        Ok(())
    }

    /// Result of the outstanding dispatched query; `None` when nothing is outstanding.
    ///
    /// # Errors
    /// The classified failure of the dispatched statement.
    pub fn fetch_result(&mut self) -> Result<Option<ResultSet>, PgDriverError> {
        if !self.awaiting_result {
            return Ok(None);
        }
        self.awaiting_result = false;
        let query = self.last_query.clone().unwrap_or_default();
        let client = self.ensure_connected()?;
        let fetched = client.get_result();
        let result = fetched.map_err(|err| self.native_failure("Could not get the result", &err))?;
        if let Some(result) = &result {
            self.run_hooks("send", &query, false, HookPhase::Post, Some(result.rows_affected))?;
        }
        Ok(result)
    }

    /// Switch the client character set.
    ///
    /// # Errors
    /// `Native` when the encoding is rejected.
    pub fn set_charset(&mut self, charset: &str) -> Result<(), PgDriverError> {
        let client = self.ensure_connected()?;
        let outcome = client.set_client_encoding(charset);
        outcome.map_err(|err| {
            self.native_failure(&format!("Unable to set client charset: {charset}"), &err)
        })
    }

    /// Cached server version, read with `SHOW SERVER_VERSION` on first use.
    ///
    /// # Errors
    /// Classified `Native` errors, or `ConnectionError` when the server reports nothing.
    pub fn server_version(&mut self, native: bool) -> Result<super::ServerVersionInfo, PgDriverError> {
        let info = match &self.server_info {
            Some(info) => info.clone(),
            None => {
                let result = self.do_query("SHOW SERVER_VERSION", false, "server_version")?;
                let info = result.first_value().and_then(value_text).ok_or_else(|| {
                    PgDriverError::ConnectionError("Unable to retrieve server version".to_string())
                })?;
                self.server_info = Some(info.clone());
                info
            }
        };
        Ok(if native {
            super::ServerVersionInfo::Native(info)
        } else {
            super::ServerVersionInfo::Structured(ServerVersion::parse(&info))
        })
    }

    /// Run one statement on a throw-away connection, using the DBA
    /// credentials when configured. The pending limit applies.
    ///
    /// # Errors
    /// `ConnectFailed`, session setup failures, or classified statement failures.
    pub fn standalone_query(&mut self, sql: &str, is_manip: bool) -> Result<ResultSet, PgDriverError> {
        let username = self
            .options
            .dba_username
            .clone()
            .or_else(|| self.dsn.username.clone());
        let password = self
            .options
            .dba_password
            .clone()
            .or_else(|| self.dsn.password.clone());
        let mut client = self.open_native(
            username.as_deref(),
            password.as_deref(),
            &self.database_name,
            self.options.persistent,
        )?;
        if let Err(err) = configure_session(&mut client, &self.dsn) {
            close_quietly(client);
            return Err(err);
        }

        let (limit, offset) = self.take_limit();
        let rewritten = apply_limit(sql, is_manip, limit, offset, self.options.dialect);
        self.last_query = Some(rewritten.sql().to_string());
        let query = match self.run_hooks("standalone", rewritten.sql(), is_manip, HookPhase::Pre, None) {
            Ok(query) => query,
            Err(err) => {
                close_quietly(client);
                return Err(err);
            }
        };
        if self.options.disable_query {
            close_quietly(client);
            return Ok(ResultSet::default());
        }

        let outcome = client.execute(&query);
        let alive = client.is_alive();
        close_quietly(client);
        let result = outcome.map_err(|err| PgDriverError::Native {
            context: "Could not execute statement".to_string(),
            record: classify(
                Diagnostic::Text {
                    message: &err.message,
                    sqlstate: err.sqlstate.as_deref(),
                },
                alive,
            ),
        })?;
        self.run_hooks("standalone", &query, is_manip, HookPhase::Post, Some(result.rows_affected))?;
        Ok(result)
    }

    /// Whether a connection to database `name` can be opened with the
    /// current credentials.
    pub fn database_exists(&mut self, name: &str) -> bool {
        match self.open_native(
            self.dsn.username.as_deref(),
            self.dsn.password.as_deref(),
            name,
            self.options.persistent,
        ) {
            Ok(client) => {
                close_quietly(client);
                true
            }
            Err(err) => {
                tracing::debug!(database = name, %err, "database probe failed");
                false
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database_name", &self.database_name)
            .field("connected", &self.client.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for Connection<C> {
    fn drop(&mut self) {
        if self.in_transaction && self.cleanup_registered {
            if let Err(err) = self.rollback(None) {
                tracing::warn!(%err, "rollback of open transaction on drop failed");
            }
        }
        if let Some(client) = self.client.take() {
            close_quietly(client);
        }
        if let Some((_, client)) = self.parked.take() {
            close_quietly(client);
        }
    }
}

fn close_quietly<T: NativeClient>(client: T) {
    if let Err(err) = client.close() {
        tracing::warn!(%err, "closing native connection failed");
    }
}

/// Session settings applied after every native connect. Afterwards the server
/// treats backslashes in literals as escapes: servers before 8.2 always do, and
/// newer ones have `standard_conforming_strings` switched off.
fn configure_session<T: NativeClient>(client: &mut T, dsn: &Dsn) -> Result<(), PgDriverError> {
    let setup_error = |client: &T, context: &str, err: &NativeError| PgDriverError::Native {
        context: context.to_string(),
        record: classify(
            Diagnostic::Text {
                message: &err.message,
                sqlstate: err.sqlstate.as_deref(),
            },
            client.is_alive(),
        ),
    };

    if !dsn.disable_iso_date {
        if let Err(err) = client.execute("SET SESSION DATESTYLE = 'ISO'") {
            return Err(setup_error(&*client, "Unable to set date style to iso", &err));
        }
    }

    if let Some(charset) = dsn.charset.as_deref().filter(|c| !c.is_empty()) {
        if let Err(err) = client.set_client_encoding(charset) {
            return Err(setup_error(
                &*client,
                &format!("Unable to set client charset: {charset}"),
                &err,
            ));
        }
    }

    let version = client.parameter_status("server_version").ok_or_else(|| {
        PgDriverError::ConnectionError("Unable to retrieve server version".to_string())
    })?;
    if !ServerVersion::parse(&version).at_least(8, 2) {
        return Ok(());
    }

    if let Err(err) = client.execute("SET SESSION STANDARD_CONFORMING_STRINGS = OFF") {
        return Err(setup_error(
            &*client,
            "Unable to set standard_conforming_strings to off",
            &err,
        ));
    }
    if let Err(err) = client.execute("SET SESSION ESCAPE_STRING_WARNING = OFF") {
        return Err(setup_error(
            &*client,
            "Unable to set escape_string_warning to off",
            &err,
        ));
    }
    Ok(())
}

fn value_text(value: &RowValues) -> Option<String> {
    match value {
        RowValues::Null => None,
        RowValues::Text(text) => Some(text.clone()),
        RowValues::Int(i) => Some(i.to_string()),
        RowValues::Float(f) => Some(float_text(*f)),
        RowValues::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
        RowValues::Timestamp(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        RowValues::JSON(json) => Some(json.to_string()),
        RowValues::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}
