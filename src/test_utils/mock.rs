use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::NativeError;
use crate::native::{Connector, NativeClient};
use crate::results::ResultSet;
use crate::types::RowValues;

/// Everything the mock observed, shared by the connector and all its clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockLog {
    /// Conninfo string of every successful or failed connect attempt.
    pub connects: Vec<String>,
    /// Every statement passed to `execute`, `send_query`, or `get_result`, in order.
    pub statements: Vec<String>,
    /// `(name, sql, types)` of native prepares.
    pub prepares: Vec<(String, String, Vec<String>)>,
    /// `(name, params)` of native prepared executions.
    pub executions: Vec<(String, Vec<RowValues>)>,
    pub deallocated: Vec<String>,
    pub encodings: Vec<String>,
    pub closes: usize,
}

#[derive(Debug, Clone)]
struct Failure {
    needle: String,
    error: NativeError,
    remaining: Option<usize>,
}

#[derive(Debug)]
struct MockState {
    log: MockLog,
    failures: Vec<Failure>,
    responses: Vec<(String, ResultSet)>,
    server_version: Option<String>,
    alive: bool,
    native_prepare: bool,
    connect_error: Option<NativeError>,
    encoding_error: Option<NativeError>,
}

impl MockState {
    fn failure_for(&mut self, sql: &str) -> Option<NativeError> {
        let index = self
            .failures
            .iter()
            .position(|f| sql.contains(&f.needle))?;
        let failure = &mut self.failures[index];
        let error = failure.error.clone();
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(index);
            }
        }
        Some(error)
    }

    fn response_for(&self, sql: &str) -> ResultSet {
        if sql.trim().eq_ignore_ascii_case("SHOW SERVER_VERSION") {
            if let Some(version) = &self.server_version {
                return single_value("server_version", version);
            }
        }
        self.responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map_or_else(|| ResultSet::affected(0), |(_, result)| result.clone())
    }

    fn run(&mut self, sql: &str) -> Result<ResultSet, NativeError> {
        self.log.statements.push(sql.to_string());
        match self.failure_for(sql) {
            Some(err) => Err(err),
            None => Ok(self.response_for(sql)),
        }
    }
}

fn single_value(column: &str, value: &str) -> ResultSet {
    let mut result = ResultSet::with_capacity(1);
    result.set_column_names(Arc::new(vec![column.to_string()]));
    result.add_row_values(vec![RowValues::Text(value.to_string())]);
    result
}

/// Connector handing out [`MockClient`]s that share one script and log.
///
/// Clones share state, so keep a clone to inspect what a `Connection` did.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// A live server reporting version `16.2`, without native prepare support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                log: MockLog::default(),
                failures: Vec::new(),
                responses: Vec::new(),
                server_version: Some("16.2".to_string()),
                alive: true,
                native_prepare: false,
                connect_error: None,
                encoding_error: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn with_server_version(self, version: Option<&str>) -> Self {
        self.state().server_version = version.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_native_prepare(self, enabled: bool) -> Self {
        self.state().native_prepare = enabled;
        self
    }

    /// Every connect attempt fails with `error` until cleared with `None`.
    pub fn fail_connect(&self, error: Option<NativeError>) {
        self.state().connect_error = error;
    }

    /// Statements containing `needle` fail with `error`, every time.
    pub fn fail_on(&self, needle: &str, error: NativeError) {
        self.state().failures.push(Failure {
            needle: needle.to_string(),
            error,
            remaining: None,
        });
    }

    /// The next `times` statements containing `needle` fail with `error`.
    pub fn fail_times(&self, needle: &str, error: NativeError, times: usize) {
        if times == 0 {
            return;
        }
        self.state().failures.push(Failure {
            needle: needle.to_string(),
            error,
            remaining: Some(times),
        });
    }

    /// Statements containing `needle` return `result`.
    pub fn respond(&self, needle: &str, result: ResultSet) {
        self.state().responses.push((needle.to_string(), result));
    }

    /// Statements containing `needle` return one row with one text column.
    pub fn respond_value(&self, needle: &str, value: &str) {
        self.respond(needle, single_value("value", value));
    }

    pub fn fail_encoding(&self, error: Option<NativeError>) {
        self.state().encoding_error = error;
    }

    pub fn set_alive(&self, alive: bool) {
        self.state().alive = alive;
    }

    #[must_use]
    pub fn log(&self) -> MockLog {
        self.state().log.clone()
    }

    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state().log.statements.clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().log.connects.len()
    }
}

impl Connector for MockConnector {
    type Client = MockClient;

    fn connect(&self, conninfo: &str, _persistent: bool) -> Result<MockClient, NativeError> {
        let mut state = self.state();
        state.log.connects.push(conninfo.to_string());
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        Ok(MockClient {
            state: Arc::clone(&self.state),
            pending: None,
            prepared: HashMap::new(),
        })
    }
}

/// One scripted native handle.
#[derive(Debug)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
    pending: Option<String>,
    prepared: HashMap<String, String>,
}

impl MockClient {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeClient for MockClient {
    fn execute(&mut self, sql: &str) -> Result<ResultSet, NativeError> {
        self.state().run(sql)
    }

    fn send_query(&mut self, sql: &str) -> Result<(), NativeError> {
        if self.pending.is_some() {
            return Err(NativeError::new("another query is already in flight"));
        }
        self.pending = Some(sql.to_string());
        Ok(())
    }

    fn get_result(&mut self) -> Result<Option<ResultSet>, NativeError> {
        match self.pending.take() {
            Some(sql) => self.state().run(&sql).map(Some),
            None => Ok(None),
        }
    }

    fn supports_native_prepare(&self) -> bool {
        self.state().native_prepare
    }

    fn prepare(&mut self, name: &str, sql: &str, types: &[String]) -> Result<(), NativeError> {
        let mut state = self.state();
        if !state.native_prepare {
            return Err(NativeError::new("native prepare is not supported by this client"));
        }
        state
            .log
            .prepares
            .push((name.to_string(), sql.to_string(), types.to_vec()));
        if let Some(err) = state.failure_for(sql) {
            return Err(err);
        }
        drop(state);
        self.prepared.insert(name.to_string(), sql.to_string());
        Ok(())
    }

    fn execute_prepared(
        &mut self,
        name: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, NativeError> {
        let Some(sql) = self.prepared.get(name).cloned() else {
            return Err(NativeError::new(format!(
                "ERROR:  prepared statement \"{name}\" does not exist"
            ))
            .with_sqlstate("26000"));
        };
        let mut state = self.state();
        state
            .log
            .executions
            .push((name.to_string(), params.to_vec()));
        match state.failure_for(&sql) {
            Some(err) => Err(err),
            None => Ok(state.response_for(&sql)),
        }
    }

    fn deallocate(&mut self, name: &str) -> Result<(), NativeError> {
        self.prepared.remove(name);
        self.state().log.deallocated.push(name.to_string());
        Ok(())
    }

    fn parameter_status(&mut self, name: &str) -> Option<String> {
        if name == "server_version" {
            self.state().server_version.clone()
        } else {
            None
        }
    }

    fn set_client_encoding(&mut self, charset: &str) -> Result<(), NativeError> {
        let mut state = self.state();
        if let Some(err) = state.encoding_error.clone() {
            return Err(err);
        }
        state.log.encodings.push(charset.to_string());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state().alive
    }

    fn close(self) -> Result<(), NativeError> {
        self.state().log.closes += 1;
        Ok(())
    }
}
