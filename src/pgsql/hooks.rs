use crate::error::PgDriverError;

/// When a hook runs relative to the native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

/// What a hook sees.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvent<'a> {
    /// Operation issuing the call: `query`, `prepare`, `execute`, `standalone`, ...
    pub scope: &'a str,
    pub query: &'a str,
    pub is_manip: bool,
    pub phase: HookPhase,
    /// Rows returned or affected; set on `Post` only.
    pub rows: Option<usize>,
}

/// Debug hook invoked around every native call.
///
/// A `Pre` hook may return replacement query text, or an error that aborts
/// the call before anything reaches the server. The return value of `Post`
/// hooks is ignored.
pub trait QueryHook: Send {
    /// # Errors
    /// Any error aborts the pending call and is returned to the caller unchanged.
    fn on_query(&mut self, event: &QueryEvent<'_>) -> Result<Option<String>, PgDriverError>;
}

/// Forwards every hook event to `tracing` at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHook;

impl QueryHook for TracingHook {
    fn on_query(&mut self, event: &QueryEvent<'_>) -> Result<Option<String>, PgDriverError> {
        match event.phase {
            HookPhase::Pre => tracing::info!(
                scope = event.scope,
                query = event.query,
                is_manip = event.is_manip,
                "issuing query"
            ),
            HookPhase::Post => tracing::info!(
                scope = event.scope,
                query = event.query,
                is_manip = event.is_manip,
                rows = event.rows,
                "query finished"
            ),
        }
        Ok(None)
    }
}
