use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PgDriverError;

mod limit;
mod parsers;
mod scanner;

pub use limit::{RewrittenQuery, apply_limit, emulate_manip_limit, has_limit_clause};

use parsers::digit_run;
use scanner::{Action, scan_code};

/// Default pattern accepted for `:name` placeholders.
pub const DEFAULT_BINDNAME_FORMAT: &str = r"(?:\d+)|(?:[a-zA-Z][a-zA-Z0-9_]*)";

/// Native syntax target for translated queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL: `$1` markers, `ctid` row identity.
    #[default]
    Postgres,
    /// SQLite-compatible servers: `?1` markers, `rowid` row identity.
    Sqlite,
}

impl Dialect {
    /// Native marker text for a 1-based parameter identity.
    #[must_use]
    pub fn marker(self, identity: usize) -> String {
        match self {
            Dialect::Postgres => format!("${identity}"),
            Dialect::Sqlite => format!("?{identity}"),
        }
    }

    /// Column exposing a stable per-row physical identity.
    #[must_use]
    pub fn row_identity_column(self) -> &'static str {
        match self {
            Dialect::Postgres => "ctid",
            Dialect::Sqlite => "rowid",
        }
    }

    /// Short driver name used in statement handle names.
    #[must_use]
    pub fn driver_name(self) -> &'static str {
        match self {
            Dialect::Postgres => "pgsql",
            Dialect::Sqlite => "sqlite",
        }
    }

    fn native_marker_sigil(self) -> u8 {
        match self {
            Dialect::Postgres => b'$',
            Dialect::Sqlite => b'?',
        }
    }
}

/// Which placeholder syntax a query uses. Fixed by the first marker seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderFamily {
    /// Anonymous `?` markers.
    Ordinal,
    /// `:name` markers.
    Named,
}

/// Identity bound to one native parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// 1-based position of an anonymous marker.
    Ordinal(usize),
    Named(String),
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Ordinal(n) => write!(f, "#{n}"),
            Placeholder::Named(name) => write!(f, ":{name}"),
        }
    }
}

/// Ordered placeholder identities; entry `i` is native parameter `i + 1`.
///
/// A name seen twice maps to the identity allocated on its first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    entries: Vec<Placeholder>,
    by_name: HashMap<String, usize>,
}

impl PlaceholderMap {
    fn push_ordinal(&mut self) -> usize {
        let identity = self.entries.len() + 1;
        self.entries.push(Placeholder::Ordinal(identity));
        identity
    }

    fn identity_for_name(&mut self, name: &str) -> usize {
        if let Some(identity) = self.by_name.get(name) {
            return *identity;
        }
        let identity = self.entries.len() + 1;
        self.entries.push(Placeholder::Named(name.to_string()));
        self.by_name.insert(name.to_string(), identity);
        identity
    }

    /// Native identity previously assigned to `name`.
    #[must_use]
    pub fn identity_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Placeholder bound to native parameter `identity` (1-based).
    #[must_use]
    pub fn get(&self, identity: usize) -> Option<&Placeholder> {
        identity.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Placeholder> {
        self.entries.iter()
    }

    #[must_use]
    pub fn family(&self) -> Option<PlaceholderFamily> {
        self.entries.first().map(|p| match p {
            Placeholder::Ordinal(_) => PlaceholderFamily::Ordinal,
            Placeholder::Named(_) => PlaceholderFamily::Named,
        })
    }
}

/// Compiled `:name` pattern, anchored at the character after the sigil.
#[derive(Debug, Clone)]
pub struct BindNamePattern {
    regex: Regex,
}

impl BindNamePattern {
    /// # Errors
    /// Returns `ConfigError` if `format` is not a valid regular expression.
    pub fn new(format: &str) -> Result<Self, PgDriverError> {
        let regex = Regex::new(&format!("^(?:{format})")).map_err(|e| {
            PgDriverError::ConfigError(format!("invalid bindname_format {format:?}: {e}"))
        })?;
        Ok(Self { regex })
    }

    fn match_at<'a>(&self, sql: &'a str, start: usize) -> &'a str {
        sql.get(start..)
            .and_then(|rest| self.regex.find(rest))
            .map_or("", |m| m.as_str())
    }
}

impl Default for BindNamePattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(&format!("^(?:{DEFAULT_BINDNAME_FORMAT})"))
                .expect("default bind name pattern is valid"),
        }
    }
}

/// A query rewritten into native placeholder syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeQuery {
    pub sql: String,
    pub placeholders: PlaceholderMap,
}

/// Rewrite portable `?` / `:name` placeholders into the dialect's numbered markers.
///
/// Markers already in native numbered form pass through untouched, so the
/// rewrite is idempotent on its own output. `::` casts, quoted literals,
/// quoted identifiers, comments and dollar-quoted bodies are never rewritten.
///
/// # Errors
/// `SyntaxError` when a `:` marker is not followed by a valid name, when the
/// query mixes `?` and `:name` markers, or when a quoted literal is unterminated.
pub fn rewrite_placeholders(
    sql: &str,
    dialect: Dialect,
    bind_name: &BindNamePattern,
) -> Result<NativeQuery, PgDriverError> {
    let bytes = sql.as_bytes();
    let mut map = PlaceholderMap::default();
    let mut family: Option<PlaceholderFamily> = None;

    let rewritten = scan_code(sql, |idx| match bytes[idx] {
        b'?' => {
            let digits = digit_run(bytes, idx + 1);
            if dialect == Dialect::Sqlite && digits > 0 {
                return Ok(Action::Skip(1 + digits));
            }
            if family == Some(PlaceholderFamily::Named) {
                return Err(mixed_families(idx));
            }
            family = Some(PlaceholderFamily::Ordinal);
            let identity = map.push_ordinal();
            Ok(Action::Replace {
                len: 1,
                with: dialect.marker(identity),
            })
        }
        b':' => {
            if bytes.get(idx + 1) == Some(&b':') {
                return Ok(Action::Skip(2));
            }
            let name = bind_name.match_at(sql, idx + 1);
            if family == Some(PlaceholderFamily::Ordinal) {
                return if name.is_empty() {
                    Ok(Action::Continue)
                } else {
                    Err(mixed_families(idx))
                };
            }
            if name.is_empty() {
                return Err(PgDriverError::SyntaxError(format!(
                    "named parameter name must match \"bindname_format\" option (at byte {idx})"
                )));
            }
            family = Some(PlaceholderFamily::Named);
            let identity = map.identity_for_name(name);
            Ok(Action::Replace {
                len: 1 + name.len(),
                with: dialect.marker(identity),
            })
        }
        _ => Ok(Action::Continue),
    })?;

    Ok(NativeQuery {
        sql: rewritten.into_owned(),
        placeholders: map,
    })
}

fn mixed_families(idx: usize) -> PgDriverError {
    PgDriverError::SyntaxError(format!(
        "query mixes positional and named placeholders (at byte {idx})"
    ))
}

/// Replace native numbered markers with pre-rendered SQL literals.
///
/// `literals[i]` replaces marker `i + 1`. Used when prepared statements are
/// emulated client-side.
///
/// # Errors
/// `ParameterError` when a marker has no literal, `SyntaxError` for an
/// unterminated quoted literal.
pub fn inline_params<'a>(
    sql: &'a str,
    dialect: Dialect,
    literals: &[String],
) -> Result<Cow<'a, str>, PgDriverError> {
    let bytes = sql.as_bytes();
    let sigil = dialect.native_marker_sigil();
    scan_code(sql, |idx| {
        if bytes[idx] != sigil {
            return Ok(Action::Continue);
        }
        let digits = digit_run(bytes, idx + 1);
        if digits == 0 {
            return Ok(Action::Continue);
        }
        let identity: usize = sql[idx + 1..idx + 1 + digits]
            .parse()
            .map_err(|e| PgDriverError::ParameterError(format!("bad parameter marker: {e}")))?;
        let literal = identity
            .checked_sub(1)
            .and_then(|i| literals.get(i))
            .ok_or_else(|| {
                PgDriverError::ParameterError(format!("no value bound for parameter {identity}"))
            })?;
        Ok(Action::Replace {
            len: 1 + digits,
            with: literal.clone(),
        })
    })
}
