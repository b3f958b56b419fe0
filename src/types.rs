use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::PgDriverError;
use crate::translation::{Placeholder, PlaceholderMap};

/// Values that can be stored in a database row or used as query parameters.
///
/// ```rust
/// use pgsql_driver::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view; text holding a decimal integer also converts, since
    /// results read over the simple protocol arrive as text.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowValues::Int(value) => Some(*value),
            RowValues::Text(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            RowValues::Int(1) => Some(true),
            RowValues::Int(0) => Some(false),
            RowValues::Text(value) => match value.as_str() {
                "t" | "true" => Some(true),
                "f" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// Text form of a float as the server spells it; non-finite values use the
/// `NaN` / `Infinity` / `-Infinity` keywords.
#[must_use]
pub(crate) fn float_text(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        value.to_string()
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

/// Values supplied when executing a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Binds {
    /// One value per `?` marker, in order.
    Positional(Vec<RowValues>),
    /// One value per distinct `:name`.
    Named(BTreeMap<String, RowValues>),
}

impl Binds {
    #[must_use]
    pub fn none() -> Self {
        Binds::Positional(Vec::new())
    }

    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RowValues>,
    {
        Binds::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Values in native parameter order for `placeholders`.
    ///
    /// Positional binds may also serve named placeholders, matched by the
    /// identity the name was given.
    ///
    /// # Errors
    /// `ParameterError` when a placeholder has no value.
    pub fn ordered(&self, placeholders: &PlaceholderMap) -> Result<Vec<RowValues>, PgDriverError> {
        placeholders
            .iter()
            .enumerate()
            .map(|(index, placeholder)| {
                let value = match (self, placeholder) {
                    (Binds::Named(values), Placeholder::Named(name)) => values.get(name),
                    (Binds::Positional(values), _) => values.get(index),
                    (Binds::Named(_), Placeholder::Ordinal(_)) => None,
                };
                value.cloned().ok_or_else(|| {
                    PgDriverError::ParameterError(format!("no value bound for {placeholder}"))
                })
            })
            .collect()
    }
}

/// Declared parameter types, keyed by placeholder name or 0-based position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeHints {
    pub by_name: BTreeMap<String, String>,
    pub by_position: Vec<String>,
}

impl TypeHints {
    #[must_use]
    pub fn positional<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by_name: BTreeMap::new(),
            by_position: types.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn named<I, K, S>(types: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        Self {
            by_name: types
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            by_position: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_position.is_empty()
    }

    /// Hint for one placeholder: by name first, then by position.
    #[must_use]
    pub fn hint_for(&self, placeholder: &Placeholder, position: usize) -> Option<&str> {
        let by_name = match placeholder {
            Placeholder::Named(name) => self.by_name.get(name),
            Placeholder::Ordinal(_) => None,
        };
        by_name
            .or_else(|| self.by_position.get(position))
            .map(String::as_str)
    }
}
