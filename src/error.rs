use std::fmt;

use thiserror::Error;

/// Portable error taxonomy shared by every driver operation.
///
/// Each kind carries a stable negative code so errors that were already
/// classified can be handed back to the classifier without changing meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No rule matched the native diagnostic.
    Unclassified,
    SyntaxError,
    ConstraintViolation,
    NotFound,
    AlreadyExists,
    Unsupported,
    InvalidOperation,
    InvalidNumericValue,
    DivideByZero,
    NoSuchTable,
    NoSuchField,
    ValueCountMismatch,
    ConnectFailed,
    AccessViolation,
    NotNullViolation,
    DisconnectFailed,
    ValueTooLong,
}

impl ErrorKind {
    const ALL: [ErrorKind; 17] = [
        ErrorKind::Unclassified,
        ErrorKind::SyntaxError,
        ErrorKind::ConstraintViolation,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::Unsupported,
        ErrorKind::InvalidOperation,
        ErrorKind::InvalidNumericValue,
        ErrorKind::DivideByZero,
        ErrorKind::NoSuchTable,
        ErrorKind::NoSuchField,
        ErrorKind::ValueCountMismatch,
        ErrorKind::ConnectFailed,
        ErrorKind::AccessViolation,
        ErrorKind::NotNullViolation,
        ErrorKind::DisconnectFailed,
        ErrorKind::ValueTooLong,
    ];

    /// Stable negative code for this kind.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Unclassified => -1,
            ErrorKind::SyntaxError => -2,
            ErrorKind::ConstraintViolation => -3,
            ErrorKind::NotFound => -4,
            ErrorKind::AlreadyExists => -5,
            ErrorKind::Unsupported => -6,
            ErrorKind::InvalidOperation => -8,
            ErrorKind::InvalidNumericValue => -11,
            ErrorKind::DivideByZero => -13,
            ErrorKind::NoSuchTable => -18,
            ErrorKind::NoSuchField => -19,
            ErrorKind::ValueCountMismatch => -22,
            ErrorKind::ConnectFailed => -24,
            ErrorKind::AccessViolation => -27,
            ErrorKind::NotNullViolation => -29,
            ErrorKind::DisconnectFailed => -37,
            ErrorKind::ValueTooLong => -38,
        }
    }

    /// Reverse of [`ErrorKind::code`]. Unknown codes yield `None`.
    #[must_use]
    pub fn from_code(code: i32) -> Option<ErrorKind> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// True for the missing-object family (`NotFound`, `NoSuchTable`, `NoSuchField`).
    #[must_use]
    pub fn is_not_found(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound | ErrorKind::NoSuchTable | ErrorKind::NoSuchField
        )
    }

    /// True for generic and not-null constraint violations.
    #[must_use]
    pub fn is_constraint_violation(self) -> bool {
        matches!(
            self,
            ErrorKind::ConstraintViolation | ErrorKind::NotNullViolation
        )
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Unclassified => "unknown error",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::ConstraintViolation => "constraint violation",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Unsupported => "not supported",
            ErrorKind::InvalidOperation => "invalid",
            ErrorKind::InvalidNumericValue => "invalid number",
            ErrorKind::DivideByZero => "division by zero",
            ErrorKind::NoSuchTable => "no such table",
            ErrorKind::NoSuchField => "no such field",
            ErrorKind::ValueCountMismatch => "value count on row",
            ErrorKind::ConnectFailed => "connect failed",
            ErrorKind::AccessViolation => "insufficient permissions",
            ErrorKind::NotNullViolation => "null value violates not-null constraint",
            ErrorKind::DisconnectFailed => "disconnect failed",
            ErrorKind::ValueTooLong => "value too long",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A classified native failure: portable kind, optional sub-code (the server
/// SQLSTATE when known) and the raw diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub sub_code: Option<String>,
    pub native: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(kind: ErrorKind, sub_code: Option<String>, native: impl Into<String>) -> Self {
        Self {
            kind,
            sub_code,
            native: native.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.sub_code, self.native.is_empty()) {
            (Some(code), false) => write!(f, "{} [{code}]: {}", self.kind, self.native),
            (None, false) => write!(f, "{}: {}", self.kind, self.native),
            (Some(code), true) => write!(f, "{} [{code}]", self.kind),
            (None, true) => write!(f, "{}", self.kind),
        }
    }
}

/// Failure reported by the native client seam before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
    pub sqlstate: Option<String>,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
        }
    }

    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum PgDriverError {
    /// A native call failed; `record` holds the classified diagnostic.
    #[error("{context}: {record}")]
    Native {
        context: String,
        record: ErrorRecord,
    },

    #[error("Unable to create prepared statement handle {statement}: {record}")]
    PrepareFailed {
        statement: String,
        record: ErrorRecord,
    },

    #[error("Connect failed: {message} ({native})")]
    ConnectFailed { message: String, native: String },

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PgDriverError {
    /// Portable kind of this error, local or native.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PgDriverError::Native { record, .. } | PgDriverError::PrepareFailed { record, .. } => {
                record.kind
            }
            PgDriverError::ConnectFailed { .. } | PgDriverError::ConnectionError(_) => {
                ErrorKind::ConnectFailed
            }
            PgDriverError::DisconnectFailed(_) => ErrorKind::DisconnectFailed,
            PgDriverError::InvalidOperation(_) | PgDriverError::ParameterError(_) => {
                ErrorKind::InvalidOperation
            }
            PgDriverError::Unsupported(_) => ErrorKind::Unsupported,
            PgDriverError::SyntaxError(_) => ErrorKind::SyntaxError,
            PgDriverError::ConfigError(_) | PgDriverError::Io(_) | PgDriverError::Json(_) => {
                ErrorKind::Unclassified
            }
        }
    }

    /// The classified native record, when this error came from the server.
    #[must_use]
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            PgDriverError::Native { record, .. } | PgDriverError::PrepareFailed { record, .. } => {
                Some(record)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_for_every_kind() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(-9999), None);
    }

    #[test]
    fn kind_of_local_errors() {
        assert_eq!(
            PgDriverError::InvalidOperation("x".into()).kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            PgDriverError::Unsupported("x".into()).kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn record_display_includes_sqlstate() {
        let record = ErrorRecord::new(
            ErrorKind::NoSuchTable,
            Some("42P01".into()),
            "relation \"foo\" does not exist",
        );
        assert_eq!(
            record.to_string(),
            "no such table [42P01]: relation \"foo\" does not exist"
        );
    }
}
