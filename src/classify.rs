//! Maps native PostgreSQL diagnostics onto the portable [`ErrorKind`] taxonomy.
//!
//! Rules are evaluated in order and the first match wins, so more specific
//! patterns (missing column before missing relation, not-null before the
//! generic constraint rule) must stay ahead of the general ones.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ErrorKind, ErrorRecord};

/// Message used when the server gave no diagnostic and the link is gone.
pub const CONNECTION_LOST: &str = "Database connection has been lost.";

/// Input handed to [`classify`].
#[derive(Debug, Clone, Copy)]
pub enum Diagnostic<'a> {
    /// A portable code produced earlier. Negative codes pass through unchanged;
    /// one with no matching kind is kept as the record's sub-code.
    Code(i32),
    /// Raw diagnostic text from the native layer, with the SQLSTATE if known.
    Text {
        message: &'a str,
        sqlstate: Option<&'a str>,
    },
}

impl<'a> Diagnostic<'a> {
    #[must_use]
    pub fn text(message: &'a str) -> Self {
        Diagnostic::Text {
            message,
            sqlstate: None,
        }
    }
}

lazy_static! {
    static ref ERROR_PATTERNS: Vec<(Regex, ErrorKind)> = build_patterns();
}

fn build_patterns() -> Vec<(Regex, ErrorKind)> {
    let table: &[(&str, ErrorKind)] = &[
        (
            r"(?i)column .* (of relation .*)?does not exist",
            ErrorKind::NoSuchField,
        ),
        (
            r"(?i)(relation|sequence|table).*does not exist|class .* not found",
            ErrorKind::NoSuchTable,
        ),
        (r"database .* does not exist", ErrorKind::NotFound),
        (r"constraint .* does not exist", ErrorKind::NotFound),
        (r"index .* does not exist", ErrorKind::NotFound),
        (r"(?i)database .* already exists", ErrorKind::AlreadyExists),
        (r"(?i)relation .* already exists", ErrorKind::AlreadyExists),
        (r"(?i)(divide|division) by zero\s*$", ErrorKind::DivideByZero),
        (
            r"(?i)pg_atoi: error in .*: can't parse ",
            ErrorKind::InvalidNumericValue,
        ),
        (
            r"(?i)invalid input syntax for( type)? (integer|numeric)",
            ErrorKind::InvalidNumericValue,
        ),
        (
            r"(?i)value .* is out of range for type \w*int",
            ErrorKind::InvalidNumericValue,
        ),
        (r"(?i)integer out of range", ErrorKind::InvalidNumericValue),
        (r"(?i)value too long for type character", ErrorKind::ValueTooLong),
        (
            r"(?i)attribute .* not found|relation .* does not have attribute",
            ErrorKind::NoSuchField,
        ),
        (
            r"(?i)column .* specified in USING clause does not exist in (left|right) table",
            ErrorKind::NoSuchField,
        ),
        (r"(?i)parser: parse error at or near", ErrorKind::SyntaxError),
        (r"syntax error at", ErrorKind::SyntaxError),
        (r"(?i)column reference .* is ambiguous", ErrorKind::SyntaxError),
        (r"permission denied", ErrorKind::AccessViolation),
        (r"violates not-null constraint", ErrorKind::NotNullViolation),
        (r"violates [\w ]+ constraint", ErrorKind::ConstraintViolation),
        (
            r"referential integrity violation",
            ErrorKind::ConstraintViolation,
        ),
        (
            r"(?i)more expressions than target columns",
            ErrorKind::ValueCountMismatch,
        ),
    ];

    table
        .iter()
        .filter_map(|(pattern, kind)| match Regex::new(pattern) {
            Ok(re) => Some((re, *kind)),
            Err(err) => {
                tracing::error!(pattern, %err, "invalid error classification pattern");
                None
            }
        })
        .collect()
}

/// Forces the pattern table to load. Connections call this once on creation so
/// the first failure does not pay the compile cost.
pub fn init_patterns() {
    lazy_static::initialize(&ERROR_PATTERNS);
}

/// Kind of the first rule matching `message`, if any.
#[must_use]
pub fn match_message(message: &str) -> Option<ErrorKind> {
    ERROR_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
}

/// Classify a diagnostic into an [`ErrorRecord`].
///
/// `connection_alive` is the result of the liveness probe; it only matters when
/// no diagnostic text was obtainable.
#[must_use]
pub fn classify(diagnostic: Diagnostic<'_>, connection_alive: bool) -> ErrorRecord {
    let (message, sqlstate) = match diagnostic {
        Diagnostic::Code(code) if code < 0 => {
            return match ErrorKind::from_code(code) {
                Some(kind) => ErrorRecord::new(kind, None, String::new()),
                None => ErrorRecord::new(ErrorKind::Unclassified, Some(code.to_string()), ""),
            };
        }
        Diagnostic::Code(_) => ("", None),
        Diagnostic::Text { message, sqlstate } => (message, sqlstate),
    };

    if message.trim().is_empty() && !connection_alive {
        return ErrorRecord::new(
            ErrorKind::ConnectFailed,
            sqlstate.map(str::to_string),
            CONNECTION_LOST,
        );
    }

    let kind = match_message(message).unwrap_or(ErrorKind::Unclassified);
    ErrorRecord::new(kind, sqlstate.map(str::to_string), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(message: &str) -> ErrorKind {
        classify(Diagnostic::text(message), true).kind
    }

    #[test]
    fn missing_relation_is_no_such_table() {
        assert_eq!(
            kind_of("ERROR:  relation \"foo\" does not exist"),
            ErrorKind::NoSuchTable
        );
        assert_eq!(
            kind_of("ERROR:  sequence \"users_seq\" does not exist"),
            ErrorKind::NoSuchTable
        );
    }

    #[test]
    fn unknown_negative_code_is_kept_as_sub_code() {
        let record = classify(Diagnostic::Code(-9999), true);
        assert_eq!(record.kind, ErrorKind::Unclassified);
        assert_eq!(record.sub_code.as_deref(), Some("-9999"));
        assert_eq!(record.to_string(), format!("{} [-9999]", ErrorKind::Unclassified));

        let known = classify(Diagnostic::Code(ErrorKind::DivideByZero.code()), true);
        assert_eq!(known.sub_code, None);
    }

    #[test]
    fn missing_column_wins_over_missing_relation() {
        assert_eq!(
            kind_of("ERROR:  column \"nope\" of relation \"t\" does not exist"),
            ErrorKind::NoSuchField
        );
        assert_eq!(
            kind_of("ERROR:  column \"nope\" does not exist"),
            ErrorKind::NoSuchField
        );
    }

    #[test]
    fn missing_database_index_and_constraint() {
        assert_eq!(
            kind_of("FATAL:  database \"ghost\" does not exist"),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of("ERROR:  index \"ix\" does not exist"),
            ErrorKind::NotFound
        );
        assert_eq!(
            kind_of("ERROR:  constraint \"ck\" does not exist"),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn already_exists() {
        assert_eq!(
            kind_of("ERROR:  relation \"t\" already exists"),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            kind_of("ERROR:  database \"d\" already exists"),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn division_by_zero_with_trailing_newline() {
        assert_eq!(kind_of("ERROR:  division by zero"), ErrorKind::DivideByZero);
        assert_eq!(kind_of("ERROR:  division by zero\n"), ErrorKind::DivideByZero);
    }

    #[test]
    fn numeric_problems() {
        assert_eq!(
            kind_of("ERROR:  invalid input syntax for type integer: \"abc\""),
            ErrorKind::InvalidNumericValue
        );
        assert_eq!(
            kind_of("ERROR:  value \"99999999999\" is out of range for type integer"),
            ErrorKind::InvalidNumericValue
        );
        assert_eq!(
            kind_of("ERROR:  integer out of range"),
            ErrorKind::InvalidNumericValue
        );
    }

    #[test]
    fn value_too_long() {
        assert_eq!(
            kind_of("ERROR:  value too long for type character varying(3)"),
            ErrorKind::ValueTooLong
        );
    }

    #[test]
    fn syntax_and_ambiguity() {
        assert_eq!(
            kind_of("ERROR:  syntax error at or near \"SELEC\""),
            ErrorKind::SyntaxError
        );
        assert_eq!(
            kind_of("ERROR:  column reference \"id\" is ambiguous"),
            ErrorKind::SyntaxError
        );
    }

    #[test]
    fn not_null_is_checked_before_generic_constraint() {
        assert_eq!(
            kind_of(
                "ERROR:  null value in column \"name\" violates not-null constraint"
            ),
            ErrorKind::NotNullViolation
        );
        assert_eq!(
            kind_of("ERROR:  duplicate key value violates unique constraint \"t_pkey\""),
            ErrorKind::ConstraintViolation
        );
        assert_eq!(
            kind_of(
                "ERROR:  insert or update on table \"a\" violates foreign key constraint \"fk\""
            ),
            ErrorKind::ConstraintViolation
        );
    }

    #[test]
    fn permission_and_value_count() {
        assert_eq!(
            kind_of("ERROR:  permission denied for table secrets"),
            ErrorKind::AccessViolation
        );
        assert_eq!(
            kind_of("ERROR:  INSERT has more expressions than target columns"),
            ErrorKind::ValueCountMismatch
        );
    }

    #[test]
    fn unknown_text_is_unclassified() {
        let record = classify(Diagnostic::text("something odd happened"), true);
        assert_eq!(record.kind, ErrorKind::Unclassified);
        assert_eq!(record.native, "something odd happened");
    }

    #[test]
    fn negative_codes_pass_through() {
        let code = ErrorKind::NoSuchTable.code();
        assert_eq!(
            classify(Diagnostic::Code(code), false).kind,
            ErrorKind::NoSuchTable
        );
    }

    #[test]
    fn empty_diagnostic_on_dead_connection_is_connect_failure() {
        let record = classify(Diagnostic::text(""), false);
        assert_eq!(record.kind, ErrorKind::ConnectFailed);
        assert_eq!(record.native, CONNECTION_LOST);

        let alive = classify(Diagnostic::text(""), true);
        assert_eq!(alive.kind, ErrorKind::Unclassified);
    }

    #[test]
    fn sqlstate_becomes_sub_code() {
        let record = classify(
            Diagnostic::Text {
                message: "ERROR:  division by zero",
                sqlstate: Some("22012"),
            },
            true,
        );
        assert_eq!(record.sub_code.as_deref(), Some("22012"));
    }
}
