use std::fmt::Write as _;

use crate::native::Connector;
use crate::types::{RowValues, float_text};

use super::Connection;

/// Prefix `%` and `_` (and the escape character itself) with `\` so the text
/// matches literally inside `LIKE`.
#[must_use]
pub fn escape_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escape text for use between single quotes. Backslashes are doubled too
/// unless `standard_conforming_strings` is on.
#[must_use]
pub fn escape_literal(text: &str, standard_conforming_strings: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' if !standard_conforming_strings => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Double embedded `"` and wrap in double quotes.
#[must_use]
pub fn quote_identifier_always(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl<C: Connector> Connection<C> {
    /// Escape `text` for a string literal, optionally escaping `LIKE` wildcards.
    #[must_use]
    pub fn escape(&self, text: &str, escape_wildcards: bool) -> String {
        if escape_wildcards {
            escape_literal(&escape_pattern(text), self.standard_conforming_strings)
        } else {
            escape_literal(text, self.standard_conforming_strings)
        }
    }

    /// Render `value` as an SQL literal.
    #[must_use]
    pub fn quote(&self, value: &RowValues) -> String {
        match value {
            RowValues::Null => "NULL".to_string(),
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) if f.is_finite() => float_text(*f),
            RowValues::Float(f) => format!("'{}'", float_text(*f)),
            RowValues::Bool(b) => if *b { "'t'" } else { "'f'" }.to_string(),
            RowValues::Text(text) => format!("'{}'", self.escape(text, false)),
            RowValues::Timestamp(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            RowValues::JSON(json) => format!("'{}'", self.escape(&json.to_string(), false)),
            RowValues::Blob(bytes) => {
                let mut hex = String::with_capacity(2 + bytes.len() * 2);
                hex.push_str("\\x");
                for b in bytes {
                    let _ = write!(hex, "{b:02x}");
                }
                format!("'{}'", self.escape(&hex, false))
            }
        }
    }

    /// Quote an identifier. With `check_option`, the name is returned
    /// unchanged unless the `quote_identifier` option is on.
    #[must_use]
    pub fn quote_identifier(&self, name: &str, check_option: bool) -> String {
        if check_option && !self.options.quote_identifier {
            return name.to_string();
        }
        quote_identifier_always(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgsql::DriverConfig;
    use crate::test_utils::MockConnector;

    #[test]
    fn pattern_escaping() {
        assert_eq!(escape_pattern("100%_a\\b"), "100\\%\\_a\\\\b");
    }

    #[test]
    fn literal_escaping_depends_on_conforming_strings() {
        assert_eq!(escape_literal("it's C:\\tmp", false), "it''s C:\\\\tmp");
        assert_eq!(escape_literal("it's C:\\tmp", true), "it''s C:\\tmp");
    }

    #[test]
    fn identifiers_double_quotes() {
        assert_eq!(quote_identifier_always("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn non_finite_floats_are_quoted_keywords() {
        let conn = Connection::new(MockConnector::new(), DriverConfig::default()).unwrap();
        assert_eq!(conn.quote(&RowValues::Float(f64::NAN)), "'NaN'");
        assert_eq!(conn.quote(&RowValues::Float(f64::INFINITY)), "'Infinity'");
        assert_eq!(conn.quote(&RowValues::Float(f64::NEG_INFINITY)), "'-Infinity'");
        assert_eq!(conn.quote(&RowValues::Float(-0.25)), "-0.25");
    }
}
