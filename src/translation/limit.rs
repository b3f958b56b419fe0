//! Row-limit rewriting.
//!
//! Recognised shapes are deliberately narrow:
//! - a trailing native limit clause: `LIMIT n`, `LIMIT n, m`, `LIMIT n OFFSET m`,
//!   optionally followed by text without a closing parenthesis;
//! - `DELETE [*] FROM <table> [WHERE <cond>]` and `UPDATE <table> <rest> [WHERE <cond>]`
//!   where `<table>` is a run of word characters and dots. Only a `WHERE` outside
//!   parentheses, quotes and comments splits `<rest>` from `<cond>`.
//!
//! Anything else is returned unchanged.

use lazy_static::lazy_static;
use regex::Regex;

use super::Dialect;
use super::parsers::is_keyword_at;
use super::scanner::{Action, scan_code};

lazy_static! {
    static ref LIMIT_CLAUSE: Regex =
        Regex::new(r"(?i)\bLIMIT\s*\d(?:\s*(?:,|OFFSET)\s*\d+)?(?:[^\)]*)?$")
            .expect("limit clause pattern is valid");
    static ref MANIP_STATEMENT: Regex = Regex::new(
        r"(?is)^(\bDELETE\b\s+(?:\*\s+)?\bFROM\b|\bUPDATE\b)\s+([\w\.]+)\s*(.*)$"
    )
    .expect("manipulation statement pattern is valid");
}

/// Query text after limit handling. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenQuery {
    sql: String,
    limit: u64,
    offset: u64,
    row_identity_subselect: Option<String>,
}

impl RewrittenQuery {
    fn unchanged(sql: &str, limit: u64, offset: u64) -> Self {
        Self {
            sql: sql.to_string(),
            limit,
            offset,
            row_identity_subselect: None,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn into_sql(self) -> String {
        self.sql
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The `SELECT <row identity> ...` pinning the affected rows, for
    /// manipulation queries that were rewritten.
    #[must_use]
    pub fn row_identity_subselect(&self) -> Option<&str> {
        self.row_identity_subselect.as_deref()
    }
}

/// True when `query` already ends in a native limit clause.
#[must_use]
pub fn has_limit_clause(query: &str) -> bool {
    LIMIT_CLAUSE.is_match(query)
}

/// Inject `limit`/`offset` into `query`.
///
/// Reads get `LIMIT n OFFSET m` appended; manipulation queries are rewritten by
/// [`emulate_manip_limit`]. A zero limit or an existing limit clause leaves the
/// query untouched.
#[must_use]
pub fn apply_limit(
    query: &str,
    is_manip: bool,
    limit: u64,
    offset: u64,
    dialect: Dialect,
) -> RewrittenQuery {
    if limit == 0 || has_limit_clause(query) {
        return RewrittenQuery::unchanged(query, limit, offset);
    }

    let trimmed = query.trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    if is_manip {
        return emulate_manip_limit(trimmed, limit, dialect);
    }

    RewrittenQuery {
        sql: format!("{trimmed} LIMIT {limit} OFFSET {offset}"),
        limit,
        offset,
        row_identity_subselect: None,
    }
}

/// Rewrite `DELETE`/`UPDATE` so at most `limit` rows are touched, pinning the
/// rows by physical row identity:
///
/// `DELETE FROM t WHERE x=1` becomes
/// `DELETE FROM t WHERE ctid IN (SELECT ctid FROM t WHERE x=1 LIMIT 2)`.
///
/// Statements outside the recognised shape are returned unchanged.
#[must_use]
pub fn emulate_manip_limit(query: &str, limit: u64, dialect: Dialect) -> RewrittenQuery {
    let Some(caps) = MANIP_STATEMENT.captures(query) else {
        tracing::debug!(query, "manipulation limit not applied: unrecognised statement shape");
        return RewrittenQuery::unchanged(query, limit, 0);
    };

    let verb = caps.get(1).map_or("", |m| m.as_str()).trim();
    let table = caps.get(2).map_or("", |m| m.as_str());
    let tail = caps.get(3).map_or("", |m| m.as_str());

    let Some(where_at) = top_level_where(tail) else {
        tracing::debug!(query, "manipulation limit not applied: unbalanced statement");
        return RewrittenQuery::unchanged(query, limit, 0);
    };
    let (rest, condition) = match where_at {
        Some(at) => (tail[..at].trim(), Some(tail[at + WHERE.len()..].trim())),
        None => (tail.trim(), None),
    };
    if condition.is_some_and(str::is_empty) {
        tracing::debug!(query, "manipulation limit not applied: empty WHERE clause");
        return RewrittenQuery::unchanged(query, limit, 0);
    }

    let row_id = dialect.row_identity_column();
    let mut subselect = format!("SELECT {row_id} FROM {table}");
    if let Some(condition) = condition {
        subselect.push_str(" WHERE ");
        subselect.push_str(condition);
    }
    subselect.push_str(&format!(" LIMIT {limit}"));

    let mut sql = format!("{verb} {table}");
    if !rest.is_empty() {
        sql.push(' ');
        sql.push_str(rest);
    }
    sql.push_str(&format!(" WHERE {row_id} IN ({subselect})"));

    RewrittenQuery {
        sql,
        limit,
        offset: 0,
        row_identity_subselect: Some(subselect),
    }
}

const WHERE: &[u8] = b"where";

/// Offset of the first `WHERE` keyword at parenthesis depth zero, skipping
/// literals and comments. `None` when parentheses are unbalanced or a literal
/// is left open.
fn top_level_where(tail: &str) -> Option<Option<usize>> {
    let bytes = tail.as_bytes();
    let mut depth: i64 = 0;
    let mut underflow = false;
    let mut found = None;
    scan_code(tail, |idx| {
        match bytes[idx] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                underflow |= depth < 0;
            }
            _ if depth == 0 && found.is_none() && is_keyword_at(bytes, idx, WHERE) => {
                found = Some(idx);
                return Ok(Action::Skip(WHERE.len()));
            }
            _ => {}
        }
        Ok(Action::Continue)
    })
    .ok()?;
    (!underflow && depth == 0).then_some(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_query_gets_limit_and_offset() {
        let q = apply_limit("SELECT * FROM t", false, 10, 5, Dialect::Postgres);
        assert_eq!(q.sql(), "SELECT * FROM t LIMIT 10 OFFSET 5");
        assert_eq!(q.limit(), 10);
        assert_eq!(q.offset(), 5);
    }

    #[test]
    fn terminator_and_trailing_space_are_stripped() {
        let q = apply_limit("SELECT * FROM t ;  \n", false, 1, 0, Dialect::Postgres);
        assert_eq!(q.sql(), "SELECT * FROM t LIMIT 1 OFFSET 0");
    }

    #[test]
    fn existing_limit_is_kept() {
        for sql in [
            "SELECT * FROM t LIMIT 3",
            "SELECT * FROM t limit 3 offset 9",
            "SELECT * FROM t LIMIT 3, 4",
        ] {
            let q = apply_limit(sql, false, 50, 0, Dialect::Postgres);
            assert_eq!(q.sql(), sql);
        }
    }

    #[test]
    fn limit_in_subquery_does_not_count() {
        let q = apply_limit(
            "SELECT * FROM (SELECT * FROM t LIMIT 3) s",
            false,
            2,
            0,
            Dialect::Postgres,
        );
        assert_eq!(
            q.sql(),
            "SELECT * FROM (SELECT * FROM t LIMIT 3) s LIMIT 2 OFFSET 0"
        );
    }

    #[test]
    fn zero_limit_is_a_no_op() {
        let q = apply_limit("SELECT * FROM t;", false, 0, 7, Dialect::Postgres);
        assert_eq!(q.sql(), "SELECT * FROM t;");
    }

    #[test]
    fn delete_is_pinned_by_ctid() {
        let q = apply_limit("DELETE FROM t WHERE x=1", true, 2, 0, Dialect::Postgres);
        assert_eq!(
            q.sql(),
            "DELETE FROM t WHERE ctid IN (SELECT ctid FROM t WHERE x=1 LIMIT 2)"
        );
        assert_eq!(
            q.row_identity_subselect(),
            Some("SELECT ctid FROM t WHERE x=1 LIMIT 2")
        );
    }

    #[test]
    fn update_keeps_its_set_clause() {
        let q = emulate_manip_limit("UPDATE s.t SET a = 1 WHERE b = 2", 1, Dialect::Postgres);
        assert_eq!(
            q.sql(),
            "UPDATE s.t SET a = 1 WHERE ctid IN (SELECT ctid FROM s.t WHERE b = 2 LIMIT 1)"
        );
        let q = emulate_manip_limit("update t set a = 1", 3, Dialect::Postgres);
        assert_eq!(
            q.sql(),
            "update t set a = 1 WHERE ctid IN (SELECT ctid FROM t LIMIT 3)"
        );
    }

    #[test]
    fn delete_without_where_and_sqlite_row_identity() {
        let q = emulate_manip_limit("DELETE * FROM logs", 5, Dialect::Sqlite);
        assert_eq!(
            q.sql(),
            "DELETE * FROM logs WHERE rowid IN (SELECT rowid FROM logs LIMIT 5)"
        );
    }

    #[test]
    fn unrecognised_manipulation_is_returned_unchanged() {
        let sql = "INSERT INTO t SELECT * FROM u";
        let q = apply_limit(sql, true, 4, 0, Dialect::Postgres);
        assert_eq!(q.sql(), sql);
        assert_eq!(q.row_identity_subselect(), None);
    }

    #[test]
    fn where_inside_subquery_is_not_the_statement_condition() {
        let q = emulate_manip_limit(
            "UPDATE t SET a = (SELECT max(b) FROM u WHERE u.k = t.k) WHERE c = 1",
            1,
            Dialect::Postgres,
        );
        assert_eq!(
            q.sql(),
            "UPDATE t SET a = (SELECT max(b) FROM u WHERE u.k = t.k) \
             WHERE ctid IN (SELECT ctid FROM t WHERE c = 1 LIMIT 1)"
        );

        let q = emulate_manip_limit(
            "UPDATE t SET a = (SELECT max(b) FROM u WHERE u.k = t.k)",
            2,
            Dialect::Postgres,
        );
        assert_eq!(
            q.row_identity_subselect(),
            Some("SELECT ctid FROM t LIMIT 2")
        );
    }

    #[test]
    fn where_in_literals_and_comments_is_ignored() {
        let q = emulate_manip_limit(
            "UPDATE t SET note = 'see where' /* where */ WHERE id > 3",
            1,
            Dialect::Postgres,
        );
        assert_eq!(
            q.sql(),
            "UPDATE t SET note = 'see where' /* where */ \
             WHERE ctid IN (SELECT ctid FROM t WHERE id > 3 LIMIT 1)"
        );
        let q = emulate_manip_limit("UPDATE t SET nowhere = 1", 1, Dialect::Postgres);
        assert_eq!(
            q.sql(),
            "UPDATE t SET nowhere = 1 WHERE ctid IN (SELECT ctid FROM t LIMIT 1)"
        );
    }

    #[test]
    fn unbalanced_manipulation_is_returned_unchanged() {
        for sql in [
            "UPDATE t SET a = (1 WHERE b = 2",
            "UPDATE t SET a = 1) WHERE b = (2",
            "DELETE FROM t WHERE name = 'open",
            "DELETE FROM t WHERE",
        ] {
            let q = emulate_manip_limit(sql, 1, Dialect::Postgres);
            assert_eq!(q.sql(), sql);
            assert_eq!(q.row_identity_subselect(), None);
        }
    }

    #[test]
    fn limit_inside_an_identifier_is_not_a_clause() {
        assert!(!has_limit_clause("SELECT ratelimit1 FROM t"));
        let q = apply_limit("SELECT ratelimit1 FROM t", false, 10, 0, Dialect::Postgres);
        assert_eq!(q.sql(), "SELECT ratelimit1 FROM t LIMIT 10 OFFSET 0");
        assert!(has_limit_clause("SELECT x FROM t\nLIMIT 5"));
    }
}
