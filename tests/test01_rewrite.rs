use pgsql_driver::prelude::*;
use pgsql_driver::translation::{emulate_manip_limit, has_limit_clause};

fn rewrite(sql: &str) -> NativeQuery {
    rewrite_placeholders(sql, Dialect::Postgres, &BindNamePattern::default()).unwrap()
}

#[test]
fn native_syntax_is_left_alone() {
    let native = "SELECT * FROM t WHERE a = $1 AND b = $2";
    let q = rewrite(native);
    assert_eq!(q.sql, native);
    assert!(q.placeholders.is_empty());
}

#[test]
fn repeated_named_marker_binds_once() {
    let q = rewrite("SELECT * FROM t WHERE a=:x OR b=:x");
    assert_eq!(q.sql, "SELECT * FROM t WHERE a=$1 OR b=$1");
    assert_eq!(q.placeholders.len(), 1);
    assert_eq!(q.placeholders.identity_of("x"), Some(1));
}

#[test]
fn ordinals_follow_text_order() {
    let q = rewrite("SELECT ?,?,?");
    assert_eq!(q.sql, "SELECT $1,$2,$3");
    let identities: Vec<Placeholder> = q.placeholders.iter().cloned().collect();
    assert_eq!(
        identities,
        vec![
            Placeholder::Ordinal(1),
            Placeholder::Ordinal(2),
            Placeholder::Ordinal(3)
        ]
    );
}

#[test]
fn literal_text_is_never_rewritten() {
    let q = rewrite("SELECT * FROM t WHERE s = '?:x'");
    assert_eq!(q.sql, "SELECT * FROM t WHERE s = '?:x'");
    assert!(q.placeholders.is_empty());
}

#[test]
fn unterminated_literal_is_a_syntax_error() {
    let err = rewrite_placeholders(
        "SELECT * FROM t WHERE s = 'open ?",
        Dialect::Postgres,
        &BindNamePattern::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn custom_bind_name_format() {
    let pattern = BindNamePattern::new("[a-z]+").unwrap();
    let q = rewrite_placeholders("SELECT :abc1", Dialect::Postgres, &pattern).unwrap();
    assert_eq!(q.sql, "SELECT $11");
    assert_eq!(q.placeholders.identity_of("abc"), Some(1));
}

#[test]
fn limit_injection_on_reads() {
    let q = apply_limit("SELECT * FROM t", false, 10, 5, Dialect::Postgres);
    assert_eq!(q.sql(), "SELECT * FROM t LIMIT 10 OFFSET 5");

    let q = apply_limit("SELECT * FROM t LIMIT 3", false, 10, 5, Dialect::Postgres);
    assert_eq!(q.sql(), "SELECT * FROM t LIMIT 3");
    assert!(has_limit_clause(q.sql()));
}

#[test]
fn manipulation_limit_pins_rows_by_ctid() {
    let q = apply_limit("DELETE FROM t WHERE x=1", true, 2, 0, Dialect::Postgres);
    assert_eq!(
        q.sql(),
        "DELETE FROM t WHERE ctid IN (SELECT ctid FROM t WHERE x=1 LIMIT 2)"
    );

    let q = emulate_manip_limit("UPDATE t SET a = a + 1", 1, Dialect::Postgres);
    assert_eq!(
        q.sql(),
        "UPDATE t SET a = a + 1 WHERE ctid IN (SELECT ctid FROM t LIMIT 1)"
    );
}

#[test]
fn limited_then_rewritten_prepared_text() {
    let limited = apply_limit("SELECT * FROM t WHERE a = ?;", false, 3, 6, Dialect::Postgres);
    let q = rewrite(limited.sql());
    assert_eq!(q.sql, "SELECT * FROM t WHERE a = $1 LIMIT 3 OFFSET 6");
}
