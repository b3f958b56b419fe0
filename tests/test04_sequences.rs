use pgsql_driver::prelude::*;
use pgsql_driver::test_utils::MockConnector;

fn connection(mock: &MockConnector, options: DriverOptions) -> Connection<MockConnector> {
    let dsn = Dsn {
        database: Some("shop".into()),
        ..Dsn::default()
    };
    Connection::new(mock.clone(), DriverConfig::new(dsn, options)).unwrap()
}

fn missing_relation(name: &str) -> NativeError {
    NativeError::new(format!("ERROR:  relation \"{name}\" does not exist")).with_sqlstate("42P01")
}

#[test]
fn missing_sequence_is_created_on_demand() -> Result<(), PgDriverError> {
    let mock = MockConnector::new();
    mock.fail_times("NEXTVAL", missing_relation("orders_seq"), 1);
    mock.respond_value("NEXTVAL", "1");
    let mut conn = connection(&mock, DriverOptions::default());

    assert_eq!(conn.next_sequence_value("orders", true)?, 1);
    let statements = mock.statements();
    let tail: Vec<&str> = statements.iter().rev().take(3).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        [
            "SELECT NEXTVAL('orders_seq')",
            "CREATE SEQUENCE orders_seq INCREMENT 1 START 1",
            "SELECT NEXTVAL('orders_seq')",
        ]
    );
    Ok(())
}

#[test]
fn missing_sequence_without_on_demand_is_reported() {
    let mock = MockConnector::new();
    mock.fail_on("NEXTVAL", missing_relation("orders_seq"));
    let mut conn = connection(&mock, DriverOptions::default());
    let err = conn.next_sequence_value("orders", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchTable);
    assert!(!mock.statements().iter().any(|s| s.starts_with("CREATE SEQUENCE")));
}

#[test]
fn failed_on_demand_creation_has_its_own_context() {
    let mock = MockConnector::new();
    mock.fail_on("NEXTVAL", missing_relation("orders_seq"));
    mock.fail_on(
        "CREATE SEQUENCE",
        NativeError::new("ERROR:  permission denied for schema public"),
    );
    let mut conn = connection(&mock, DriverOptions::default());
    let err = conn.next_sequence_value("orders", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessViolation);
    assert!(
        err.to_string()
            .starts_with("on demand sequence could not be created")
    );
}

#[test]
fn quoted_sequence_with_negative_start() -> Result<(), PgDriverError> {
    let mock = MockConnector::new();
    let options = DriverOptions {
        quote_identifier: true,
        ..DriverOptions::default()
    };
    let mut conn = connection(&mock, options);
    conn.create_sequence("ledger", -5)?;
    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some("CREATE SEQUENCE \"ledger_seq\" INCREMENT 1 MINVALUE -5 START -5")
    );
    Ok(())
}

#[test]
fn last_insert_id_and_current_value() -> Result<(), PgDriverError> {
    let mock = MockConnector::new();
    mock.respond_value("lastval()", "17");
    mock.respond_value("currval('orders_id_seq')", "41");
    mock.respond_value("last_value FROM orders_seq", "99");
    let mut conn = connection(&mock, DriverOptions::default());

    assert_eq!(conn.last_insert_id(None, None)?, 17);
    assert_eq!(conn.last_insert_id(Some("orders"), Some("id"))?, 41);
    assert_eq!(conn.current_sequence_value("orders")?, 99);
    Ok(())
}

#[test]
fn non_integer_sequence_value_is_rejected() {
    let mock = MockConnector::new();
    mock.respond_value("lastval()", "n/a");
    let mut conn = connection(&mock, DriverOptions::default());
    let err = conn.last_insert_id(None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn smart_lookup_finds_serial_sequence() -> Result<(), PgDriverError> {
    let mock = MockConnector::new();
    mock.respond_value("pg_attrdef", "orders_order_id_seq");
    mock.respond_value("NEXTVAL", "5");
    let options = DriverOptions {
        disable_smart_seqname: false,
        ..DriverOptions::default()
    };
    let mut conn = connection(&mock, options);

    assert_eq!(conn.sequence_name("orders_order_id")?, "orders_order_id_seq");
    let lookup = mock
        .statements()
        .into_iter()
        .find(|s| s.contains("pg_attrdef"))
        .expect("catalog lookup issued");
    assert!(lookup.contains("c.relname = 'orders_order_id'"));
    assert!(lookup.contains("(c.relname = 'orders' AND a.attname = 'order_id')"));

    assert_eq!(conn.next_sequence_value("orders_order_id", false)?, 5);
    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some("SELECT NEXTVAL('orders_order_id_seq')")
    );
    Ok(())
}

#[test]
fn failed_smart_lookup_falls_back_to_format() -> Result<(), PgDriverError> {
    let mock = MockConnector::new();
    mock.fail_on(
        "pg_attrdef",
        NativeError::new("ERROR:  permission denied for table pg_attrdef"),
    );
    let options = DriverOptions {
        disable_smart_seqname: false,
        seqname_format: "seq_{}".into(),
        ..DriverOptions::default()
    };
    let mut conn = connection(&mock, options);
    assert_eq!(conn.sequence_name("invoices")?, "seq_invoices");
    Ok(())
}
