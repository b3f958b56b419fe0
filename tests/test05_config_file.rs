use std::fs;

use pgsql_driver::prelude::*;
use pgsql_driver::test_utils::MockConnector;
use tempfile::tempdir;

#[test]
fn config_file_drives_connection() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("driver.json");
    fs::write(
        &path,
        r#"{
            "dsn": {
                "protocol": "unix",
                "socket": "/var/run/postgresql",
                "username": "report",
                "database": "warehouse",
                "charset": "UTF8"
            },
            "options": {
                "persistent": true,
                "quote_identifier": true,
                "seqname_format": "{}_id_seq",
                "dialect": "postgres"
            }
        }"#,
    )?;

    let config = DriverConfig::from_json_file(&path)?;
    assert_eq!(config.dsn.protocol, Protocol::Unix);
    assert!(config.options.persistent);
    assert_eq!(config.options.max_identifiers_length, 63);
    assert_eq!(config.options.dialect, Dialect::Postgres);

    let mock = MockConnector::new();
    let mut conn = Connection::new(mock.clone(), config)?;
    conn.connect()?;
    assert_eq!(
        mock.log().connects,
        vec!["host=/var/run/postgresql dbname='warehouse' user='report'".to_string()]
    );
    assert_eq!(mock.log().encodings, vec!["UTF8".to_string()]);
    assert_eq!(conn.quote_identifier("order", true), "\"order\"");
    Ok(())
}

#[test]
fn invalid_settings_are_rejected() {
    let cases = [
        (r#"{"dsn": {"port": 0}}"#, "port"),
        (r#"{"options": {"max_identifiers_length": 0}}"#, "max_identifiers_length"),
        (r#"{"options": {"statement_format": "stmt"}}"#, "statement_format"),
        (r#"{"options": {"seqname_format": "seq"}}"#, "seqname_format"),
        (r#"{"options": {"bindname_format": "[a-"}}"#, "bindname_format"),
    ];
    for (json, field) in cases {
        let err = DriverConfig::from_json_str(json).unwrap_err();
        assert!(
            matches!(err, PgDriverError::ConfigError(_)),
            "{json}: unexpected {err:?}"
        );
        assert!(err.to_string().contains(field), "{json}: {err}");
    }
}

#[test]
fn malformed_or_missing_files() {
    let err = DriverConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, PgDriverError::Json(_)));

    let dir = tempdir().unwrap();
    let err = DriverConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, PgDriverError::Io(_)));
}

#[test]
fn connection_new_validates_too() {
    let mut config = DriverConfig::default();
    config.options.statement_format = "no_id_here".into();
    let err = Connection::new(MockConnector::new(), config).unwrap_err();
    assert!(matches!(err, PgDriverError::ConfigError(_)));
}
