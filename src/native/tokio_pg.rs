//! Blocking native client over `tokio-postgres`.
//!
//! Each client owns a current-thread runtime; every call drives it with
//! `block_on`, so the caller sees plain synchronous behaviour.

use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Row, SimpleQueryMessage, Statement};
use tokio_util::bytes;

use super::{Connector, NativeClient};
use crate::error::NativeError;
use crate::results::ResultSet;
use crate::translation::{Dialect, inline_params};
use crate::types::{RowValues, float_text};

type PendingQuery = JoinHandle<Result<Vec<SimpleQueryMessage>, tokio_postgres::Error>>;

/// Opens [`TokioPgClient`] handles. TLS is not negotiated (`NoTls`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPgConnector;

impl Connector for TokioPgConnector {
    type Client = TokioPgClient;

    fn connect(&self, conninfo: &str, _persistent: bool) -> Result<TokioPgClient, NativeError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NativeError::new(format!("unable to start client runtime: {e}")))?;
        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(conninfo, NoTls))
            .map_err(native_error)?;
        let driver = runtime.spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(%err, "postgres connection task ended with an error");
            }
        });
        Ok(TokioPgClient {
            runtime,
            client: Arc::new(client),
            driver,
            statements: HashMap::new(),
            pending: None,
        })
    }
}

/// A single blocking PostgreSQL connection.
pub struct TokioPgClient {
    runtime: Runtime,
    client: Arc<Client>,
    driver: JoinHandle<()>,
    statements: HashMap<String, Statement>,
    pending: Option<PendingQuery>,
}

impl NativeClient for TokioPgClient {
    fn execute(&mut self, sql: &str) -> Result<ResultSet, NativeError> {
        let messages = self
            .runtime
            .block_on(self.client.simple_query(sql))
            .map_err(native_error)?;
        Ok(simple_result(messages))
    }

    fn send_query(&mut self, sql: &str) -> Result<(), NativeError> {
        if self.pending.is_some() {
            return Err(NativeError::new("another query is already in flight"));
        }
        let client = Arc::clone(&self.client);
        let sql = sql.to_string();
        let handle = self
            .runtime
            .spawn(async move { client.simple_query(&sql).await });
        // one poll is enough to put the request on the wire
        self.runtime.block_on(tokio::task::yield_now());
        self.pending = Some(handle);
        Ok(())
    }

    fn get_result(&mut self) -> Result<Option<ResultSet>, NativeError> {
        let Some(handle) = self.pending.take() else {
            return Ok(None);
        };
        let messages = self
            .runtime
            .block_on(handle)
            .map_err(|e| NativeError::new(format!("dispatched query was lost: {e}")))?
            .map_err(native_error)?;
        Ok(Some(simple_result(messages)))
    }

    fn supports_native_prepare(&self) -> bool {
        true
    }

    fn prepare(&mut self, name: &str, sql: &str, types: &[String]) -> Result<(), NativeError> {
        let (sql, types) = typed_statement(sql, types)?;
        let statement = self
            .runtime
            .block_on(self.client.prepare_typed(&sql, &types))
            .map_err(native_error)?;
        self.statements.insert(name.to_string(), statement);
        Ok(())
    }

    fn execute_prepared(
        &mut self,
        name: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, NativeError> {
        let statement = self.statements.get(name).ok_or_else(|| {
            NativeError::new(format!("ERROR:  prepared statement \"{name}\" does not exist"))
                .with_sqlstate("26000")
        })?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if statement.columns().is_empty() {
            let affected = self
                .runtime
                .block_on(self.client.execute(statement, &refs))
                .map_err(native_error)?;
            return Ok(ResultSet::affected(
                usize::try_from(affected).unwrap_or(usize::MAX),
            ));
        }

        let rows = self
            .runtime
            .block_on(self.client.query(statement, &refs))
            .map_err(native_error)?;
        build_result_set_from_rows(&rows)
    }

    fn deallocate(&mut self, name: &str) -> Result<(), NativeError> {
        // dropping the Statement closes it on the server
        if self.statements.remove(name).is_some() {
            return Ok(());
        }
        self.execute(&format!("DEALLOCATE {name}")).map(|_| ())
    }

    fn parameter_status(&mut self, name: &str) -> Option<String> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        let result = self.execute(&format!("SHOW {name}")).ok()?;
        result
            .first_value()
            .and_then(RowValues::as_text)
            .map(str::to_string)
    }

    fn set_client_encoding(&mut self, charset: &str) -> Result<(), NativeError> {
        let normalized: String = charset
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        if normalized != "UTF8" && normalized != "UNICODE" {
            return Err(NativeError::new(format!(
                "client encoding {charset} is not supported; tokio-postgres requires UTF8"
            )));
        }
        self.execute("SET client_encoding TO 'UTF8'").map(|_| ())
    }

    fn is_alive(&self) -> bool {
        !self.client.is_closed()
    }

    fn close(self) -> Result<(), NativeError> {
        let TokioPgClient {
            runtime,
            client,
            driver,
            statements,
            pending,
        } = self;
        if let Some(pending) = pending {
            pending.abort();
        }
        drop(statements);
        drop(client);
        runtime
            .block_on(driver)
            .map_err(|e| NativeError::new(format!("connection task failed: {e}")))
    }
}

/// Format a `tokio-postgres` failure the way libpq reports it (`SEVERITY:  message`).
fn native_error(err: tokio_postgres::Error) -> NativeError {
    let sqlstate = err.code().map(|code| code.code().to_string());
    let message = match err.as_db_error() {
        Some(db) => format!("{}:  {}", db.severity(), db.message()),
        None => err.to_string(),
    };
    NativeError { message, sqlstate }
}

fn simple_result(messages: Vec<SimpleQueryMessage>) -> ResultSet {
    let mut result = ResultSet::default();
    let mut affected = None;
    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                if result.get_column_names().is_none() {
                    let names = row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect();
                    result.set_column_names(Arc::new(names));
                }
                let values = (0..row.len())
                    .map(|i| {
                        row.get(i)
                            .map_or(RowValues::Null, |v| RowValues::Text(v.to_string()))
                    })
                    .collect();
                result.add_row_values(values);
            }
            SimpleQueryMessage::CommandComplete(n) => affected = Some(n),
            _ => {}
        }
    }
    if let Some(n) = affected {
        result.rows_affected = usize::try_from(n).unwrap_or(usize::MAX);
    }
    result
}

fn build_result_set_from_rows(rows: &[Row]) -> Result<ResultSet, NativeError> {
    let mut result_set = ResultSet::with_capacity(rows.len());
    if let Some(row) = rows.first() {
        let cols: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        result_set.set_column_names(Arc::new(cols));
    }

    for row in rows {
        let values = (0..row.columns().len())
            .map(|idx| postgres_extract_value(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        result_set.add_row_values(values);
    }

    Ok(result_set)
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, NativeError> {
    let type_info = row.columns()[idx].type_();
    let conv = |e: tokio_postgres::Error| NativeError::new(e.to_string());

    match *type_info {
        Type::INT2 => {
            let val: Option<i16> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))))
        }
        Type::INT4 => {
            let val: Option<i32> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))))
        }
        Type::INT8 => {
            let val: Option<i64> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Int))
        }
        Type::FLOAT4 => {
            let val: Option<f32> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))))
        }
        Type::FLOAT8 => {
            let val: Option<f64> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Float))
        }
        Type::BOOL => {
            let val: Option<bool> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Bool))
        }
        Type::TIMESTAMP => {
            let val: Option<NaiveDateTime> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Timestamp))
        }
        Type::TIMESTAMPTZ => {
            let val: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc())))
        }
        Type::DATE => {
            let val: Option<chrono::NaiveDate> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, |v| {
                RowValues::Timestamp(v.and_time(NaiveTime::MIN))
            }))
        }
        Type::JSON | Type::JSONB => {
            let val: Option<Value> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::JSON))
        }
        Type::BYTEA => {
            let val: Option<Vec<u8>> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Blob))
        }
        _ => {
            // For other types, attempt to get as string
            let val: Option<String> = row.try_get(idx).map_err(conv)?;
            Ok(val.map_or(RowValues::Null, RowValues::Text))
        }
    }
}

/// Server type for a declared parameter type name.
#[must_use]
pub fn pg_type_for_name(name: &str) -> Option<Type> {
    let ty = match name.trim().to_ascii_lowercase().as_str() {
        "int2" | "smallint" => Type::INT2,
        "int" | "int4" | "integer" => Type::INT4,
        "int8" | "bigint" => Type::INT8,
        "float4" | "real" => Type::FLOAT4,
        "float8" | "double precision" => Type::FLOAT8,
        "numeric" | "decimal" => Type::NUMERIC,
        "bool" | "boolean" => Type::BOOL,
        "text" => Type::TEXT,
        "varchar" | "character varying" => Type::VARCHAR,
        "bpchar" | "char" | "character" => Type::BPCHAR,
        "bytea" => Type::BYTEA,
        "date" => Type::DATE,
        "time" => Type::TIME,
        "timestamp" => Type::TIMESTAMP,
        "timestamptz" => Type::TIMESTAMPTZ,
        "json" => Type::JSON,
        "jsonb" => Type::JSONB,
        "uuid" => Type::UUID,
        _ => return None,
    };
    Some(ty)
}

/// Type declared to the server for a parameter, plus the cast its marker
/// needs when `RowValues` cannot encode that type and sends text instead.
fn declared_param_type(name: &str) -> (Type, Option<&str>) {
    match pg_type_for_name(name) {
        Some(ty) if <RowValues as ToSql>::accepts(&ty) => (ty, None),
        _ if name.trim().is_empty() => (Type::TEXT, None),
        _ => (Type::TEXT, Some(name.trim())),
    }
}

/// Statement text and parameter types for `prepare_typed`, with `$n::type`
/// casts on markers whose declared type is sent as text.
fn typed_statement<'a>(
    sql: &'a str,
    names: &[String],
) -> Result<(Cow<'a, str>, Vec<Type>), NativeError> {
    let mut types = Vec::with_capacity(names.len());
    let mut markers = Vec::with_capacity(names.len());
    let mut cast_any = false;
    for (idx, name) in names.iter().enumerate() {
        let (ty, cast) = declared_param_type(name);
        types.push(ty);
        markers.push(match cast {
            Some(cast) => {
                cast_any = true;
                format!("${}::{cast}", idx + 1)
            }
            None => format!("${}", idx + 1),
        });
    }
    if !cast_any {
        return Ok((Cow::Borrowed(sql), types));
    }
    let sql = inline_params(sql, Dialect::Postgres, &markers)
        .map_err(|e| NativeError::new(format!("could not cast parameter markers: {e}")))?;
    Ok((sql, types))
}

fn is_text_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn render_text(value: &RowValues) -> String {
    match value {
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => float_text(*f),
        RowValues::Text(s) => s.clone(),
        RowValues::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        RowValues::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        RowValues::JSON(v) => v.to_string(),
        RowValues::Blob(bytes) => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("\\x");
            for b in bytes {
                let _ = write!(out, "{b:02x}");
            }
            out
        }
        RowValues::Null => String::new(),
    }
}

impl ToSql for RowValues {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if matches!(self, RowValues::Null) {
            return Ok(IsNull::Yes);
        }
        if is_text_type(ty) {
            return render_text(self).to_sql(ty, out);
        }
        match self {
            RowValues::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => (*i).to_sql(ty, out),
            },
            #[allow(clippy::cast_possible_truncation)]
            RowValues::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => (*f).to_sql(ty, out),
            },
            RowValues::Text(s) => s.to_sql(ty, out),
            RowValues::Bool(b) => (*b).to_sql(ty, out),
            RowValues::Timestamp(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
            RowValues::JSON(jsval) => jsval.to_sql(ty, out),
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
            RowValues::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::UNKNOWN
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_names_map_to_server_types() {
        assert_eq!(pg_type_for_name("int"), Some(Type::INT4));
        assert_eq!(pg_type_for_name(" BOOL "), Some(Type::BOOL));
        assert_eq!(pg_type_for_name("numeric"), Some(Type::NUMERIC));
        assert_eq!(pg_type_for_name("geometry"), None);
    }

    #[test]
    fn every_declared_parameter_type_is_encodable() {
        for name in [
            "int2", "int", "int8", "float4", "float8", "numeric", "decimal", "bool", "text",
            "varchar", "bpchar", "bytea", "date", "time", "timestamp", "timestamptz", "json",
            "jsonb", "uuid", "geometry", "",
        ] {
            let (ty, _) = declared_param_type(name);
            assert!(<RowValues as ToSql>::accepts(&ty), "{name:?} declared as {ty}");
        }
    }

    #[test]
    fn unencodable_types_are_cast_from_text() {
        assert_eq!(declared_param_type("int"), (Type::INT4, None));
        assert_eq!(declared_param_type("numeric"), (Type::TEXT, Some("numeric")));
        assert_eq!(declared_param_type(" uuid "), (Type::TEXT, Some("uuid")));

        let names = [
            crate::pgsql::map_prepare_datatype("float"),
            "int".to_string(),
            "time".to_string(),
        ];
        let (sql, types) =
            typed_statement("SELECT * FROM p WHERE price > $1 AND id = $2 AND at < $3", &names)
                .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM p WHERE price > $1::numeric AND id = $2 AND at < $3::time"
        );
        assert_eq!(types, vec![Type::TEXT, Type::INT4, Type::TEXT]);
    }

    #[test]
    fn directly_encodable_statements_are_not_rewritten() {
        let names = ["text".to_string(), "bool".to_string()];
        let (sql, types) = typed_statement("SELECT $1 WHERE $2", &names).unwrap();
        assert!(matches!(sql, Cow::Borrowed("SELECT $1 WHERE $2")));
        assert_eq!(types, vec![Type::TEXT, Type::BOOL]);
    }

    #[test]
    fn text_rendering_for_text_parameters() {
        assert_eq!(render_text(&RowValues::Int(7)), "7");
        assert_eq!(render_text(&RowValues::Bool(false)), "f");
        assert_eq!(render_text(&RowValues::Blob(vec![0xde, 0xad])), "\\xdead");
    }
}
