use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PgDriverError;
use crate::translation::{BindNamePattern, DEFAULT_BINDNAME_FORMAT, Dialect};

/// Transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    /// Local socket; `Dsn::socket` names the socket directory.
    Unix,
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dsn {
    pub protocol: Protocol,
    pub hostspec: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Raw value for the `options=` connection parameter.
    pub options: Option<String>,
    pub connect_timeout: Option<u32>,
    pub sslmode: Option<String>,
    /// Client encoding applied right after connecting.
    pub charset: Option<String>,
    /// Skip `SET SESSION DATESTYLE = 'ISO'` on connect.
    pub disable_iso_date: bool,
}

impl Dsn {
    /// Build a libpq-style connection string.
    ///
    /// An empty `database` connects to `template1`. Credentials and the
    /// database name are single-quoted with `'` and `\` backslash-escaped.
    #[must_use]
    pub fn conninfo(&self, username: Option<&str>, password: Option<&str>, database: &str) -> String {
        let mut parts: Vec<String> = Vec::new();

        let host = match self.protocol {
            Protocol::Tcp => self.hostspec.as_deref(),
            Protocol::Unix => self.socket.as_deref(),
        };
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            parts.push(format!("host={host}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }

        let database = if database.is_empty() { "template1" } else { database };
        parts.push(format!("dbname={}", quote_conninfo_value(database)));

        if let Some(user) = username.filter(|u| !u.is_empty()) {
            parts.push(format!("user={}", quote_conninfo_value(user)));
        }
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            parts.push(format!("password={}", quote_conninfo_value(password)));
        }
        if let Some(options) = self.options.as_deref().filter(|o| !o.is_empty()) {
            parts.push(format!("options={options}"));
        }
        if let Some(timeout) = self.connect_timeout.filter(|t| *t > 0) {
            parts.push(format!("connect_timeout={timeout}"));
        }
        if let Some(sslmode) = self.sslmode.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("sslmode={sslmode}"));
        }

        parts.join(" ")
    }
}

fn quote_conninfo_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Driver behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Keep the native handle open (parked) across non-forced disconnects.
    pub persistent: bool,
    /// Dispatch queries and fetch the first result separately.
    pub multi_query: bool,
    pub max_identifiers_length: usize,
    /// Handle name template; `{driver}` and `{id}` are substituted.
    pub statement_format: String,
    /// Never create server statements; inline quoted literals at execution.
    pub emulate_prepared: bool,
    /// Skip native execution entirely (dry runs).
    pub disable_query: bool,
    pub bindname_format: String,
    pub quote_identifier: bool,
    /// Sequence name template; `{}` is replaced by the logical name.
    pub seqname_format: String,
    /// Skip the catalog lookup of a serial column's sequence.
    pub disable_smart_seqname: bool,
    pub dba_username: Option<String>,
    pub dba_password: Option<String>,
    pub dialect: Dialect,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            multi_query: false,
            max_identifiers_length: 63,
            statement_format: "mdb2_statement_{driver}_{id}".to_string(),
            emulate_prepared: false,
            disable_query: false,
            bindname_format: DEFAULT_BINDNAME_FORMAT.to_string(),
            quote_identifier: false,
            seqname_format: "{}_seq".to_string(),
            disable_smart_seqname: true,
            dba_username: None,
            dba_password: None,
            dialect: Dialect::Postgres,
        }
    }
}

/// Everything a [`Connection`](super::Connection) is created from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub dsn: Dsn,
    pub options: DriverOptions,
}

impl DriverConfig {
    #[must_use]
    pub fn new(dsn: Dsn, options: DriverOptions) -> Self {
        Self { dsn, options }
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns `Json` for malformed input and `ConfigError` when validation fails.
    pub fn from_json_str(json: &str) -> Result<Self, PgDriverError> {
        let config: DriverConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    /// Returns `Io` when the file cannot be read, otherwise as [`DriverConfig::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PgDriverError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// # Errors
    /// Returns `ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> Result<(), PgDriverError> {
        if self.dsn.port == Some(0) {
            return Err(PgDriverError::ConfigError(
                "port must be non-zero".to_string(),
            ));
        }
        if self.dsn.protocol == Protocol::Unix && self.dsn.socket.is_none() {
            tracing::debug!("unix protocol without a socket path; libpq default applies");
        }
        if self.options.max_identifiers_length == 0 {
            return Err(PgDriverError::ConfigError(
                "max_identifiers_length must be at least 1".to_string(),
            ));
        }
        if !self.options.statement_format.contains("{id}") {
            return Err(PgDriverError::ConfigError(
                "statement_format must contain {id}".to_string(),
            ));
        }
        if !self.options.seqname_format.contains("{}") {
            return Err(PgDriverError::ConfigError(
                "seqname_format must contain {}".to_string(),
            ));
        }
        BindNamePattern::new(&self.options.bindname_format)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_conninfo_quotes_credentials() {
        let dsn = Dsn {
            hostspec: Some("db.local".into()),
            port: Some(5433),
            connect_timeout: Some(5),
            sslmode: Some("disable".into()),
            ..Dsn::default()
        };
        assert_eq!(
            dsn.conninfo(Some("o'neil"), Some("a\\b"), "sales"),
            "host=db.local port=5433 dbname='sales' user='o\\'neil' password='a\\\\b' connect_timeout=5 sslmode=disable"
        );
    }

    #[test]
    fn unix_socket_and_template_database() {
        let dsn = Dsn {
            protocol: Protocol::Unix,
            hostspec: Some("ignored".into()),
            socket: Some("/var/run/postgresql".into()),
            ..Dsn::default()
        };
        assert_eq!(
            dsn.conninfo(None, None, ""),
            "host=/var/run/postgresql dbname='template1'"
        );
    }

    #[test]
    fn defaults_match_driver_conventions() {
        let options = DriverOptions::default();
        assert_eq!(options.max_identifiers_length, 63);
        assert!(options.disable_smart_seqname);
        assert!(!options.multi_query);
        assert_eq!(options.seqname_format, "{}_seq");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = DriverConfig::from_json_str(
            r#"{"dsn": {"hostspec": "h", "database": "d"}, "options": {"persistent": true}}"#,
        )
        .unwrap();
        assert!(config.options.persistent);
        assert_eq!(config.options.max_identifiers_length, 63);
        assert_eq!(config.dsn.database.as_deref(), Some("d"));
    }

    #[test]
    fn invalid_bindname_format_is_rejected() {
        let err = DriverConfig::from_json_str(r#"{"options": {"bindname_format": "("}}"#)
            .unwrap_err();
        assert!(matches!(err, PgDriverError::ConfigError(_)));
    }
}
