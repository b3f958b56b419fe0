use crate::error::{ErrorKind, PgDriverError};
use crate::native::Connector;

use super::Connection;
use super::quote::escape_literal;

impl<C: Connector> Connection<C> {
    /// Physical sequence name for a logical one.
    ///
    /// Unless `disable_smart_seqname` is set, the catalog is searched first
    /// for a serial column default naming a sequence, matching either a
    /// relation called `seq` or `<table>_<field>` split at the first `_`.
    /// Otherwise `seqname_format` is applied.
    ///
    /// # Errors
    /// Only connection failures; a failed catalog lookup falls back to the format.
    pub fn sequence_name(&mut self, seq: &str) -> Result<String, PgDriverError> {
        if !self.options.disable_smart_seqname {
            let lookup = self.smart_sequence_query(seq);
            match self.do_query(&lookup, false, "sequence_name") {
                Ok(result) => {
                    if let Some(name) = result
                        .first_value()
                        .and_then(|v| v.as_text())
                        .filter(|name| !name.is_empty())
                    {
                        return Ok(name.to_string());
                    }
                }
                Err(err) if err.kind() == ErrorKind::ConnectFailed => return Err(err),
                Err(err) => tracing::debug!(%err, seq, "sequence lookup failed, using format"),
            }
        }
        Ok(self.options.seqname_format.replace("{}", seq))
    }

    fn smart_sequence_query(&self, seq: &str) -> String {
        let scs = self.standard_conforming_strings;
        let mut relation = format!("c.relname = '{}'", escape_literal(seq, scs));
        if let Some((table, field)) = seq.split_once('_') {
            if !field.is_empty() {
                relation.push_str(&format!(
                    " OR (c.relname = '{}' AND a.attname = '{}')",
                    escape_literal(table, scs),
                    escape_literal(field, scs)
                ));
            }
        }
        format!(
            "SELECT substring(pg_get_expr(d.adbin, d.adrelid) FROM 'nextval[^'']*''([^'']*)') \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum AND a.atthasdef \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE ({relation}) \
             AND n.nspname = ANY (current_schemas(false)) \
             AND NOT a.attisdropped AND a.attnum > 0 \
             AND pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval%' \
             ORDER BY array_position(current_schemas(false), n.nspname), a.attnum \
             LIMIT 1"
        )
    }

    /// Next value of sequence `seq`. With `on_demand`, a missing sequence is
    /// created and the call retried once.
    ///
    /// # Errors
    /// Classified `Native` errors; a failed on-demand creation is reported
    /// with its own context.
    pub fn next_sequence_value(&mut self, seq: &str, on_demand: bool) -> Result<i64, PgDriverError> {
        let name = self.sequence_name(seq)?;
        let quoted = self.quote_identifier(&name, true);
        match self.query_int(&format!("SELECT NEXTVAL('{quoted}')")) {
            Err(err) if on_demand && err.kind() == ErrorKind::NoSuchTable => {
                tracing::debug!(seq, "creating sequence on demand");
                self.create_sequence(seq, 1).map_err(|err| match err {
                    PgDriverError::Native { record, .. } => PgDriverError::Native {
                        context: "on demand sequence could not be created".to_string(),
                        record,
                    },
                    other => other,
                })?;
                self.next_sequence_value(seq, false)
            }
            other => other,
        }
    }

    /// Create sequence `seq` starting at `start`.
    ///
    /// # Errors
    /// Classified `Native` errors.
    pub fn create_sequence(&mut self, seq: &str, start: i64) -> Result<(), PgDriverError> {
        let name = self.options.seqname_format.replace("{}", seq);
        let quoted = self.quote_identifier(&name, true);
        let min_value = if start < 1 {
            format!(" MINVALUE {start}")
        } else {
            String::new()
        };
        self.do_query(
            &format!("CREATE SEQUENCE {quoted} INCREMENT 1{min_value} START {start}"),
            true,
            "create_sequence",
        )?;
        Ok(())
    }

    /// Id generated by the last insert: `lastval()` without arguments,
    /// otherwise the current value of the `<table>[_<field>]` sequence.
    ///
    /// # Errors
    /// Classified `Native` errors.
    pub fn last_insert_id(
        &mut self,
        table: Option<&str>,
        field: Option<&str>,
    ) -> Result<i64, PgDriverError> {
        let table = table.filter(|t| !t.is_empty());
        let field = field.filter(|f| !f.is_empty());
        if table.is_none() && field.is_none() {
            return self.query_int("SELECT lastval()");
        }
        let seq = match field {
            Some(field) => format!("{}_{field}", table.unwrap_or_default()),
            None => table.unwrap_or_default().to_string(),
        };
        let name = self.sequence_name(&seq)?;
        let quoted = self.quote_identifier(&name, true);
        self.query_int(&format!("SELECT currval('{quoted}')"))
    }

    /// Last value handed out by sequence `seq`.
    ///
    /// # Errors
    /// Classified `Native` errors.
    pub fn current_sequence_value(&mut self, seq: &str) -> Result<i64, PgDriverError> {
        let name = self.sequence_name(seq)?;
        let quoted = self.quote_identifier(&name, true);
        self.query_int(&format!("SELECT last_value FROM {quoted}"))
    }
}
