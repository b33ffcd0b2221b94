//! SQLite sessions: one connection and one lazily opened transaction.

use crate::config::Settings;
use crate::db::{open_db, DbLocation};
use crate::error::{RepoError, RepoResult};
use crate::session::{NativeSession, SessionFactory};
use log::{debug, warn};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Params, Statement, ToSql};
use serde_json::{Map, Number, Value};

/// Bound parameters of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParams {
    Positional(Vec<SqlValue>),
    /// Names include their sigil, e.g. `:status`.
    Named(Vec<(String, SqlValue)>),
}

/// One SQL statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub sql: String,
    pub params: SqlParams,
}

impl SqlCommand {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params: SqlParams::Positional(params),
        }
    }

    pub fn named(sql: impl Into<String>, params: Vec<(String, SqlValue)>) -> Self {
        Self {
            sql: sql.into(),
            params: SqlParams::Named(params),
        }
    }
}

/// Result rows as JSON objects keyed by column name.
pub type SqlRow = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutput {
    Rows(Vec<SqlRow>),
    Affected(usize),
}

impl SqlOutput {
    pub fn into_rows(self) -> Vec<SqlRow> {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => Vec::new(),
        }
    }

    pub fn affected(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Affected(count) => *count,
        }
    }
}

/// Opens SQLite sessions against one database location.
///
/// In-memory locations give every session its own private database.
#[derive(Debug, Clone)]
pub struct SqliteSessionFactory {
    location: DbLocation,
}

impl SqliteSessionFactory {
    pub fn new(location: DbLocation) -> Self {
        Self { location }
    }

    /// Reads the database address configured for `prefix`.
    ///
    /// # Errors
    /// - `Configuration` when neither `<prefix>` nor `<prefix>.Url` is set.
    pub fn from_settings(settings: &Settings, prefix: &str) -> RepoResult<Self> {
        let address = settings.store_address(prefix).ok_or_else(|| {
            RepoError::Configuration(format!("no database configured for `{prefix}`"))
        })?;
        Ok(Self::new(DbLocation::parse(address)))
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }
}

impl SessionFactory for SqliteSessionFactory {
    type Session = SqlSession;

    fn open_session(&self) -> RepoResult<SqlSession> {
        let conn = open_db(&self.location)?;
        Ok(SqlSession {
            conn: Some(conn),
            in_transaction: false,
        })
    }

    fn source(&self) -> String {
        self.location.to_string()
    }
}

/// Connection-backed unit of work. The first mutating statement opens an
/// immediate transaction that lasts until `commit` or `dispose`.
pub struct SqlSession {
    conn: Option<Connection>,
    in_transaction: bool,
}

impl SqlSession {
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl NativeSession for SqlSession {
    type Command = SqlCommand;
    type Output = SqlOutput;

    fn execute(&mut self, command: SqlCommand) -> RepoResult<SqlOutput> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| RepoError::SessionClosed("sql".to_string()))?;
        let mut stmt = conn.prepare(&command.sql)?;
        if !stmt.readonly() && !self.in_transaction {
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            self.in_transaction = true;
            debug!("event=sql_tx module=sql status=start");
        }

        match &command.params {
            SqlParams::Positional(values) => run(&mut stmt, params_from_iter(values.iter())),
            SqlParams::Named(pairs) => {
                let named = pairs
                    .iter()
                    .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                    .collect::<Vec<_>>();
                run(&mut stmt, named.as_slice())
            }
        }
    }

    fn commit(&mut self) -> RepoResult<()> {
        let Some(conn) = self.conn.as_ref() else {
            return Err(RepoError::SessionClosed("sql".to_string()));
        };
        if self.in_transaction {
            conn.execute_batch("COMMIT;")?;
            self.in_transaction = false;
            debug!("event=sql_tx module=sql status=ok action=commit");
        }
        Ok(())
    }

    fn dispose(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction {
            self.in_transaction = false;
            match conn.execute_batch("ROLLBACK;") {
                Ok(()) => debug!("event=sql_tx module=sql status=ok action=rollback"),
                Err(err) => warn!("event=sql_tx module=sql status=error action=rollback error={err}"),
            }
        }
    }
}

fn run<P: Params>(stmt: &mut Statement<'_>, params: P) -> RepoResult<SqlOutput> {
    if stmt.column_count() == 0 {
        return Ok(SqlOutput::Affected(stmt.execute(params)?));
    }

    let columns = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            object.insert(name.clone(), value_to_json(row.get_ref(index)?));
        }
        out.push(object);
    }
    Ok(SqlOutput::Rows(out))
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => Number::from_f64(number).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Converts a JSON scalar to a bindable SQLite value. Arrays and objects
/// bind as their JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => number.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{SqlCommand, SqlOutput, SqliteSessionFactory};
    use crate::db::DbLocation;
    use crate::session::{NativeSession, SessionFactory};
    use rusqlite::types::Value as SqlValue;
    use serde_json::json;

    #[test]
    fn mutations_open_a_transaction_until_commit() {
        let factory = SqliteSessionFactory::new(DbLocation::Memory);
        let mut session = factory.open_session().unwrap();

        session
            .execute(SqlCommand::new(
                "INSERT INTO entities (collection, entity_key, body) VALUES (?1, ?2, ?3)",
                vec![
                    SqlValue::Text("orders".to_string()),
                    SqlValue::Text("1".to_string()),
                    SqlValue::Text(r#"{"id":1}"#.to_string()),
                ],
            ))
            .unwrap();
        assert!(session.in_transaction());

        let rows = session
            .execute(SqlCommand::named(
                "SELECT entity_key, json_extract(body, '$.id') AS id FROM entities WHERE collection = :c",
                vec![(":c".to_string(), SqlValue::Text("orders".to_string()))],
            ))
            .unwrap();
        match rows {
            SqlOutput::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["entity_key"], json!("1"));
                assert_eq!(rows[0]["id"], json!(1));
            }
            other => panic!("expected rows, got {other:?}"),
        }

        session.commit().unwrap();
        assert!(!session.in_transaction());
        session.dispose();
    }
}
