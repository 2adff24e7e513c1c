use std::borrow::Cow;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;
use rusqlite::ffi;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use tracing::{debug, warn};

use crate::code::ErrorCode;
use crate::config::{Config, IN_MEMORY};
use crate::statement::{engine_message, Statement};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Prefix the engine reserves for its own catalog tables.
const RESERVED_PREFIX: &str = "sqlite_";

/// One open database.
///
/// Opening never fails outright: a failed open is recorded and observable
/// through [`Connection::is_open`], and every operation on an unopened
/// connection reports `CantOpen`.
pub struct Connection {
    conn: Option<rusqlite::Connection>,
    code: ErrorCode,
    message: Option<String>,
    path: String,
}

impl Connection {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl Into<String>) -> Self {
        Self::open_with(Config::new(path))
    }

    pub fn open_in_memory() -> Self {
        Self::open(IN_MEMORY)
    }

    pub fn open_with(config: Config) -> Self {
        match rusqlite::Connection::open_with_flags(&config.path, config.open_flags()) {
            Ok(conn) => {
                if let Some(ms) = config.busy_timeout_ms {
                    if let Err(err) = conn.busy_timeout(Duration::from_millis(ms)) {
                        warn!(path = %config.path, %err, "failed to set busy timeout");
                    }
                }
                if config.register_regexp {
                    if let Err(err) = register_regexp(&conn) {
                        warn!(path = %config.path, %err, "failed to register regexp()");
                    }
                }
                debug!(path = %config.path, "opened database");
                Self {
                    conn: Some(conn),
                    code: ErrorCode::Ok,
                    message: None,
                    path: config.path,
                }
            }
            Err(err) => {
                let code = match &err {
                    rusqlite::Error::SqliteFailure(..) => ErrorCode::from(&err),
                    _ => ErrorCode::CantOpen,
                };
                warn!(path = %config.path, %code, %err, "failed to open database");
                Self {
                    conn: None,
                    code,
                    message: Some(err.to_string()),
                    path: config.path,
                }
            }
        }
    }

    /// True iff the open attempt succeeded.
    pub fn is_open(&self) -> bool {
        self.code.is_ok()
    }

    /// Outcome of the open attempt.
    pub fn error_code(&self) -> ErrorCode {
        self.code
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Latest diagnostic from the engine, or the open failure.
    pub fn error_message(&self) -> String {
        match (self.handle(), &self.message) {
            (Some(db), _) => unsafe { engine_message(db.as_ptr()) },
            (None, Some(message)) => message.clone(),
            (None, None) => self.code.description().to_string(),
        }
    }

    fn handle(&self) -> Option<NonNull<ffi::sqlite3>> {
        // SAFETY: the handle is only used while `self` keeps the
        // connection open.
        self.conn
            .as_ref()
            .and_then(|conn| NonNull::new(unsafe { conn.handle() }))
    }

    /// Compiles the first statement in `sql`.
    pub fn prepare(&self, sql: &str) -> Statement<'_> {
        match self.handle() {
            // SAFETY: the returned statement borrows `self`, so the handle
            // outlives it.
            Some(db) => unsafe { Statement::compile(db, sql) },
            None => Statement::without_plan(ErrorCode::CantOpen, self.message.clone()),
        }
    }

    /// Compiles and runs one statement that produces no rows.
    pub fn execute(&self, sql: &str) -> ErrorCode {
        if !self.is_open() {
            return ErrorCode::CantOpen;
        }
        let mut stmt = self.prepare(sql);
        if !stmt.error_code().is_ok() {
            return stmt.error_code();
        }
        stmt.execute()
    }

    /// Runs every `;`-separated statement in `sql`.
    pub fn execute_batch(&self, sql: &str) -> ErrorCode {
        let Some(conn) = &self.conn else {
            return ErrorCode::CantOpen;
        };
        match conn.execute_batch(sql) {
            Ok(()) => ErrorCode::Ok,
            Err(err) => {
                warn!(%err, "batch failed");
                ErrorCode::from(&err)
            }
        }
    }

    /// Runs `sql` and hands each row to `on_row` as text cells alongside
    /// the column names. Returning `false` from `on_row` stops early.
    pub fn exec<F>(&self, sql: &str, mut on_row: F) -> ErrorCode
    where
        F: FnMut(&TextRow<'_>) -> bool,
    {
        let mut stmt = self.prepare(sql);
        if !stmt.is_ok() {
            return stmt.error_code();
        }
        let columns: Vec<String> = (0..stmt.column_count())
            .map(|index| stmt.column_name(index).unwrap_or_default())
            .collect();
        stmt.evaluate(|row| {
            let values = (0..columns.len())
                .map(|index| row.get::<Option<String>>(index).ok().flatten())
                .collect();
            on_row(&TextRow {
                columns: &columns,
                values,
            })
        })
    }

    /// Rowid of the most recent successful INSERT, or 0.
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn
            .as_ref()
            .map_or(0, rusqlite::Connection::last_insert_rowid)
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> u64 {
        self.handle().map_or(0, |db| {
            let changes = unsafe { ffi::sqlite3_changes(db.as_ptr()) };
            changes.max(0) as u64
        })
    }

    /// Names of the user tables, skipping the engine's own.
    pub fn list_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        let mut stmt = self.prepare(&format!(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '{RESERVED_PREFIX}%'"
        ));
        if stmt.is_ok() {
            while let Some(row) = stmt.evaluate_by_row() {
                if let Ok(name) = row.get::<String>(0) {
                    tables.push(name);
                }
            }
        }
        tables
    }

    /// The stored `CREATE` statement for `name`, or an empty string.
    pub fn describe_table(&self, name: &str) -> String {
        let mut stmt = self.prepare("SELECT sql FROM sqlite_master WHERE name LIKE ?");
        if !stmt.is_ok() || !stmt.bind(name).is_ok() {
            return String::new();
        }
        stmt.evaluate_by_row()
            .and_then(|row| row.get::<String>(0).ok())
            .unwrap_or_default()
    }

    /// Drops `name` if it exists.
    pub fn drop_table(&self, name: &str) -> ErrorCode {
        self.execute(&format!(
            "DROP TABLE IF EXISTS \"{}\"",
            name.replace('"', "\"\"")
        ))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.conn.is_some() {
            debug!(path = %self.path, "closing database");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("code", &self.code)
            .finish()
    }
}

/// A row delivered by [`Connection::exec`].
#[derive(Debug)]
pub struct TextRow<'a> {
    pub columns: &'a [String],
    /// One entry per column; `None` for NULL.
    pub values: Vec<Option<String>>,
}

impl TextRow<'_> {
    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.columns.iter().position(|column| column == name)?;
        self.values.get(index)?.as_deref()
    }
}

/// Installs `regexp(pattern, text)`, which backs `text REGEXP pattern`.
///
/// Patterns are compiled once per statement and cached on the argument.
fn register_regexp(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |value| -> Result<_, BoxError> {
                Ok(Regex::new(value.as_str()?)?)
            })?;
            let text = regexp_subject(ctx.get_raw(1))
                .map_err(rusqlite::Error::UserFunctionError)?;
            Ok(pattern.is_match(&text))
        },
    )
}

/// The text a `REGEXP` operand is matched as. Numbers use their decimal
/// form; blobs must hold UTF-8.
fn regexp_subject(value: ValueRef<'_>) -> Result<Cow<'_, str>, BoxError> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Ok(Cow::Borrowed(std::str::from_utf8(bytes)?))
        }
        ValueRef::Integer(n) => Ok(Cow::Owned(n.to_string())),
        ValueRef::Real(f) => Ok(Cow::Owned(f.to_string())),
        ValueRef::Null => Err("regexp() needs a non-NULL text argument".into()),
    }
}
