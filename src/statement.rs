//! Prepared statements and their step lifecycle.
//!
//! A [`Statement`] moves through three states:
//!
//! - `Fresh`: compiled or just reset; parameters may be bound.
//! - `Evaluating`: at least one row has been fetched since the last reset.
//! - `Exhausted`: a step reported no more rows or an error, or an
//!   evaluation was stopped early.
//!
//! Leaving `Exhausted` is lazy. The next `step`, `execute` or bind first
//! resets the cursor and restarts positional binding at 1. Bound values
//! survive the reset; call [`Statement::clear_bindings`] to drop them.

use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use rusqlite::ffi;
use tracing::{debug, warn};

use crate::code::ErrorCode;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::{Param, Params, Value};

/// Where a statement is in its step lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Fresh,
    Evaluating,
    Exhausted,
}

/// Reads `sqlite3_errmsg` for a database handle.
///
/// # Safety
///
/// `db` must be a live connection handle.
pub(crate) unsafe fn engine_message(db: *mut ffi::sqlite3) -> String {
    let message = ffi::sqlite3_errmsg(db);
    if message.is_null() {
        return String::new();
    }
    CStr::from_ptr(message).to_string_lossy().into_owned()
}

/// Owner of one compiled plan. Shared between a [`Statement`] and the rows
/// and columns it hands out; the plan is finalized when the last holder
/// drops.
pub(crate) struct RawStatement<'conn> {
    ptr: NonNull<ffi::sqlite3_stmt>,
    /// Bumped on every step and reset so views can tell whether the row
    /// they were produced from is still the current one.
    generation: Cell<u64>,
    _conn: PhantomData<&'conn Connection>,
}

impl<'conn> RawStatement<'conn> {
    fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.ptr.as_ptr()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn advance(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
    }

    fn step(&self) -> ErrorCode {
        self.advance();
        ErrorCode::from_native(unsafe { ffi::sqlite3_step(self.as_ptr()) })
    }

    fn reset(&self) {
        self.advance();
        // The return value repeats the last step's failure, which the
        // statement has already recorded.
        unsafe { ffi::sqlite3_reset(self.as_ptr()) };
    }

    fn clear_bindings(&self) -> ErrorCode {
        ErrorCode::from_native(unsafe { ffi::sqlite3_clear_bindings(self.as_ptr()) })
    }

    fn bind(&self, index: c_int, value: &Value) -> ErrorCode {
        let stmt = self.as_ptr();
        let rc = unsafe {
            match value {
                Value::Null => ffi::sqlite3_bind_null(stmt, index),
                Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),
                Value::Int64(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
                Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
                Value::Text(text) => match c_int::try_from(text.len()) {
                    Ok(len) => ffi::sqlite3_bind_text(
                        stmt,
                        index,
                        text.as_ptr().cast::<c_char>(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    Err(_) => ffi::SQLITE_TOOBIG,
                },
                Value::Blob(bytes) => match c_int::try_from(bytes.len()) {
                    Ok(len) => ffi::sqlite3_bind_blob(
                        stmt,
                        index,
                        bytes.as_ptr().cast(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    Err(_) => ffi::SQLITE_TOOBIG,
                },
            }
        };
        ErrorCode::from_native(rc)
    }

    fn parameter_index(&self, name: &str) -> Option<c_int> {
        let name = CString::new(name).ok()?;
        match unsafe { ffi::sqlite3_bind_parameter_index(self.as_ptr(), name.as_ptr()) } {
            0 => None,
            index => Some(index),
        }
    }

    fn parameter_count(&self) -> usize {
        unsafe { ffi::sqlite3_bind_parameter_count(self.as_ptr()) }.max(0) as usize
    }

    pub(crate) fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.as_ptr()) }.max(0) as usize
    }

    /// Arity of the current row; zero when no row is current.
    pub(crate) fn data_count(&self) -> usize {
        unsafe { ffi::sqlite3_data_count(self.as_ptr()) }.max(0) as usize
    }

    pub(crate) fn column_name(&self, index: usize) -> Option<String> {
        let index = c_int::try_from(index).ok()?;
        let name = unsafe { ffi::sqlite3_column_name(self.as_ptr(), index) };
        if name.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }

    // Column readers below expect an index already checked against
    // `data_count`.

    pub(crate) fn column_type(&self, index: usize) -> c_int {
        unsafe { ffi::sqlite3_column_type(self.as_ptr(), index as c_int) }
    }

    pub(crate) fn column_double(&self, index: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.as_ptr(), index as c_int) }
    }

    pub(crate) fn column_int(&self, index: usize) -> i32 {
        unsafe { ffi::sqlite3_column_int(self.as_ptr(), index as c_int) }
    }

    pub(crate) fn column_int64(&self, index: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.as_ptr(), index as c_int) }
    }

    pub(crate) fn column_text(&self, index: usize) -> Vec<u8> {
        let data = unsafe { ffi::sqlite3_column_text(self.as_ptr(), index as c_int) };
        self.copy_column(index, data.cast())
    }

    pub(crate) fn column_blob(&self, index: usize) -> Vec<u8> {
        let data = unsafe { ffi::sqlite3_column_blob(self.as_ptr(), index as c_int) };
        self.copy_column(index, data.cast())
    }

    // The byte count must be read after the text/blob accessor, which may
    // convert the cell in place.
    fn copy_column(&self, index: usize, data: *const u8) -> Vec<u8> {
        let len = unsafe { ffi::sqlite3_column_bytes(self.as_ptr(), index as c_int) };
        if data.is_null() || len <= 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec()
    }

    fn sql(&self) -> Option<String> {
        let sql = unsafe { ffi::sqlite3_sql(self.as_ptr()) };
        if sql.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(sql) }.to_string_lossy().into_owned())
    }

    fn message(&self) -> String {
        unsafe { engine_message(ffi::sqlite3_db_handle(self.as_ptr())) }
    }
}

impl Drop for RawStatement<'_> {
    fn drop(&mut self) {
        debug!(sql = ?self.sql(), "finalizing statement");
        unsafe { ffi::sqlite3_finalize(self.as_ptr()) };
    }
}

/// One compiled SQL statement.
///
/// Statements never panic or return `Err` for engine failures. Each
/// operation records its [`ErrorCode`], readable through
/// [`Statement::error_code`]. A statement that failed to compile, or was
/// prepared on a connection that is not open, holds no plan and treats
/// every later operation as a no-op.
pub struct Statement<'conn> {
    raw: Option<Rc<RawStatement<'conn>>>,
    code: ErrorCode,
    next_index: c_int,
    state: StepState,
    message: Option<String>,
}

impl<'conn> Statement<'conn> {
    /// Compiles the first statement in `sql`.
    ///
    /// # Safety
    ///
    /// `db` must stay open for all of `'conn`.
    pub(crate) unsafe fn compile(db: NonNull<ffi::sqlite3>, sql: &str) -> Self {
        let Ok(len) = c_int::try_from(sql.len()) else {
            return Self::without_plan(ErrorCode::TooBig, None);
        };
        let mut stmt = ptr::null_mut();
        let rc = ffi::sqlite3_prepare_v2(
            db.as_ptr(),
            sql.as_ptr().cast::<c_char>(),
            len,
            &mut stmt,
            ptr::null_mut(),
        );
        let code = ErrorCode::from_native(rc);
        if !code.is_ok() {
            let message = engine_message(db.as_ptr());
            warn!(%code, %message, sql, "failed to prepare statement");
            if !stmt.is_null() {
                ffi::sqlite3_finalize(stmt);
            }
            return Self::without_plan(code, Some(message));
        }
        match NonNull::new(stmt) {
            Some(ptr) => {
                debug!(sql, "prepared statement");
                Self {
                    raw: Some(Rc::new(RawStatement {
                        ptr,
                        generation: Cell::new(0),
                        _conn: PhantomData,
                    })),
                    code,
                    next_index: 1,
                    state: StepState::Fresh,
                    message: None,
                }
            }
            // Whitespace or comments only: nothing to run.
            None => Self::without_plan(ErrorCode::Ok, None),
        }
    }

    pub(crate) fn without_plan(code: ErrorCode, message: Option<String>) -> Self {
        Self {
            raw: None,
            code,
            next_index: 1,
            state: StepState::Exhausted,
            message,
        }
    }

    /// Code recorded by the last operation.
    pub fn error_code(&self) -> ErrorCode {
        self.code
    }

    /// True while no failure has been recorded.
    pub fn is_ok(&self) -> bool {
        matches!(self.code, ErrorCode::Ok | ErrorCode::Row)
    }

    /// Lifts the recorded code into a `Result`.
    pub fn check(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Engine(self.code))
        }
    }

    /// True when the statement holds a compiled plan.
    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Slot the next [`Param::Next`] bind will write to.
    pub fn next_index(&self) -> i32 {
        self.next_index
    }

    pub fn error_message(&self) -> String {
        match (&self.raw, &self.message) {
            (_, Some(message)) => message.clone(),
            (Some(raw), None) => raw.message(),
            (None, None) => self.code.description().to_string(),
        }
    }

    pub fn sql(&self) -> Option<String> {
        self.raw.as_ref().and_then(|raw| raw.sql())
    }

    pub fn parameter_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.parameter_count())
    }

    /// Resolves a `:name`, `@name` or `$name` marker to its position.
    pub fn parameter_index(&self, name: &str) -> Option<i32> {
        self.raw.as_ref().and_then(|raw| raw.parameter_index(name))
    }

    pub fn column_count(&self) -> usize {
        self.raw.as_ref().map_or(0, |raw| raw.column_count())
    }

    pub fn column_name(&self, index: usize) -> Option<String> {
        self.raw.as_ref().and_then(|raw| raw.column_name(index))
    }

    /// Binds into the next auto-incrementing slot.
    pub fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.bind_param(Param::Next, value)
    }

    /// Binds into an explicit 1-based slot.
    pub fn bind_at(&mut self, index: i32, value: impl Into<Value>) -> &mut Self {
        self.bind_param(Param::Index(index), value)
    }

    /// Binds to a named marker. An unknown name records `NotFound` and
    /// leaves every slot untouched.
    pub fn bind_named(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.bind_param(Param::Name(name), value)
    }

    pub fn bind_null(&mut self) -> &mut Self {
        self.bind_param(Param::Next, Value::Null)
    }

    pub fn bind_param(&mut self, param: Param<'_>, value: impl Into<Value>) -> &mut Self {
        let Some(raw) = self.raw.clone() else {
            return self;
        };
        if self.state == StepState::Exhausted {
            self.rewind(&raw);
        }
        let index = match param {
            Param::Next => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
            Param::Index(index) => index,
            Param::Name(name) => match raw.parameter_index(name) {
                Some(index) => index,
                None => {
                    warn!(name, "named parameter not found");
                    self.code = ErrorCode::NotFound;
                    return self;
                }
            },
        };
        self.code = raw.bind(index, &value.into());
        self
    }

    /// Binds every entry of `params` by name, stopping at the first
    /// failure.
    pub fn bind_params(&mut self, params: &Params) -> &mut Self {
        for (name, value) in params.iter() {
            self.bind_named(name, value.clone());
            if !self.is_ok() {
                break;
            }
        }
        self
    }

    /// Returns to `Fresh`: the cursor is rewound and positional binding
    /// restarts at 1. Bound values are kept.
    pub fn reset(&mut self) -> &mut Self {
        if let Some(raw) = self.raw.clone() {
            self.rewind(&raw);
        }
        self
    }

    /// Sets every parameter back to NULL and restarts positional binding.
    pub fn clear_bindings(&mut self) -> &mut Self {
        if let Some(raw) = self.raw.clone() {
            if self.state == StepState::Exhausted {
                self.rewind(&raw);
            }
            self.code = raw.clear_bindings();
            self.next_index = 1;
        }
        self
    }

    fn rewind(&mut self, raw: &RawStatement<'conn>) {
        raw.reset();
        self.next_index = 1;
        self.state = StepState::Fresh;
    }

    /// Fetches the next row.
    ///
    /// An exhausted statement is rewound first, so stepping again starts a
    /// fresh pass with whatever values are currently bound. `None` means
    /// the pass is over; the error code tells whether it ended cleanly
    /// (`Ok`) or not.
    pub fn step(&mut self) -> Option<Row<'conn>> {
        let Some(raw) = self.raw.clone() else {
            self.state = StepState::Exhausted;
            return None;
        };
        if self.state == StepState::Exhausted {
            self.rewind(&raw);
        }
        match raw.step() {
            ErrorCode::Row => {
                self.code = ErrorCode::Row;
                self.state = StepState::Evaluating;
                Some(Row::new(raw))
            }
            code => {
                self.code = code.completed();
                self.state = StepState::Exhausted;
                None
            }
        }
    }

    pub fn evaluate_by_row(&mut self) -> Option<Row<'conn>> {
        self.step()
    }

    /// Steps until the rows run out or `on_row` returns `false`.
    ///
    /// Stopping early ends the engine's pass, dropping any pending rows and
    /// the locks held for them, and leaves the statement `Exhausted` with
    /// code `Ok`.
    pub fn evaluate<F>(&mut self, mut on_row: F) -> ErrorCode
    where
        F: FnMut(&Row<'conn>) -> bool,
    {
        while let Some(row) = self.step() {
            if !on_row(&row) {
                if let Some(raw) = &self.raw {
                    raw.reset();
                }
                self.code = ErrorCode::Ok;
                self.state = StepState::Exhausted;
                break;
            }
        }
        self.code
    }

    /// Runs exactly one step, for statements that produce no rows, then
    /// rewinds regardless of the outcome.
    pub fn execute(&mut self) -> ErrorCode {
        let Some(raw) = self.raw.clone() else {
            return self.code;
        };
        if self.state != StepState::Fresh {
            self.rewind(&raw);
        }
        self.code = raw.step().completed();
        self.rewind(&raw);
        self.code
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("code", &self.code)
            .field("state", &self.state)
            .field("next_index", &self.next_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Connection;

    fn numbers() -> Connection {
        let conn = Connection::open_in_memory();
        assert_eq!(
            conn.execute_batch(
                "CREATE TABLE numbers (id INTEGER PRIMARY KEY, n INTEGER);
                 INSERT INTO numbers (n) VALUES (10), (20), (30);"
            ),
            ErrorCode::Ok
        );
        conn
    }

    #[test]
    fn fresh_statement_starts_at_first_slot() {
        let conn = numbers();
        let stmt = conn.prepare("SELECT n FROM numbers WHERE n > ?");
        assert!(stmt.is_valid());
        assert_eq!(stmt.state(), StepState::Fresh);
        assert_eq!(stmt.next_index(), 1);
        assert_eq!(stmt.parameter_count(), 1);
        assert_eq!(stmt.column_count(), 1);
        assert_eq!(stmt.column_name(0).as_deref(), Some("n"));
    }

    #[test]
    fn step_walks_through_states() {
        let conn = numbers();
        let mut stmt = conn.prepare("SELECT n FROM numbers ORDER BY n");

        let row = stmt.step().expect("first row");
        assert_eq!(row.get::<i64>(0).unwrap(), 10);
        assert_eq!(stmt.state(), StepState::Evaluating);
        assert_eq!(stmt.error_code(), ErrorCode::Row);
        assert!(stmt.is_ok());

        assert!(stmt.step().is_some());
        assert!(stmt.step().is_some());
        assert!(stmt.step().is_none());
        assert_eq!(stmt.state(), StepState::Exhausted);
        assert_eq!(stmt.error_code(), ErrorCode::Ok);
    }

    #[test]
    fn positional_counter_advances_per_bind() {
        let conn = numbers();
        let mut stmt = conn.prepare("SELECT ? + ?");
        stmt.bind(1).bind(2);
        assert_eq!(stmt.next_index(), 3);
        assert!(stmt.is_ok());
    }

    #[test]
    fn binding_past_the_last_slot_is_a_range_error() {
        let conn = numbers();
        let mut stmt = conn.prepare("SELECT ?");
        stmt.bind(1).bind(2);
        assert_eq!(stmt.error_code(), ErrorCode::Range);
    }

    #[test]
    fn early_stop_forces_exhausted() {
        let conn = numbers();
        let mut stmt = conn.prepare("SELECT n FROM numbers ORDER BY n");
        let mut seen = Vec::new();
        let code = stmt.evaluate(|row| {
            seen.push(row.get::<i64>(0).unwrap());
            false
        });
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(seen, vec![10]);
        assert_eq!(stmt.state(), StepState::Exhausted);

        // The next pass starts from the first row again.
        let row = stmt.step().expect("row after restart");
        assert_eq!(row.get::<i64>(0).unwrap(), 10);
    }

    #[test]
    fn clear_bindings_nulls_parameters() {
        let conn = numbers();
        let mut stmt = conn.prepare("SELECT ?");
        stmt.bind(5);
        stmt.clear_bindings();
        assert_eq!(stmt.next_index(), 1);
        let row = stmt.step().unwrap();
        assert_eq!(row.get::<Option<i64>>(0).unwrap(), None);
    }

    #[test]
    fn empty_sql_has_no_plan_but_is_ok() {
        let conn = numbers();
        let mut stmt = conn.prepare("   -- nothing here\n");
        assert!(!stmt.is_valid());
        assert_eq!(stmt.error_code(), ErrorCode::Ok);
        assert!(stmt.step().is_none());
        assert_eq!(stmt.execute(), ErrorCode::Ok);
    }

    #[test]
    fn compile_failures_keep_the_engine_message() {
        let conn = numbers();
        let stmt = conn.prepare("SELEKT 1");
        assert_eq!(stmt.error_code(), ErrorCode::Error);
        assert!(stmt.error_message().contains("syntax error"));
        assert!(stmt.check().is_err());
    }

    #[test]
    fn debug_output_shows_sql() {
        let conn = numbers();
        let stmt = conn.prepare("SELECT 1");
        assert!(format!("{stmt:?}").contains("SELECT 1"));
    }
}
