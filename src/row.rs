//! Views over the row a statement has just fetched.
//!
//! Rows and columns hold a counted reference to the compiled plan, so they
//! stay safe to use after the `Statement` that produced them is dropped.
//! They are only *current* until that plan is stepped or reset again;
//! reads after that report [`Error::StaleColumn`].

use std::fmt;
use std::rc::Rc;

use rusqlite::ffi;

use crate::error::{Error, Result};
use crate::statement::RawStatement;

/// Storage class of a cell in the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    fn from_native(kind: i32) -> Self {
        match kind {
            ffi::SQLITE_INTEGER => ColumnType::Integer,
            ffi::SQLITE_FLOAT => ColumnType::Float,
            ffi::SQLITE_TEXT => ColumnType::Text,
            ffi::SQLITE_BLOB => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }
}

/// The row a statement fetched on its latest successful step.
pub struct Row<'conn> {
    stmt: Rc<RawStatement<'conn>>,
    generation: u64,
}

impl<'conn> Row<'conn> {
    pub(crate) fn new(stmt: Rc<RawStatement<'conn>>) -> Self {
        let generation = stmt.generation();
        Self { stmt, generation }
    }

    /// False once the statement has been stepped or reset past this row.
    pub fn is_current(&self) -> bool {
        self.generation == self.stmt.generation()
    }

    pub fn column_count(&self) -> usize {
        if self.is_current() {
            self.stmt.data_count()
        } else {
            0
        }
    }

    /// A view of the cell at the 0-based `index`.
    pub fn column(&self, index: usize) -> Column<'conn> {
        Column {
            stmt: Rc::clone(&self.stmt),
            index,
            generation: self.generation,
        }
    }

    /// Reads the cell at `index` as `T`.
    pub fn get<T: FromColumn>(&self, index: usize) -> Result<T> {
        self.column(index).get()
    }
}

impl fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("current", &self.is_current())
            .field("columns", &self.column_count())
            .finish()
    }
}

/// A single cell of a [`Row`].
pub struct Column<'conn> {
    stmt: Rc<RawStatement<'conn>>,
    index: usize,
    generation: u64,
}

impl<'conn> Column<'conn> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// True while the row is current and the index lies inside it.
    pub fn is_valid(&self) -> bool {
        self.checked().is_ok()
    }

    fn checked(&self) -> Result<&RawStatement<'conn>> {
        if self.generation != self.stmt.generation() {
            return Err(Error::StaleColumn { index: self.index });
        }
        let count = self.stmt.data_count();
        if self.index >= count {
            return Err(Error::ColumnOutOfRange {
                index: self.index,
                count,
            });
        }
        Ok(&*self.stmt)
    }

    /// Declared or derived column name; readable even when stale.
    pub fn name(&self) -> Option<String> {
        self.stmt.column_name(self.index)
    }

    pub fn kind(&self) -> Result<ColumnType> {
        let stmt = self.checked()?;
        Ok(ColumnType::from_native(stmt.column_type(self.index)))
    }

    pub fn is_null(&self) -> Result<bool> {
        Ok(self.kind()? == ColumnType::Null)
    }

    pub fn as_double(&self) -> Result<f64> {
        Ok(self.checked()?.column_double(self.index))
    }

    pub fn as_int(&self) -> Result<i32> {
        Ok(self.checked()?.column_int(self.index))
    }

    pub fn as_int64(&self) -> Result<i64> {
        Ok(self.checked()?.column_int64(self.index))
    }

    /// The cell as UTF-8 text. NULL reads as an empty string.
    pub fn as_text(&self) -> Result<String> {
        let bytes = self.checked()?.column_text(self.index);
        String::from_utf8(bytes).map_err(|err| Error::InvalidUtf8 {
            index: self.index,
            source: err.utf8_error(),
        })
    }

    pub fn as_blob(&self) -> Result<Vec<u8>> {
        Ok(self.checked()?.column_blob(self.index))
    }

    /// Wide-character text is never produced; always fails with
    /// [`Error::Unsupported`].
    pub fn as_wide_text(&self) -> Result<Vec<u16>> {
        self.checked()?;
        Err(Error::Unsupported("wide-character text extraction"))
    }

    pub fn get<T: FromColumn>(&self) -> Result<T> {
        T::from_column(self)
    }
}

impl fmt::Debug for Column<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("index", &self.index)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Types a [`Column`] can be read as.
pub trait FromColumn: Sized {
    fn from_column(column: &Column<'_>) -> Result<Self>;
}

impl FromColumn for f64 {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        column.as_double()
    }
}

impl FromColumn for i32 {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        column.as_int()
    }
}

impl FromColumn for i64 {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        column.as_int64()
    }
}

impl FromColumn for String {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        column.as_text()
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        column.as_blob()
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    fn from_column(column: &Column<'_>) -> Result<Self> {
        if column.is_null()? {
            Ok(None)
        } else {
            T::from_column(column).map(Some)
        }
    }
}
