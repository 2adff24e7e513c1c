//! Result codes reported by the SQLite engine.
//!
//! Every fallible operation in this crate ends up as one of these variants.
//! Native integers never leave the crate.

use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_int;

use rusqlite::ffi;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Primary result codes, numbered exactly as the engine numbers them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    #[default]
    Ok = 0,
    Error = 1,
    Internal = 2,
    Perm = 3,
    Abort = 4,
    Busy = 5,
    Locked = 6,
    NoMem = 7,
    ReadOnly = 8,
    Interrupt = 9,
    IoErr = 10,
    Corrupt = 11,
    NotFound = 12,
    Full = 13,
    CantOpen = 14,
    Protocol = 15,
    Empty = 16,
    Schema = 17,
    TooBig = 18,
    Constraint = 19,
    Mismatch = 20,
    Misuse = 21,
    NoLfs = 22,
    Auth = 23,
    Format = 24,
    Range = 25,
    NotADb = 26,
    Notice = 27,
    Warning = 28,
    /// `step` produced a row and more may follow.
    Row = 100,
    /// `step` ran the statement to completion.
    Done = 101,
}

impl ErrorCode {
    /// Maps a native status, extended or primary, to its primary code.
    ///
    /// Values the engine does not define collapse to [`ErrorCode::Error`].
    pub fn from_native(code: c_int) -> Self {
        use ErrorCode::*;
        match code & 0xff {
            0 => Ok,
            1 => Error,
            2 => Internal,
            3 => Perm,
            4 => Abort,
            5 => Busy,
            6 => Locked,
            7 => NoMem,
            8 => ReadOnly,
            9 => Interrupt,
            10 => IoErr,
            11 => Corrupt,
            12 => NotFound,
            13 => Full,
            14 => CantOpen,
            15 => Protocol,
            16 => Empty,
            17 => Schema,
            18 => TooBig,
            19 => Constraint,
            20 => Mismatch,
            21 => Misuse,
            22 => NoLfs,
            23 => Auth,
            24 => Format,
            25 => Range,
            26 => NotADb,
            27 => Notice,
            28 => Warning,
            100 => Row,
            101 => Done,
            _ => Error,
        }
    }

    pub fn as_native(self) -> c_int {
        self as c_int
    }

    /// True only for [`ErrorCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    /// True for codes that report progress rather than failure.
    pub fn is_success(self) -> bool {
        matches!(self, ErrorCode::Ok | ErrorCode::Row | ErrorCode::Done)
    }

    /// The code a caller sees once an evaluation has finished: `Done`
    /// becomes `Ok`, everything else is unchanged.
    pub fn completed(self) -> Self {
        match self {
            ErrorCode::Done => ErrorCode::Ok,
            other => other,
        }
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Engine(self))
        }
    }

    /// The engine's own English description of the code.
    pub fn description(self) -> &'static str {
        // SAFETY: sqlite3_errstr returns a pointer to a static,
        // nul-terminated string for every input value.
        let text = unsafe { CStr::from_ptr(ffi::sqlite3_errstr(self.as_native())) };
        text.to_str().unwrap_or("unknown error")
    }

    fn name(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Ok => "SQLITE_OK",
            Error => "SQLITE_ERROR",
            Internal => "SQLITE_INTERNAL",
            Perm => "SQLITE_PERM",
            Abort => "SQLITE_ABORT",
            Busy => "SQLITE_BUSY",
            Locked => "SQLITE_LOCKED",
            NoMem => "SQLITE_NOMEM",
            ReadOnly => "SQLITE_READONLY",
            Interrupt => "SQLITE_INTERRUPT",
            IoErr => "SQLITE_IOERR",
            Corrupt => "SQLITE_CORRUPT",
            NotFound => "SQLITE_NOTFOUND",
            Full => "SQLITE_FULL",
            CantOpen => "SQLITE_CANTOPEN",
            Protocol => "SQLITE_PROTOCOL",
            Empty => "SQLITE_EMPTY",
            Schema => "SQLITE_SCHEMA",
            TooBig => "SQLITE_TOOBIG",
            Constraint => "SQLITE_CONSTRAINT",
            Mismatch => "SQLITE_MISMATCH",
            Misuse => "SQLITE_MISUSE",
            NoLfs => "SQLITE_NOLFS",
            Auth => "SQLITE_AUTH",
            Format => "SQLITE_FORMAT",
            Range => "SQLITE_RANGE",
            NotADb => "SQLITE_NOTADB",
            Notice => "SQLITE_NOTICE",
            Warning => "SQLITE_WARNING",
            Row => "SQLITE_ROW",
            Done => "SQLITE_DONE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

impl From<&rusqlite::Error> for ErrorCode {
    fn from(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, _) => {
                ErrorCode::from_native(failure.extended_code)
            }
            rusqlite::Error::InvalidPath(_) => ErrorCode::CantOpen,
            rusqlite::Error::NulError(_) => ErrorCode::Misuse,
            rusqlite::Error::InvalidParameterName(_) => ErrorCode::NotFound,
            rusqlite::Error::InvalidParameterCount(..) => ErrorCode::Range,
            _ => ErrorCode::Error,
        }
    }
}
