use std::str::Utf8Error;

use thiserror::Error;

use crate::code::ErrorCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced through `Result`.
///
/// Engine statuses are normally stored on the `Connection` or `Statement`
/// and returned as [`ErrorCode`]; this type covers value extraction and
/// callers who want to lift a stored code into `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite: {0}")]
    Engine(ErrorCode),

    #[error("column {index} was read after its statement moved past the row")]
    StaleColumn { index: usize },

    #[error("column index {index} out of range for a row of {count} columns")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("column {index} does not hold valid UTF-8 text")]
    InvalidUtf8 {
        index: usize,
        #[source]
        source: Utf8Error,
    },
}

impl Error {
    /// The engine code this error corresponds to, for callers that only
    /// deal in [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Engine(code) => *code,
            Error::StaleColumn { .. } => ErrorCode::Misuse,
            Error::ColumnOutOfRange { .. } => ErrorCode::Range,
            Error::Unsupported(_) => ErrorCode::Error,
            Error::InvalidUtf8 { .. } => ErrorCode::Mismatch,
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Engine(code)
    }
}
