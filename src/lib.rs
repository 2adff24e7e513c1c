//! Prepared-statement access to embedded SQLite databases.
//!
//! # Intention
//!
//! - Provide a small, synchronous API for running SQL against a local
//!   SQLite database: prepare, bind, step, read typed columns.
//! - Report engine failures as [`ErrorCode`] values stored on the
//!   connection or statement instead of panicking or unwinding.
//!
//! # Architectural Boundaries
//!
//! - Only statement lifecycle, value binding and row access belong here.
//! - Query planning, file I/O and locking stay inside the engine.
//! - No pooling, async or network access.
//!
//! # Example
//!
//! ```
//! use sqlite_access::{Connection, ErrorCode};
//!
//! let conn = Connection::open_in_memory();
//! assert_eq!(conn.execute("CREATE TABLE t (x INTEGER)"), ErrorCode::Ok);
//!
//! let mut insert = conn.prepare("INSERT INTO t (x) VALUES (?)");
//! assert_eq!(insert.bind(7i64).execute(), ErrorCode::Ok);
//!
//! let mut select = conn.prepare("SELECT x FROM t");
//! let row = select.step().unwrap();
//! assert_eq!(row.get::<i64>(0).unwrap(), 7);
//! ```

pub mod code;
pub mod config;
pub mod connection;
pub mod error;
pub mod row;
pub mod statement;
pub mod value;

pub use code::ErrorCode;
pub use config::{Config, IN_MEMORY};
pub use connection::{Connection, TextRow};
pub use error::{Error, Result};
pub use row::{Column, ColumnType, FromColumn, Row};
pub use statement::{Statement, StepState};
pub use value::{Param, Params, Value};
