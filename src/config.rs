use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

/// Path literal the engine reserves for a transient in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// How a [`Connection`](crate::Connection) opens its database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem path, or [`IN_MEMORY`].
    pub path: String,
    pub read_only: bool,
    /// Create the database file when it does not exist. Ignored when
    /// `read_only` is set.
    pub create: bool,
    /// Register the `regexp` SQL function after opening.
    pub register_regexp: bool,
    /// Retry locked operations for this long before reporting BUSY.
    pub busy_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: IN_MEMORY.to_string(),
            read_only: false,
            create: true,
            register_regexp: true,
            busy_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn register_regexp(mut self, register: bool) -> Self {
        self.register_regexp = register;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub(crate) fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }
}
