// Policy values for paging, insert batching, and view resolution.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_PAGE_SIZE: usize = 1024;
pub const DEFAULT_MAX_ROWS_PER_INSERT: usize = 500;
pub const DEFAULT_MAX_BYTES_PER_INSERT: usize = 1_000_000;
pub const DEFAULT_MAX_BYTES_PER_ROW: usize = 20_000;
pub const DEFAULT_INSERT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_SNAPSHOT_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
pub const DEFAULT_INDEX_NAME: &str = "Index";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableConfig {
    /// Rows requested per page fetch.
    pub page_size: usize,
    /// Row ceiling per insert request.
    pub max_rows_per_insert: usize,
    /// Encoded byte ceiling per insert request.
    pub max_bytes_per_insert: usize,
    /// Encoded byte ceiling for a single row.
    pub max_bytes_per_row: usize,
    /// Fixed pause after each flushed insert request.
    pub insert_interval: Duration,
    /// How far back snapshot and window decorations may reach.
    pub max_snapshot_age: Duration,
    /// Column name used when an index column is requested without a name.
    pub default_index_name: String,
}

impl TableConfig {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_rows_per_insert: DEFAULT_MAX_ROWS_PER_INSERT,
            max_bytes_per_insert: DEFAULT_MAX_BYTES_PER_INSERT,
            max_bytes_per_row: DEFAULT_MAX_BYTES_PER_ROW,
            insert_interval: DEFAULT_INSERT_INTERVAL,
            max_snapshot_age: DEFAULT_MAX_SNAPSHOT_AGE,
            default_index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_rows_per_insert(mut self, rows: usize) -> Self {
        self.max_rows_per_insert = rows;
        self
    }

    pub fn with_max_bytes_per_insert(mut self, bytes: usize) -> Self {
        self.max_bytes_per_insert = bytes;
        self
    }

    pub fn with_max_bytes_per_row(mut self, bytes: usize) -> Self {
        self.max_bytes_per_row = bytes;
        self
    }

    pub fn with_insert_interval(mut self, interval: Duration) -> Self {
        self.insert_interval = interval;
        self
    }

    pub fn with_max_snapshot_age(mut self, age: Duration) -> Self {
        self.max_snapshot_age = age;
        self
    }

    pub fn with_default_index_name(mut self, name: impl Into<String>) -> Self {
        self.default_index_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.page_size == 0 {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("page_size must be at least 1")
                .with_field("page_size"));
        }
        if self.max_rows_per_insert == 0 {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("max_rows_per_insert must be at least 1")
                .with_field("max_rows_per_insert"));
        }
        if self.max_bytes_per_row > self.max_bytes_per_insert {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("max_bytes_per_row must not exceed max_bytes_per_insert")
                .with_field("max_bytes_per_row"));
        }
        if self.default_index_name.is_empty() {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("default_index_name must not be empty")
                .with_field("default_index_name"));
        }
        Ok(())
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new()
    }
}
