//! Purpose: Random access to table rows through a single cached page.
//! Exports: `RowCache`.
//! Role: Caller-owned cache for index and slice lookups on a `Table`.
//! Invariants: At most one page is resident; a miss replaces it wholesale.
//! Invariants: Cached pages start on multiples of the page size.
//! Notes: Slices are repeated scalar lookups and cost O(n) requests in the worst case.
use tracing::debug;

use super::service::ApiResult;
use super::table::Table;
use crate::core::error::{Error, ErrorKind};
use crate::core::row::Row;

#[derive(Clone, Debug, Default)]
pub struct RowCache {
    page_size: Option<usize>,
    start: u64,
    page: Vec<Row>,
    table: Option<String>,
}

impl RowCache {
    /// Cache using the table's configured page size.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size.max(1)),
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.page.clear();
        self.table = None;
    }

    /// Offset and length of the resident page.
    pub fn resident(&self) -> Option<(u64, usize)> {
        (!self.page.is_empty()).then_some((self.start, self.page.len()))
    }

    fn contains(&self, table: &Table, index: u64) -> bool {
        self.table.as_deref() == Some(table.full_name().as_str())
            && self.start <= index
            && index < self.start + self.page.len() as u64
    }

    pub fn get(&mut self, table: &Table, index: i64) -> ApiResult<Row> {
        let position = table.resolve_index(index)?;
        let length = table.length()?;
        if let Some(length) = length {
            if position >= length {
                return Err(out_of_range(table, index));
            }
        }

        if !self.contains(table, position) {
            let page_size = self.page_size.unwrap_or(table.config().page_size) as u64;
            let first = (position / page_size) * page_size;
            let count = match length {
                Some(length) => page_size.min(length - first),
                None => page_size,
            };
            debug!(table = %table.reference(), first, count, "refilling row cache");
            let fetcher = table.fetcher(first as i64, Some(count), Some(count as usize))?;
            let page = fetcher.fetch(None, 0)?;
            self.start = first;
            self.page = page.rows;
            self.table = Some(table.full_name());
        }

        let offset = (position - self.start) as usize;
        self.page
            .get(offset)
            .cloned()
            .ok_or_else(|| out_of_range(table, index))
    }

    /// Rows at `start`, `start + step`, ... while below `stop`.
    pub fn slice(&mut self, table: &Table, start: i64, stop: i64, step: usize) -> ApiResult<Vec<Row>> {
        if step == 0 {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("slice step must be positive")
                .with_table(table.full_name()));
        }
        let mut rows = Vec::new();
        let mut index = start;
        while index < stop {
            rows.push(self.get(table, index)?);
            index = index.saturating_add(step as i64);
        }
        Ok(rows)
    }
}

fn out_of_range(table: &Table, index: i64) -> Error {
    Error::new(ErrorKind::IndexOutOfRange)
        .with_message("row index is beyond the end of the table")
        .with_table(table.full_name())
        .with_index(index)
}
