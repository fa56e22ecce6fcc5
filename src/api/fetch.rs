//! Purpose: Fetch and decode one page of rows at a time.
//! Exports: `PageFetcher`, `FetchCursor`, `Page`.
//! Role: Shared fetch contract under `RowIterator` and `RowCache`.
//! Invariants: A continuation token always wins over the start offset.
//! Invariants: Once the row budget is spent no request is issued.
//! Invariants: A page decodes completely or fails as a whole.
use std::sync::Arc;

use tracing::debug;

use super::service::{ApiResult, ListRowsRequest, TableService};
use crate::core::error::{Error, ErrorKind};
use crate::core::row::{Row, decode_row};
use crate::core::schema::Schema;
use crate::core::table_ref::TableReference;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next_token: Option<String>,
}

impl Page {
    fn empty() -> Self {
        Self::default()
    }
}

/// Token and running count threaded between fetches by the caller.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchCursor {
    pub token: Option<String>,
    pub count: u64,
    pub done: bool,
}

impl FetchCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct PageFetcher {
    service: Arc<dyn TableService>,
    table: TableReference,
    schema: Arc<Schema>,
    start: u64,
    page_size: usize,
    max_rows: Option<u64>,
}

impl PageFetcher {
    pub fn new(
        service: Arc<dyn TableService>,
        table: TableReference,
        schema: Arc<Schema>,
        start: u64,
        page_size: usize,
        max_rows: Option<u64>,
    ) -> ApiResult<Self> {
        if page_size == 0 {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("page size must be at least 1")
                .with_table(table.full_name()));
        }
        Ok(Self {
            service,
            table,
            schema,
            start,
            page_size,
            max_rows,
        })
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }

    /// Fetch the page after `count` rows, continuing from `token` when present.
    pub fn fetch(&self, token: Option<&str>, count: u64) -> ApiResult<Page> {
        let max_results = match self.max_rows {
            Some(max) if count >= max => return Ok(Page::empty()),
            Some(max) => usize::try_from(max - count)
                .unwrap_or(usize::MAX)
                .min(self.page_size),
            None => self.page_size,
        };

        let request = match token {
            Some(token) => ListRowsRequest {
                page_token: Some(token.to_string()),
                start_index: None,
                max_results,
            },
            None => ListRowsRequest {
                page_token: None,
                start_index: Some(self.start + count),
                max_results,
            },
        };
        debug!(
            table = %self.table,
            start = ?request.start_index,
            has_token = request.page_token.is_some(),
            max_results,
            "fetching page"
        );
        let response = self
            .service
            .list_rows(&self.table, &request)
            .map_err(|err| err.with_table(self.table.full_name()))?;

        let first = self.start + count;
        let rows = response
            .rows
            .iter()
            .enumerate()
            .map(|(offset, raw)| decode_row(&self.schema, raw, first + offset as u64))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| err.with_table(self.table.full_name()))?;

        Ok(Page {
            rows,
            next_token: response.page_token,
        })
    }

    /// Advance `cursor` by one page; `None` once the stream is exhausted.
    pub fn next_page(&self, cursor: &mut FetchCursor) -> ApiResult<Option<Page>> {
        if cursor.done {
            return Ok(None);
        }
        let page = self.fetch(cursor.token.as_deref(), cursor.count)?;
        cursor.count += page.rows.len() as u64;
        cursor.token = page.next_token.clone();
        cursor.done = cursor.token.is_none();
        Ok(Some(page))
    }
}
