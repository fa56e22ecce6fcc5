// Forward-only row stream driven page by page by a `PageFetcher`.
use std::collections::VecDeque;

use super::fetch::{FetchCursor, PageFetcher};
use crate::core::error::Error;
use crate::core::row::Row;

/// Lazy row sequence; network calls happen only when the buffered page runs dry.
///
/// A failed fetch is yielded once as `Err` after every row of the previous page,
/// then the iterator is exhausted.
pub struct RowIterator {
    fetcher: PageFetcher,
    cursor: FetchCursor,
    buffer: VecDeque<Row>,
    finished: bool,
}

impl RowIterator {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            fetcher,
            cursor: FetchCursor::new(),
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    /// A fresh iterator over the same range; nothing is shared with `self`.
    pub fn restart(&self) -> Self {
        Self::new(self.fetcher.clone())
    }

    /// Rows fetched from the service so far (buffered rows included).
    pub fn fetched(&self) -> u64 {
        self.cursor.count
    }
}

impl Iterator for RowIterator {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }
            match self.fetcher.next_page(&mut self.cursor) {
                Ok(Some(page)) => self.buffer.extend(page.rows),
                Ok(None) => self.finished = true,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
