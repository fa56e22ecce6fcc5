//! Purpose: Define the public Rust API boundary for table access.
//! Exports: Table handles, row streaming, caching, inserts, exports, and transports.
//! Role: Public, additive-only surface used by the CLI and tests.
//! Invariants: This module is the only public path to the service seam and its types.
//! Invariants: Transports stay behind `TableService`; callers never see wire envelopes.

mod cache;
mod export;
mod fetch;
mod insert;
mod memory;
mod remote;
mod rows;
mod service;
mod table;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::config::TableConfig;
pub use crate::core::error::{Error, ErrorKind, InsertFailure};
pub use crate::core::row::{Row, Value};
pub use crate::core::schema::{FieldMode, FieldType, FlatField, Schema, SchemaField};
pub use crate::core::table_ref::{Decoration, TableReference};
pub use crate::core::view::{PointInTime, ViewResolver};
pub use cache::RowCache;
pub use export::{CsvOptions, write_csv, write_csv_file};
pub use fetch::{FetchCursor, Page, PageFetcher};
pub use insert::{
    BulkInserter, Column, ColumnTable, InsertOptions, InsertSource, InsertSummary, NameSanitizer,
    infer_schema, records_from_jsonl,
};
pub use memory::MemoryService;
pub use remote::{DEFAULT_BASE_URL, RemoteService};
pub use rows::RowIterator;
pub use service::{
    ApiResult, InsertResponse, InsertRow, ListRowsRequest, RowsPage, TableMetadata, TableService,
    TableUpdate,
};
pub use table::Table;
