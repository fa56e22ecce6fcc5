//! Purpose: Table handle tying a reference, a service, and lazily loaded metadata.
//! Exports: `Table`.
//! Role: Entry point for row iteration, inserts, exports, and views.
//! Invariants: Metadata is fetched at most once until invalidated.
//! Invariants: A failed update invalidates cached metadata before the error surfaces.
//! Invariants: Snapshot/window handles share the service but never the metadata cache.
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::export::{CsvOptions, write_csv};
use super::fetch::PageFetcher;
use super::insert::{BulkInserter, InsertOptions, InsertSource, InsertSummary};
use super::rows::RowIterator;
use super::service::{ApiResult, TableMetadata, TableService, TableUpdate};
use crate::core::config::TableConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::row::Row;
use crate::core::schema::Schema;
use crate::core::table_ref::TableReference;
use crate::core::view::{PointInTime, ViewResolver};

#[derive(Clone)]
struct TableInfo {
    metadata: Arc<TableMetadata>,
    schema: Arc<Schema>,
}

pub struct Table {
    service: Arc<dyn TableService>,
    reference: TableReference,
    config: TableConfig,
    info: Mutex<Option<TableInfo>>,
}

impl Table {
    pub fn new(service: Arc<dyn TableService>, reference: TableReference) -> Self {
        Self {
            service,
            reference,
            config: TableConfig::default(),
            info: Mutex::new(None),
        }
    }

    /// Parse `name` and bind it to `service`.
    pub fn open(
        service: Arc<dyn TableService>,
        name: &str,
        default_project: Option<&str>,
    ) -> ApiResult<Self> {
        Ok(Self::new(service, TableReference::parse(name, default_project)?))
    }

    pub fn with_config(mut self, config: TableConfig) -> ApiResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn reference(&self) -> &TableReference {
        &self.reference
    }

    pub fn full_name(&self) -> String {
        self.reference.full_name()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub(crate) fn service(&self) -> &Arc<dyn TableService> {
        &self.service
    }

    fn lock_info(&self) -> MutexGuard<'_, Option<TableInfo>> {
        self.info.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn load_info(&self) -> ApiResult<TableInfo> {
        if let Some(info) = self.lock_info().as_ref() {
            return Ok(info.clone());
        }
        debug!(table = %self.reference, "loading table metadata");
        let metadata = self
            .service
            .get_table(&self.reference)
            .map_err(|err| err.with_table(self.full_name()))?;
        let definition = metadata.schema.clone().ok_or_else(|| {
            Error::new(ErrorKind::Decode)
                .with_message("table metadata is missing its schema")
                .with_table(self.full_name())
        })?;
        let info = TableInfo {
            schema: Arc::new(Schema::new(definition)?),
            metadata: Arc::new(metadata),
        };
        *self.lock_info() = Some(info.clone());
        Ok(info)
    }

    /// Forget cached metadata; the next use refetches it.
    pub fn invalidate(&self) {
        *self.lock_info() = None;
    }

    pub fn exists(&self) -> ApiResult<bool> {
        match self.service.get_table(&self.reference) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.with_table(self.full_name())),
        }
    }

    pub fn metadata(&self) -> ApiResult<Arc<TableMetadata>> {
        Ok(self.load_info()?.metadata)
    }

    pub fn schema(&self) -> ApiResult<Arc<Schema>> {
        Ok(self.load_info()?.schema)
    }

    /// Row count, or `None` when the service does not report one.
    pub fn length(&self) -> ApiResult<Option<u64>> {
        Ok(self.metadata()?.num_rows)
    }

    /// Resolve a possibly negative position against the table length.
    pub(crate) fn resolve_index(&self, index: i64) -> ApiResult<u64> {
        if index >= 0 {
            return Ok(index as u64);
        }
        let length = self.length()?.ok_or_else(|| {
            Error::new(ErrorKind::LengthUnknown)
                .with_message("cannot use a negative index on a table of unknown length")
                .with_table(self.full_name())
                .with_index(index)
        })?;
        let resolved = i128::from(length) + i128::from(index);
        if resolved < 0 {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message("negative index reaches before the first row")
                .with_table(self.full_name())
                .with_index(index));
        }
        Ok(resolved as u64)
    }

    pub fn update(&self, update: TableUpdate) -> ApiResult<()> {
        let mut merged = (*self.metadata()?).clone();
        merged.merge(&update);
        if let Err(err) = self.service.update_table(&self.reference, &update) {
            warn!(table = %self.reference, error = %err, "table update failed; dropping cached metadata");
            self.invalidate();
            return Err(err.with_table(self.full_name()));
        }
        let definition = merged.schema.clone().unwrap_or_default();
        let info = TableInfo {
            schema: Arc::new(Schema::new(definition)?),
            metadata: Arc::new(merged),
        };
        *self.lock_info() = Some(info);
        Ok(())
    }

    fn view_resolver(&self) -> ViewResolver {
        ViewResolver::new(self.config.max_snapshot_age)
    }

    fn derive(&self, reference: TableReference) -> Self {
        Self {
            service: Arc::clone(&self.service),
            reference,
            config: self.config.clone(),
            info: Mutex::new(None),
        }
    }

    /// A handle on this table as of `at`.
    pub fn snapshot(&self, at: PointInTime) -> ApiResult<Self> {
        let reference = self.view_resolver().snapshot(&self.reference, at)?;
        Ok(self.derive(reference))
    }

    /// A handle limited to rows added between `begin` and `end` (default now).
    pub fn window(&self, begin: PointInTime, end: Option<PointInTime>) -> ApiResult<Self> {
        let reference = self.view_resolver().window(&self.reference, begin, end)?;
        Ok(self.derive(reference))
    }

    pub fn fetcher(
        &self,
        start: i64,
        max_rows: Option<u64>,
        page_size: Option<usize>,
    ) -> ApiResult<PageFetcher> {
        let start = self.resolve_index(start)?;
        PageFetcher::new(
            Arc::clone(&self.service),
            self.reference.clone(),
            self.schema()?,
            start,
            page_size.unwrap_or(self.config.page_size),
            max_rows,
        )
    }

    pub fn rows(&self) -> ApiResult<RowIterator> {
        self.range(0, None)
    }

    pub fn range(&self, start: i64, max_rows: Option<u64>) -> ApiResult<RowIterator> {
        Ok(RowIterator::new(self.fetcher(start, max_rows, None)?))
    }

    /// Materialize a range of rows in memory.
    pub fn collect_rows(&self, start: i64, max_rows: Option<u64>) -> ApiResult<Vec<Row>> {
        self.range(start, max_rows)?.collect()
    }

    /// Stream `source` into the table in bounded batches.
    pub fn insert(&self, source: &InsertSource, options: InsertOptions) -> ApiResult<InsertSummary> {
        BulkInserter::new(self, options).insert(source)
    }

    pub fn to_csv<W: std::io::Write>(&self, writer: W, options: &CsvOptions) -> ApiResult<u64> {
        write_csv(self, writer, options)
    }
}
