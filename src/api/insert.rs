//! Purpose: Validate, encode, batch, and stream bulk records into an existing table.
//! Exports: `InsertSource`, `ColumnTable`, `Column`, `InsertOptions`, `InsertSummary`,
//! `NameSanitizer`, `BulkInserter`, `infer_schema`, `records_from_jsonl`.
//! Role: Write path for `Table::insert` and the CLI `insert` command.
//! Invariants: Validation completes before the first request is sent.
//! Invariants: Requests hold at most `max_rows_per_insert` rows and
//! `max_bytes_per_insert` encoded bytes; a fixed pause follows each flush.
//! Invariants: A rejected batch aborts the insert; earlier batches stay applied.
use std::collections::HashMap;
use std::io::BufRead;
use std::thread;

use getrandom::fill as fill_random;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use super::service::{ApiResult, InsertRow};
use super::table::Table;
use crate::core::error::{Error, ErrorKind, InsertFailure};
use crate::core::row::{Row, Value};
use crate::core::schema::{FieldMode, FieldType, Schema, SchemaField};

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: FieldType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: FieldType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }
}

/// Columnar source with declared column types and equal-length columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnTable {
    columns: Vec<Column>,
    len: usize,
}

impl ColumnTable {
    pub fn new(columns: Vec<Column>) -> ApiResult<Self> {
        let len = columns.first().map_or(0, |column| column.values.len());
        if let Some(column) = columns.iter().find(|column| column.values.len() != len) {
            return Err(Error::new(ErrorKind::Validation)
                .with_message(format!(
                    "column has {} values but the first column has {len}",
                    column.values.len()
                ))
                .with_field(column.name.clone()));
        }
        Ok(Self { columns, len })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn row(&self, position: usize) -> Row {
        Row::from_entries(
            self.columns
                .iter()
                .map(|column| (column.name.clone(), column.values[position].clone()))
                .collect(),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    /// Named records; the first record determines the columns.
    Records(Vec<Row>),
    /// Positional records, named `Column1`, `Column2`, ...
    Lists(Vec<Vec<Value>>),
    Columns(ColumnTable),
}

impl InsertSource {
    pub fn len(&self) -> usize {
        match self {
            InsertSource::Records(records) => records.len(),
            InsertSource::Lists(lists) => lists.len(),
            InsertSource::Columns(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, position: usize) -> Row {
        match self {
            InsertSource::Records(records) => records[position].clone(),
            InsertSource::Lists(lists) => Row::from_entries(
                lists[position]
                    .iter()
                    .enumerate()
                    .map(|(i, value)| (list_column_name(i), value.clone()))
                    .collect(),
            ),
            InsertSource::Columns(table) => table.row(position),
        }
    }
}

fn list_column_name(position: usize) -> String {
    format!("Column{}", position + 1)
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InsertOptions {
    pub include_index: bool,
    pub index_name: Option<String>,
}

impl InsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, name: Option<String>) -> Self {
        self.include_index = true;
        self.index_name = name;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InsertSummary {
    pub batch_id: String,
    pub rows: u64,
    pub batches: usize,
}

/// Strips characters outside `[A-Za-z0-9_]`, remembering each answer for one insert.
#[derive(Clone, Debug, Default)]
pub struct NameSanitizer {
    memo: HashMap<String, String>,
}

impl NameSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sanitize(&mut self, name: &str) -> &str {
        self.memo
            .entry(name.to_string())
            .or_insert_with(|| {
                name.chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect()
            })
            .as_str()
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

fn value_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Boolean(_) => Some(FieldType::Boolean),
        Value::Integer(_) => Some(FieldType::Integer),
        Value::Float(_) => Some(FieldType::Float),
        Value::String(_) => Some(FieldType::String),
        Value::Timestamp(_) => Some(FieldType::Timestamp),
        Value::Array(items) => items.iter().find_map(value_type),
    }
}

/// Schema implied by `source`; column types come from declared dtypes or sampled values.
///
/// Sampling starts at the first record and looks further down a column only while it
/// holds nulls; columns that are null throughout default to STRING.
pub fn infer_schema(source: &InsertSource) -> Vec<SchemaField> {
    match source {
        InsertSource::Columns(table) => table
            .columns()
            .iter()
            .map(|column| SchemaField::new(column.name.clone(), column.dtype))
            .collect(),
        _ if source.is_empty() => Vec::new(),
        _ => {
            let first = source.record(0);
            first
                .iter()
                .map(|(name, value)| {
                    let mut field_type = value_type(value);
                    let mut position = 1;
                    while field_type.is_none() && position < source.len() {
                        field_type = source.record(position).get(name).and_then(value_type);
                        position += 1;
                    }
                    let mode = match value {
                        Value::Array(_) => FieldMode::Repeated,
                        _ => FieldMode::Nullable,
                    };
                    SchemaField::new(name, field_type.unwrap_or(FieldType::String)).with_mode(mode)
                })
                .collect()
        }
    }
}

/// Load one JSON object per line; blank lines are skipped.
pub fn records_from_jsonl<R: BufRead>(reader: R) -> ApiResult<Vec<Row>> {
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to read records")
                .with_source(err)
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let json: JsonValue = serde_json::from_str(&line).map_err(|err| {
            Error::new(ErrorKind::Validation)
                .with_message("invalid json record")
                .with_row(line_no as u64 + 1)
                .with_source(err)
        })?;
        records.push(Row::from_json(&json).map_err(|err| err.with_row(line_no as u64 + 1))?);
    }
    Ok(records)
}

pub struct BulkInserter<'a> {
    table: &'a Table,
    options: InsertOptions,
}

struct Batch {
    rows: Vec<InsertRow>,
    ordinals: Vec<u64>,
    bytes: usize,
}

impl Batch {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            ordinals: Vec::new(),
            bytes: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<'a> BulkInserter<'a> {
    pub fn new(table: &'a Table, options: InsertOptions) -> Self {
        Self { table, options }
    }

    fn index_name(&self) -> Option<String> {
        self.options.include_index.then(|| {
            self.options
                .index_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| self.table.config().default_index_name.clone())
        })
    }

    /// Streams `source` in batches, pausing `insert_interval` between requests.
    /// No pause follows the final request.
    pub fn insert(&self, source: &InsertSource) -> ApiResult<InsertSummary> {
        let table = self.table;
        if !table.exists()? {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("table does not exist")
                .with_table(table.full_name()));
        }

        let mut sanitizer = NameSanitizer::new();
        let index_name = self.index_name();
        let mut inferred = infer_schema(source);
        if let Some(name) = &index_name {
            inferred.push(SchemaField::new(name.clone(), FieldType::Integer));
        }
        let table_schema = table.schema()?;
        validate_against(&inferred, &table_schema, !source.is_empty(), &mut sanitizer)
            .map_err(|err| err.with_table(table.full_name()))?;

        let batch_id = new_batch_id()?;
        let config = table.config();
        let total = source.len();
        let mut batch = Batch::new();
        let mut batches = 0usize;

        for position in 0..total {
            let ordinal = position as u64;
            let mut record = source.record(position);
            if let Some(name) = &index_name {
                record.push(name.clone(), Value::Integer(ordinal as i64));
            }
            let json = encode_record(&record, &mut sanitizer)
                .map_err(|err| err.with_row(ordinal).with_table(table.full_name()))?;
            let bytes = serde_json::to_vec(&json)
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode record")
                        .with_row(ordinal)
                        .with_source(err)
                })?
                .len();
            if bytes > config.max_bytes_per_row {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message(format!(
                        "encoded record is {bytes} bytes; the limit is {}",
                        config.max_bytes_per_row
                    ))
                    .with_row(ordinal)
                    .with_table(table.full_name()));
            }

            if !batch.is_empty() && batch.bytes + bytes > config.max_bytes_per_insert {
                self.flush(&mut batch, batches)?;
                batches += 1;
                self.pause();
            }

            batch.rows.push(InsertRow {
                insert_id: format!("{batch_id}{ordinal}"),
                json,
            });
            batch.ordinals.push(ordinal);
            batch.bytes += bytes;

            if batch.rows.len() >= config.max_rows_per_insert {
                self.flush(&mut batch, batches)?;
                batches += 1;
                if position + 1 < total {
                    self.pause();
                }
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, batches)?;
            batches += 1;
        }

        info!(
            table = %table.reference(),
            rows = total,
            batches,
            batch_id = %batch_id,
            "insert complete"
        );
        Ok(InsertSummary {
            batch_id,
            rows: total as u64,
            batches,
        })
    }

    fn flush(&self, batch: &mut Batch, number: usize) -> ApiResult<()> {
        let table = self.table;
        debug!(
            table = %table.reference(),
            batch = number,
            rows = batch.rows.len(),
            bytes = batch.bytes,
            "flushing insert batch"
        );
        let response = table
            .service()
            .insert_rows(table.reference(), &batch.rows)
            .map_err(|err| err.with_table(table.full_name()))?;
        if !response.insert_errors.is_empty() {
            let failures: Vec<InsertFailure> = response
                .insert_errors
                .into_iter()
                .map(|failure| InsertFailure {
                    index: usize::try_from(failure.index)
                        .ok()
                        .and_then(|i| batch.ordinals.get(i).copied())
                        .unwrap_or(failure.index),
                    ..failure
                })
                .collect();
            return Err(Error::new(ErrorKind::PartialInsert)
                .with_message(format!(
                    "{} of {} rows rejected in batch {number}",
                    failures.len(),
                    batch.rows.len()
                ))
                .with_table(table.full_name())
                .with_failures(failures));
        }
        *batch = Batch::new();
        Ok(())
    }

    fn pause(&self) {
        let interval = self.table.config().insert_interval;
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}

/// REQUIRED table fields are only checked when the source has rows to supply them.
fn validate_against(
    inferred: &[SchemaField],
    table_schema: &Schema,
    check_required: bool,
    sanitizer: &mut NameSanitizer,
) -> ApiResult<()> {
    let mut origins: HashMap<String, &str> = HashMap::new();
    for field in inferred {
        let name = sanitizer.sanitize(&field.name).to_string();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("field name has no valid characters")
                .with_field(field.name.clone()));
        }
        if let Some(previous) = origins.insert(name.clone(), &field.name) {
            return Err(Error::new(ErrorKind::Validation)
                .with_message(format!(
                    "fields '{previous}' and '{}' both map to column '{name}'",
                    field.name
                ))
                .with_field(name));
        }
        let Some(table_field) = table_schema.field(&name) else {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("table does not contain field")
                .with_field(name));
        };
        if table_field.field_type != field.field_type {
            return Err(Error::new(ErrorKind::Validation)
                .with_message(format!(
                    "field has type {} in data but {} in table",
                    field.field_type, table_field.field_type
                ))
                .with_field(name)
                .with_value(field.field_type.as_str()));
        }
    }

    let provided: Vec<String> = inferred
        .iter()
        .map(|field| sanitizer.sanitize(&field.name).to_string())
        .collect();
    if !check_required {
        return Ok(());
    }
    for required in table_schema
        .definition()
        .iter()
        .filter(|field| field.mode == FieldMode::Required)
    {
        if !provided.iter().any(|name| name == &required.name) {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("data is missing a REQUIRED table field")
                .with_field(required.name.clone()));
        }
    }
    Ok(())
}

fn encode_record(record: &Row, sanitizer: &mut NameSanitizer) -> ApiResult<Map<String, JsonValue>> {
    let mut json = Map::new();
    for (name, value) in record.iter() {
        let value = value.to_json().map_err(|err| err.with_field(name))?;
        json.insert(sanitizer.sanitize(name).to_string(), value);
    }
    Ok(json)
}

fn new_batch_id() -> ApiResult<String> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to generate batch id: {err}"))
    })?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}
