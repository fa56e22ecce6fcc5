//! Purpose: In-process `TableService` backed by plain vectors.
//! Exports: `MemoryService`.
//! Role: Deterministic stand-in for the remote service in tests and demos.
//! Invariants: Page tokens encode the next offset; reusing a token is idempotent.
//! Invariants: Every call is recorded so callers can assert request shapes.
//! Notes: Decorators are accepted but always resolve to the live rows.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::{Value as JsonValue, json};

use super::service::{
    ApiResult, InsertResponse, InsertRow, ListRowsRequest, RowsPage, TableMetadata, TableService,
    TableUpdate,
};
use crate::core::error::{Error, ErrorKind, InsertFailure};
use crate::core::schema::SchemaField;
use crate::core::table_ref::TableReference;

const TOKEN_PREFIX: &str = "offset:";

#[derive(Default)]
pub struct MemoryService {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    get_calls: usize,
    list_calls: Vec<ListRowsRequest>,
    insert_batches: Vec<Vec<InsertRow>>,
    update_calls: Vec<TableUpdate>,
    insert_faults: HashMap<usize, Vec<InsertFailure>>,
    list_fault_after: Option<usize>,
    fail_updates: bool,
}

struct MemoryTable {
    metadata: TableMetadata,
    rows: Vec<JsonValue>,
    hide_row_count: bool,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn create_table(&self, table: &TableReference, definition: Vec<SchemaField>) {
        let metadata = TableMetadata {
            schema: Some(definition),
            creation_time_ms: Some(0),
            last_modified_time_ms: Some(0),
            ..TableMetadata::default()
        };
        self.lock().tables.insert(
            key(table),
            MemoryTable {
                metadata,
                rows: Vec::new(),
                hide_row_count: false,
            },
        );
    }

    /// Append rows given as positional top-level cell values (`null`, strings, or lists).
    pub fn append_values<I>(&self, table: &TableReference, rows: I)
    where
        I: IntoIterator<Item = Vec<JsonValue>>,
    {
        let raw = rows.into_iter().map(|cells| {
            let cells: Vec<JsonValue> = cells.into_iter().map(|v| json!({ "v": v })).collect();
            json!({ "f": cells })
        });
        self.append_raw(table, raw);
    }

    pub fn append_raw<I>(&self, table: &TableReference, rows: I)
    where
        I: IntoIterator<Item = JsonValue>,
    {
        if let Some(entry) = self.lock().tables.get_mut(&key(table)) {
            entry.rows.extend(rows);
        }
    }

    /// Report the table length as unknown from now on.
    pub fn hide_row_count(&self, table: &TableReference) {
        if let Some(entry) = self.lock().tables.get_mut(&key(table)) {
            entry.hide_row_count = true;
        }
    }

    /// Make the `batch`-th insert request (zero based) report `failures`.
    pub fn fail_insert_batch(&self, batch: usize, failures: Vec<InsertFailure>) {
        self.lock().insert_faults.insert(batch, failures);
    }

    /// Fail every `list_rows` call after the first `calls` succeed.
    pub fn fail_list_after(&self, calls: usize) {
        self.lock().list_fault_after = Some(calls);
    }

    pub fn fail_updates(&self) {
        self.lock().fail_updates = true;
    }

    pub fn rows(&self, table: &TableReference) -> Vec<JsonValue> {
        self.lock()
            .tables
            .get(&key(table))
            .map(|entry| entry.rows.clone())
            .unwrap_or_default()
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    pub fn list_calls(&self) -> Vec<ListRowsRequest> {
        self.lock().list_calls.clone()
    }

    pub fn insert_batches(&self) -> Vec<Vec<InsertRow>> {
        self.lock().insert_batches.clone()
    }

    pub fn update_calls(&self) -> Vec<TableUpdate> {
        self.lock().update_calls.clone()
    }
}

impl TableService for MemoryService {
    fn get_table(&self, table: &TableReference) -> ApiResult<TableMetadata> {
        let mut state = self.lock();
        state.get_calls += 1;
        let entry = state.tables.get(&key(table)).ok_or_else(|| not_found(table))?;
        let mut metadata = entry.metadata.clone();
        if !entry.hide_row_count {
            metadata.num_rows = Some(entry.rows.len() as u64);
        }
        Ok(metadata)
    }

    fn list_rows(&self, table: &TableReference, request: &ListRowsRequest) -> ApiResult<RowsPage> {
        let mut state = self.lock();
        let succeeded = state.list_calls.len();
        state.list_calls.push(request.clone());
        if state.list_fault_after.is_some_and(|limit| succeeded >= limit) {
            return Err(Error::new(ErrorKind::Transient).with_message("injected list failure"));
        }
        let entry = state.tables.get(&key(table)).ok_or_else(|| not_found(table))?;

        let offset = match &request.page_token {
            Some(token) => parse_token(token)?,
            None => request.start_index.unwrap_or(0) as usize,
        };
        let start = offset.min(entry.rows.len());
        let end = start.saturating_add(request.max_results).min(entry.rows.len());
        let page_token = (end < entry.rows.len()).then(|| format!("{TOKEN_PREFIX}{end}"));
        Ok(RowsPage {
            rows: entry.rows[start..end].to_vec(),
            page_token,
            total_rows: Some(entry.rows.len() as u64),
        })
    }

    fn insert_rows(&self, table: &TableReference, rows: &[InsertRow]) -> ApiResult<InsertResponse> {
        let mut state = self.lock();
        let batch = state.insert_batches.len();
        state.insert_batches.push(rows.to_vec());
        if let Some(failures) = state.insert_faults.remove(&batch) {
            return Ok(InsertResponse {
                insert_errors: failures,
            });
        }
        let entry = state
            .tables
            .get_mut(&key(table))
            .ok_or_else(|| not_found(table))?;
        let definition = entry.metadata.schema.clone().unwrap_or_default();
        for row in rows {
            let cells: Vec<JsonValue> = definition
                .iter()
                .map(|field| json!({ "v": to_cell(row.json.get(&field.name)) }))
                .collect();
            entry.rows.push(json!({ "f": cells }));
        }
        Ok(InsertResponse::default())
    }

    fn update_table(&self, table: &TableReference, update: &TableUpdate) -> ApiResult<()> {
        let mut state = self.lock();
        state.update_calls.push(update.clone());
        if state.fail_updates {
            return Err(Error::new(ErrorKind::Transient).with_message("injected update failure"));
        }
        let entry = state
            .tables
            .get_mut(&key(table))
            .ok_or_else(|| not_found(table))?;
        entry.metadata.merge(update);
        Ok(())
    }
}

fn key(table: &TableReference) -> String {
    table.undecorated().full_name()
}

fn not_found(table: &TableReference) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("table not found")
        .with_table(table.full_name())
}

fn parse_token(token: &str) -> ApiResult<usize> {
    token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| {
            Error::new(ErrorKind::Validation)
                .with_message("invalid page token")
                .with_value(token)
        })
}

// Mirrors the service's wire encoding: scalars travel as strings.
fn to_cell(value: Option<&JsonValue>) -> JsonValue {
    match value {
        None | Some(JsonValue::Null) | Some(JsonValue::Object(_)) => JsonValue::Null,
        Some(JsonValue::String(text)) => JsonValue::String(text.clone()),
        Some(JsonValue::Number(number)) => JsonValue::String(number.to_string()),
        Some(JsonValue::Bool(value)) => JsonValue::String(value.to_string()),
        Some(JsonValue::Array(items)) => JsonValue::Array(
            items
                .iter()
                .map(|item| json!({ "v": to_cell(Some(item)) }))
                .collect(),
        ),
    }
}
