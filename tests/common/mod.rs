//! Purpose: Loopback fake of the table REST API shared by integration tests.
//! Exports: `FakeServer`, `Recorded`.
//! Role: Serves metadata, row pages, inserts, and patches from memory over real HTTP.
//! Invariants: Binds 127.0.0.1 on an ephemeral port; the listener exists before `start` returns.
//! Invariants: Insert requests with any rejected row apply nothing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    tables: HashMap<String, FakeTable>,
    requests: Vec<Recorded>,
    reject_field: Option<String>,
}

struct FakeTable {
    metadata: Map<String, Value>,
    fields: Vec<String>,
    rows: Vec<Value>,
}

type Shared = Arc<Mutex<FakeState>>;
type TablePath = Path<(String, String, String)>;

pub struct FakeServer {
    pub base_url: String,
    state: Shared,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let state: Shared = Arc::default();
        let app = router(Arc::clone(&state));
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                axum::serve(listener, app).await.expect("serve");
            });
        });
        Self { base_url, state }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// `fields` is the service schema field list, e.g. `[{"name": "n", "type": "INTEGER"}]`.
    pub fn create_table(&self, project: &str, dataset: &str, table: &str, fields: Value) {
        let names = fields
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|field| field["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let mut metadata = Map::new();
        metadata.insert("schema".to_string(), json!({ "fields": fields }));
        metadata.insert("creationTime".to_string(), json!("1700000000000"));
        metadata.insert("lastModifiedTime".to_string(), json!("1700000000000"));
        self.lock().tables.insert(
            key(project, dataset, table),
            FakeTable {
                metadata,
                fields: names,
                rows: Vec::new(),
            },
        );
    }

    /// Append rows of top-level cell values (strings, nulls, nested `{"f": ..}` records).
    pub fn append_rows(&self, project: &str, dataset: &str, table: &str, rows: Vec<Vec<Value>>) {
        let mut state = self.lock();
        let entry = state
            .tables
            .get_mut(&key(project, dataset, table))
            .expect("table exists");
        for cells in rows {
            let cells: Vec<Value> = cells.into_iter().map(|v| json!({ "v": v })).collect();
            entry.rows.push(json!({ "f": cells }));
        }
    }

    pub fn row_count(&self, project: &str, dataset: &str, table: &str) -> usize {
        self.lock()
            .tables
            .get(&key(project, dataset, table))
            .map_or(0, |entry| entry.rows.len())
    }

    /// Reject every inserted row whose json carries `field`.
    pub fn reject_rows_with_field(&self, field: &str) {
        self.lock().reject_field = Some(field.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.lock().requests.clone()
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route(
            "/bigquery/v2/projects/:project/datasets/:dataset/tables/:table",
            get(get_table).patch(patch_table),
        )
        .route(
            "/bigquery/v2/projects/:project/datasets/:dataset/tables/:table/data",
            get(list_rows),
        )
        .route(
            "/bigquery/v2/projects/:project/datasets/:dataset/tables/:table/insertAll",
            post(insert_all),
        )
        .with_state(state)
}

fn key(project: &str, dataset: &str, table: &str) -> String {
    let table = table.split('@').next().unwrap_or(table);
    format!("{project}/{dataset}/{table}")
}

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn record(
    state: &mut FakeState,
    method: &'static str,
    path: String,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: Option<Value>,
) {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.requests.push(Recorded {
        method,
        path,
        query,
        authorization,
        body,
    });
}

fn not_found(project: &str, dataset: &str, table: &str) -> Response {
    let message = format!("Not found: Table {project}:{dataset}.{table}");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "code": 404,
                "message": message,
                "errors": [{"reason": "notFound", "message": message}]
            }
        })),
    )
        .into_response()
}

fn table_json(entry: &FakeTable) -> Value {
    let mut metadata = entry.metadata.clone();
    metadata.insert("numRows".to_string(), json!(entry.rows.len().to_string()));
    Value::Object(metadata)
}

async fn get_table(
    State(state): State<Shared>,
    Path((project, dataset, table)): TablePath,
    headers: HeaderMap,
) -> Response {
    let mut state = lock(&state);
    let path = format!("{project}/{dataset}/{table}");
    record(&mut state, "GET", path, HashMap::new(), &headers, None);
    match state.tables.get(&key(&project, &dataset, &table)) {
        Some(entry) => Json(table_json(entry)).into_response(),
        None => not_found(&project, &dataset, &table),
    }
}

async fn patch_table(
    State(state): State<Shared>,
    Path((project, dataset, table)): TablePath,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    let path = format!("{project}/{dataset}/{table}");
    record(&mut state, "PATCH", path, HashMap::new(), &headers, Some(body.clone()));
    let Some(entry) = state.tables.get_mut(&key(&project, &dataset, &table)) else {
        return not_found(&project, &dataset, &table);
    };
    if let Value::Object(patch) = body {
        for (name, value) in patch {
            entry.metadata.insert(name, value);
        }
    }
    Json(table_json(entry)).into_response()
}

async fn list_rows(
    State(state): State<Shared>,
    Path((project, dataset, table)): TablePath,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = lock(&state);
    let path = format!("{project}/{dataset}/{table}/data");
    record(&mut state, "GET", path, query.clone(), &headers, None);
    let Some(entry) = state.tables.get(&key(&project, &dataset, &table)) else {
        return not_found(&project, &dataset, &table);
    };
    let max_results: usize = query
        .get("maxResults")
        .and_then(|value| value.parse().ok())
        .unwrap_or(100);
    let offset: usize = query
        .get("pageToken")
        .or_else(|| query.get("startIndex"))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let start = offset.min(entry.rows.len());
    let end = start.saturating_add(max_results).min(entry.rows.len());
    let mut page = Map::new();
    page.insert("totalRows".to_string(), json!(entry.rows.len().to_string()));
    page.insert("rows".to_string(), Value::Array(entry.rows[start..end].to_vec()));
    if end < entry.rows.len() {
        page.insert("pageToken".to_string(), json!(end.to_string()));
    }
    Json(Value::Object(page)).into_response()
}

async fn insert_all(
    State(state): State<Shared>,
    Path((project, dataset, table)): TablePath,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    let path = format!("{project}/{dataset}/{table}/insertAll");
    record(&mut state, "POST", path, HashMap::new(), &headers, Some(body.clone()));
    let reject_field = state.reject_field.clone();
    let Some(entry) = state.tables.get_mut(&key(&project, &dataset, &table)) else {
        return not_found(&project, &dataset, &table);
    };
    let rows = body["rows"].as_array().cloned().unwrap_or_default();

    let errors: Vec<Value> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            reject_field
                .as_deref()
                .is_some_and(|field| row["json"].get(field).is_some())
        })
        .map(|(index, _)| {
            json!({"index": index, "errors": [{"reason": "invalid", "message": "rejected row"}]})
        })
        .collect();
    if !errors.is_empty() {
        return Json(json!({ "insertErrors": errors })).into_response();
    }

    for row in rows {
        let cells: Vec<Value> = entry
            .fields
            .iter()
            .map(|name| json!({ "v": to_cell(&row["json"][name]) }))
            .collect();
        entry.rows.push(json!({ "f": cells }));
    }
    Json(json!({})).into_response()
}

fn to_cell(value: &Value) -> Value {
    match value {
        Value::Null | Value::Object(_) => Value::Null,
        Value::String(text) => Value::String(text.clone()),
        Value::Number(number) => Value::String(number.to_string()),
        Value::Bool(flag) => Value::String(flag.to_string()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| json!({ "v": to_cell(item) }))
                .collect(),
        ),
    }
}
