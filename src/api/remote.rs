//! Purpose: HTTP transport for the table REST API (metadata, row pages, streaming inserts).
//! Exports: `RemoteService`.
//! Role: Production `TableService`; maps wire envelopes onto the service types.
//! Invariants: URLs are `{base}/bigquery/v2/projects/{p}/datasets/{d}/tables/{t}[/data|/insertAll]`.
//! Invariants: Integer fields may arrive as JSON strings or numbers; both decode.
//! Invariants: 404 maps to NotFound, 400 to Validation, other failures to Transient.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use super::service::{
    ApiResult, InsertResponse, InsertRow, ListRowsRequest, RowsPage, TableMetadata, TableService,
    TableUpdate,
};
use crate::core::error::{Error, ErrorKind, InsertFailure};
use crate::core::schema::SchemaField;
use crate::core::table_ref::TableReference;

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";
const API_PREFIX: [&str; 2] = ["bigquery", "v2"];

#[derive(Clone)]
pub struct RemoteService {
    inner: Arc<RemoteServiceInner>,
}

struct RemoteServiceInner {
    base_url: Url,
    token: Option<String>,
    default_project: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireInt {
    Text(String),
    Number(i64),
}

impl WireInt {
    fn parse(&self, field: &str) -> ApiResult<i64> {
        match self {
            WireInt::Number(value) => Ok(*value),
            WireInt::Text(text) => text.parse().map_err(|_| {
                Error::new(ErrorKind::Decode)
                    .with_message("integer field is not a number")
                    .with_field(field)
                    .with_value(text.clone())
            }),
        }
    }
}

#[derive(Deserialize, Serialize)]
struct WireSchema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTable {
    schema: Option<WireSchema>,
    num_rows: Option<WireInt>,
    num_bytes: Option<WireInt>,
    creation_time: Option<WireInt>,
    last_modified_time: Option<WireInt>,
    expiration_time: Option<WireInt>,
    friendly_name: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRows {
    #[serde(default)]
    rows: Vec<JsonValue>,
    page_token: Option<String>,
    total_rows: Option<WireInt>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    rows: &'a [InsertRow],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInsertResponse {
    #[serde(default)]
    insert_errors: Vec<WireInsertError>,
}

#[derive(Deserialize)]
struct WireInsertError {
    index: u64,
    #[serde(default)]
    errors: Vec<WireErrorProto>,
}

#[derive(Deserialize)]
struct WireErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct PatchTableRequest<'a> {
    #[serde(flatten)]
    update: &'a TableUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<WireSchemaRef<'a>>,
}

#[derive(Serialize)]
struct WireSchemaRef<'a> {
    fields: &'a [SchemaField],
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<WireErrorProto>,
}

impl RemoteServiceInner {
    fn rebuild(&self, token: Option<String>, default_project: Option<String>) -> Self {
        Self {
            base_url: self.base_url.clone(),
            token,
            default_project,
            agent: self.agent.clone(),
        }
    }
}

impl RemoteService {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteServiceInner {
                base_url,
                token: None,
                default_project: None,
                agent,
            }),
        })
    }

    /// Bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = Some(token.into());
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.token = token;
        } else {
            let project = self.inner.default_project.clone();
            self.inner = Arc::new(self.inner.rebuild(token, project));
        }
        self
    }

    /// Project assumed for table names given as `dataset.table`.
    pub fn with_default_project(mut self, project: impl Into<String>) -> Self {
        let project = Some(project.into());
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.default_project = project;
        } else {
            let token = self.inner.token.clone();
            self.inner = Arc::new(self.inner.rebuild(token, project));
        }
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn default_project(&self) -> Option<&str> {
        self.inner.default_project.as_deref()
    }

    fn table_url(&self, table: &TableReference, suffix: Option<&str>) -> ApiResult<Url> {
        build_url(&self.inner.base_url, table, suffix)
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        debug!(method, url = %url, "table api request");
        let request = self.request(method, url).set("Accept", "application/json");
        let response = if method == "GET" {
            request.call()
        } else {
            let payload = serde_json::to_string(body).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode request json")
                    .with_source(err)
            })?;
            request
                .set("Content-Type", "application/json")
                .send_string(&payload)
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transient)
                .with_message("request failed")
                .with_source(err)),
        }
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.inner.agent.request(method, url.as_str());
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
    }
}

impl TableService for RemoteService {
    fn get_table(&self, table: &TableReference) -> ApiResult<TableMetadata> {
        let url = self.table_url(table, None)?;
        let wire: WireTable = self
            .request_json("GET", &url, &())
            .map_err(|err| err.with_table(table.full_name()))?;
        metadata_from_wire(wire)
    }

    fn list_rows(&self, table: &TableReference, request: &ListRowsRequest) -> ApiResult<RowsPage> {
        let mut url = self.table_url(table, Some("data"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &request.max_results.to_string());
            match (&request.page_token, request.start_index) {
                (Some(token), _) => {
                    query.append_pair("pageToken", token);
                }
                (None, Some(start)) => {
                    query.append_pair("startIndex", &start.to_string());
                }
                (None, None) => {}
            }
        }
        let wire: WireRows = self
            .request_json("GET", &url, &())
            .map_err(|err| err.with_table(table.full_name()))?;
        rows_from_wire(wire)
    }

    fn insert_rows(&self, table: &TableReference, rows: &[InsertRow]) -> ApiResult<InsertResponse> {
        let url = self.table_url(table, Some("insertAll"))?;
        let wire: WireInsertResponse = self
            .request_json("POST", &url, &InsertAllRequest { rows })
            .map_err(|err| err.with_table(table.full_name()))?;
        Ok(insert_response_from_wire(wire))
    }

    fn update_table(&self, table: &TableReference, update: &TableUpdate) -> ApiResult<()> {
        let url = self.table_url(table, None)?;
        let body = PatchTableRequest {
            update,
            schema: update
                .schema
                .as_deref()
                .map(|fields| WireSchemaRef { fields }),
        };
        let _: JsonValue = self
            .request_json("PATCH", &url, &body)
            .map_err(|err| err.with_table(table.full_name()))?;
        Ok(())
    }
}

// A base path is kept as a prefix so the API can sit behind a proxy or emulator.
fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Validation)
            .with_message("invalid service base url")
            .with_value(raw.clone())
            .with_source(err)
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("service base url must be an http or https url")
            .with_value(raw));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("service base url must not carry a query or fragment")
            .with_value(raw));
    }
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{prefix}/"));
    Ok(url)
}

fn build_url(base_url: &Url, table: &TableReference, suffix: Option<&str>) -> ApiResult<Url> {
    let table_id = table.table_id();
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Validation).with_message("service base url cannot be a base")
        })?;
        path.pop_if_empty()
            .extend(API_PREFIX)
            .extend(["projects", table.project(), "datasets", table.dataset()])
            .extend(["tables", table_id.as_str()])
            .extend(suffix);
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Transient)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    error_from_body(status, &body)
}

fn error_from_body(status: u16, body: &str) -> Error {
    let kind = error_kind_from_status(status);
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return Error::new(kind).with_message(format!("service error status {status}"));
    };
    let remote = envelope.error;
    let message = remote
        .message
        .or_else(|| remote.errors.iter().find_map(|e| e.message.clone()))
        .unwrap_or_else(|| format!("service error status {status}"));
    let mut err = Error::new(kind).with_message(message);
    if let Some(reason) = remote.errors.into_iter().find_map(|e| e.reason) {
        err = err.with_value(reason);
    }
    err
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Validation,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Transient,
    }
}

fn parse_count(value: Option<WireInt>, field: &str) -> ApiResult<Option<u64>> {
    value
        .map(|value| {
            let parsed = value.parse(field)?;
            u64::try_from(parsed).map_err(|_| {
                Error::new(ErrorKind::Decode)
                    .with_message("count must not be negative")
                    .with_field(field)
                    .with_value(parsed.to_string())
            })
        })
        .transpose()
}

fn parse_millis(value: Option<WireInt>, field: &str) -> ApiResult<Option<i64>> {
    value.map(|value| value.parse(field)).transpose()
}

fn metadata_from_wire(wire: WireTable) -> ApiResult<TableMetadata> {
    Ok(TableMetadata {
        schema: wire.schema.map(|schema| schema.fields),
        num_rows: parse_count(wire.num_rows, "numRows")?,
        num_bytes: parse_count(wire.num_bytes, "numBytes")?,
        creation_time_ms: parse_millis(wire.creation_time, "creationTime")?,
        last_modified_time_ms: parse_millis(wire.last_modified_time, "lastModifiedTime")?,
        expiration_time_ms: parse_millis(wire.expiration_time, "expirationTime")?,
        friendly_name: wire.friendly_name,
        description: wire.description,
    })
}

fn rows_from_wire(wire: WireRows) -> ApiResult<RowsPage> {
    Ok(RowsPage {
        rows: wire.rows,
        page_token: wire.page_token.filter(|token| !token.is_empty()),
        total_rows: parse_count(wire.total_rows, "totalRows")?,
    })
}

// One failure per rejected row; the first error entry carries the detail.
fn insert_response_from_wire(wire: WireInsertResponse) -> InsertResponse {
    InsertResponse {
        insert_errors: wire
            .insert_errors
            .into_iter()
            .map(|failure| {
                let first = failure.errors.into_iter().next();
                InsertFailure {
                    index: failure.index,
                    reason: first.as_ref().and_then(|e| e.reason.clone()),
                    message: first.and_then(|e| e.message),
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        RemoteService, WireInsertResponse, WireRows, WireTable, error_from_body,
        insert_response_from_wire, metadata_from_wire, normalize_base_url, rows_from_wire,
    };
    use crate::api::service::{InsertRow, TableUpdate};
    use crate::core::error::ErrorKind;
    use crate::core::schema::{FieldType, SchemaField};
    use crate::core::table_ref::TableReference;
    use serde_json::json;

    #[test]
    fn normalize_base_url_keeps_prefix_and_rejects_schemes() {
        let url = normalize_base_url("http://localhost:8080".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/");
        let url = normalize_base_url("http://localhost/proxy/bq/".to_string()).expect("prefix");
        assert_eq!(url.as_str(), "http://localhost/proxy/bq/");
        let err = normalize_base_url("http://localhost/?x=1".to_string()).expect_err("query");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = normalize_base_url("ftp://localhost".to_string()).expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn builders_survive_shared_handles() {
        let service = RemoteService::new("http://localhost:9050").expect("service");
        let shared = service.clone();
        let service = service.with_token("secret").with_default_project("proj");
        assert_eq!(service.default_project(), Some("proj"));
        assert_eq!(service.inner.token.as_deref(), Some("secret"));
        assert_eq!(shared.default_project(), None);
    }

    #[test]
    fn table_urls_follow_rest_layout() {
        let service = RemoteService::new("http://localhost:9050").expect("service");
        let table = TableReference::new("proj", "ds", "events");
        let url = service.table_url(&table, Some("data")).expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:9050/bigquery/v2/projects/proj/datasets/ds/tables/events/data"
        );

        let proxied = RemoteService::new("http://localhost:9050/bq").expect("service");
        let decorated = TableReference::parse("proj:ds.events@-3600000", None).expect("table");
        let url = proxied.table_url(&decorated, None).expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:9050/bq/bigquery/v2/projects/proj/datasets/ds/tables/events@-3600000"
        );
    }

    #[test]
    fn metadata_accepts_string_and_numeric_counts() {
        let wire: WireTable = serde_json::from_value(json!({
            "schema": {"fields": [{"name": "a", "type": "INTEGER"}]},
            "numRows": "12",
            "numBytes": 340,
            "creationTime": "1700000000000",
            "friendlyName": "Events"
        }))
        .expect("wire");
        let metadata = metadata_from_wire(wire).expect("metadata");
        assert_eq!(metadata.num_rows, Some(12));
        assert_eq!(metadata.num_bytes, Some(340));
        assert_eq!(metadata.creation_time_ms, Some(1_700_000_000_000));
        assert_eq!(metadata.schema.expect("schema")[0].field_type, FieldType::Integer);

        let wire: WireTable = serde_json::from_value(json!({"numRows": "many"})).expect("wire");
        let err = metadata_from_wire(wire).expect_err("bad count");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.field(), Some("numRows"));
    }

    #[test]
    fn empty_page_token_means_last_page() {
        let wire: WireRows =
            serde_json::from_value(json!({"pageToken": "", "totalRows": "0"})).expect("wire");
        let page = rows_from_wire(wire).expect("page");
        assert!(page.rows.is_empty());
        assert_eq!(page.page_token, None);
        assert_eq!(page.total_rows, Some(0));
    }

    #[test]
    fn insert_errors_keep_first_detail() {
        let wire: WireInsertResponse = serde_json::from_value(json!({
            "insertErrors": [
                {"index": 3, "errors": [{"reason": "invalid", "message": "bad value"}, {"reason": "stopped"}]},
                {"index": 4, "errors": []}
            ]
        }))
        .expect("wire");
        let response = insert_response_from_wire(wire);
        assert_eq!(response.insert_errors.len(), 2);
        assert_eq!(response.insert_errors[0].index, 3);
        assert_eq!(response.insert_errors[0].reason.as_deref(), Some("invalid"));
        assert_eq!(response.insert_errors[1].message, None);
    }

    #[test]
    fn error_envelope_maps_status() {
        let body = r#"{"error": {"code": 404, "message": "Not found: Table p:d.t", "errors": [{"reason": "notFound"}]}}"#;
        let err = error_from_body(404, body);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), Some("Not found: Table p:d.t"));
        assert_eq!(err.value(), Some("notFound"));

        assert_eq!(error_from_body(400, "").kind(), ErrorKind::Validation);
        assert_eq!(error_from_body(503, "<html>").kind(), ErrorKind::Transient);
    }

    #[test]
    fn request_bodies_use_wire_names() {
        let row = InsertRow {
            insert_id: "abc0".to_string(),
            json: serde_json::Map::from_iter([("a".to_string(), json!(1))]),
        };
        let body = serde_json::to_value(super::InsertAllRequest {
            rows: std::slice::from_ref(&row),
        })
        .expect("json");
        assert_eq!(body, json!({"rows": [{"insertId": "abc0", "json": {"a": 1}}]}));

        let update = TableUpdate::new()
            .with_description("d")
            .with_schema(vec![SchemaField::new("a", FieldType::String)]);
        let body = serde_json::to_value(super::PatchTableRequest {
            update: &update,
            schema: update
                .schema
                .as_deref()
                .map(|fields| super::WireSchemaRef { fields }),
        })
        .expect("json");
        assert_eq!(
            body,
            json!({
                "description": "d",
                "schema": {"fields": [{"name": "a", "type": "STRING", "mode": "NULLABLE"}]}
            })
        );
    }
}
