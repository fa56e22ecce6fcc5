//! Purpose: Define the narrow service boundary the row and insert layers talk to.
//! Exports: `TableService`, `TableMetadata`, `ListRowsRequest`, `RowsPage`,
//! `InsertRow`, `InsertResponse`, `TableUpdate`.
//! Role: Seam between core logic and transports (`RemoteService`, `MemoryService`).
//! Invariants: Every call blocks until the service answers or fails.
//! Invariants: Unknown tables surface as `ErrorKind::NotFound`.
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;

use crate::core::error::{Error, InsertFailure};
use crate::core::schema::SchemaField;
use crate::core::table_ref::TableReference;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableMetadata {
    pub schema: Option<Vec<SchemaField>>,
    pub num_rows: Option<u64>,
    pub num_bytes: Option<u64>,
    pub creation_time_ms: Option<i64>,
    pub last_modified_time_ms: Option<i64>,
    pub expiration_time_ms: Option<i64>,
    pub friendly_name: Option<String>,
    pub description: Option<String>,
}

impl TableMetadata {
    pub fn created_on(&self) -> Option<OffsetDateTime> {
        self.creation_time_ms.and_then(from_epoch_millis)
    }

    pub fn modified_on(&self) -> Option<OffsetDateTime> {
        self.last_modified_time_ms.and_then(from_epoch_millis)
    }

    pub fn expires_on(&self) -> Option<OffsetDateTime> {
        self.expiration_time_ms.and_then(from_epoch_millis)
    }

    /// Applies the present fields of `update`.
    pub fn merge(&mut self, update: &TableUpdate) {
        if let Some(name) = &update.friendly_name {
            self.friendly_name = Some(name.clone());
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(expiry) = update.expiration_time_ms {
            self.expiration_time_ms = Some(expiry);
        }
        if let Some(schema) = &update.schema {
            self.schema = Some(schema.clone());
        }
    }
}

fn from_epoch_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListRowsRequest {
    pub page_token: Option<String>,
    pub start_index: Option<u64>,
    pub max_results: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowsPage {
    /// Undecoded rows in the service's `{"f": [{"v": ..}]}` layout.
    pub rows: Vec<JsonValue>,
    pub page_token: Option<String>,
    pub total_rows: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    pub insert_id: String,
    pub json: Map<String, JsonValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsertResponse {
    /// Failures indexed relative to the submitted request.
    pub insert_errors: Vec<InsertFailure>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "expirationTime",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_millis"
    )]
    pub expiration_time_ms: Option<i64>,
    #[serde(skip)]
    pub schema: Option<Vec<SchemaField>>,
}

impl TableUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expiry(mut self, expiry: OffsetDateTime) -> Self {
        self.expiration_time_ms = Some(crate::core::view::epoch_millis(expiry));
        self
    }

    pub fn with_expiry_millis(mut self, millis: i64) -> Self {
        self.expiration_time_ms = Some(millis);
        self
    }

    pub fn with_schema(mut self, schema: Vec<SchemaField>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.friendly_name.is_none()
            && self.description.is_none()
            && self.expiration_time_ms.is_none()
            && self.schema.is_none()
    }
}

// The service carries int64 values as strings.
fn serialize_millis<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(millis) => serializer.serialize_str(&millis.to_string()),
        None => serializer.serialize_none(),
    }
}

pub trait TableService: Send + Sync {
    fn get_table(&self, table: &TableReference) -> ApiResult<TableMetadata>;

    fn list_rows(&self, table: &TableReference, request: &ListRowsRequest) -> ApiResult<RowsPage>;

    fn insert_rows(&self, table: &TableReference, rows: &[InsertRow]) -> ApiResult<InsertResponse>;

    fn update_table(&self, table: &TableReference, update: &TableUpdate) -> ApiResult<()>;
}
