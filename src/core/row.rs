//! Purpose: Typed cell values, decoded rows, and the positional raw-row decoder.
//! Exports: `Value`, `Row`, `decode_row`.
//! Role: Converts service row payloads (`{"f": [{"v": ..}]}`) into flattened rows.
//! Invariants: Rows carry leaf fields only, keyed by dotted path, in schema order.
//! Invariants: Any malformed cell fails the row with its field name and row index.
use serde_json::{Map, Number, Value as JsonValue};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{FieldMode, FieldType, Schema, SchemaField};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(OffsetDateTime),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// JSON form used on the insert wire and in CLI output; timestamps become RFC 3339.
    pub fn to_json(&self) -> Result<JsonValue, Error> {
        let json = match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(value) => JsonValue::Bool(*value),
            Value::Integer(value) => JsonValue::Number((*value).into()),
            Value::Float(value) => match Number::from_f64(*value) {
                Some(number) => JsonValue::Number(number),
                None => JsonValue::String(value.to_string()),
            },
            Value::String(value) => JsonValue::String(value.clone()),
            Value::Timestamp(value) => JsonValue::String(format_timestamp(*value)?),
            Value::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(json)
    }

    /// Plain JSON scalars and arrays; strings are never reinterpreted as timestamps.
    pub fn from_json(json: &JsonValue) -> Result<Self, Error> {
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(value) => Value::Boolean(*value),
            JsonValue::Number(number) => match number.as_i64() {
                Some(value) => Value::Integer(value),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(value) => Value::String(value.clone()),
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            JsonValue::Object(_) => {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("nested objects are not supported as cell values"));
            }
        };
        Ok(value)
    }

    /// Text used for CSV cells.
    pub fn to_text(&self) -> Result<String, Error> {
        let text = match self {
            Value::Null => String::new(),
            Value::Boolean(value) => value.to_string(),
            Value::Integer(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Timestamp(value) => format_timestamp(*value)?,
            Value::Array(_) => self.to_json()?.to_string(),
        };
        Ok(text)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

pub(crate) fn format_timestamp(value: OffsetDateTime) -> Result<String, Error> {
    value.format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to format timestamp")
            .with_source(err)
    })
}

/// Ordered mapping from flattened field name to value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn to_json(&self) -> Result<JsonValue, Error> {
        let mut map = Map::new();
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.to_json()?);
        }
        Ok(JsonValue::Object(map))
    }

    pub fn from_json(json: &JsonValue) -> Result<Self, Error> {
        let JsonValue::Object(map) = json else {
            return Err(Error::new(ErrorKind::Validation).with_message("record must be a json object"));
        };
        let mut row = Row::new();
        for (name, value) in map {
            let value = Value::from_json(value).map_err(|err| err.with_field(name.clone()))?;
            row.push(name.clone(), value);
        }
        Ok(row)
    }
}

/// Decode one raw service row positionally through `schema`.
pub fn decode_row(schema: &Schema, raw: &JsonValue, row: u64) -> Result<Row, Error> {
    let mut entries = Vec::with_capacity(schema.len());
    decode_fields(schema.definition(), raw, "", row, &mut entries)?;
    Ok(Row::from_entries(entries))
}

fn decode_fields(
    fields: &[SchemaField],
    raw: &JsonValue,
    prefix: &str,
    row: u64,
    out: &mut Vec<(String, Value)>,
) -> Result<(), Error> {
    let cells = raw.get("f").and_then(JsonValue::as_array).ok_or_else(|| {
        decode_error("row payload is missing its cell list", prefix.trim_end_matches('.'), row)
    })?;
    if cells.len() < fields.len() {
        return Err(decode_error(
            format!("row has {} cells but schema has {} fields", cells.len(), fields.len()),
            prefix.trim_end_matches('.'),
            row,
        ));
    }
    for (field, cell) in fields.iter().zip(cells) {
        let name = format!("{prefix}{}", field.name);
        let value = cell.get("v").unwrap_or(&JsonValue::Null);
        decode_cell(field, &name, value, row, out)?;
    }
    Ok(())
}

fn decode_cell(
    field: &SchemaField,
    name: &str,
    raw: &JsonValue,
    row: u64,
    out: &mut Vec<(String, Value)>,
) -> Result<(), Error> {
    if field.mode == FieldMode::Repeated {
        let items = match raw {
            JsonValue::Null => &[][..],
            JsonValue::Array(items) => items.as_slice(),
            other => {
                return Err(decode_error("repeated field is not a list", name, row)
                    .with_value(other.to_string()));
            }
        };
        if field.field_type == FieldType::Record {
            return decode_repeated_record(field, name, items, row, out);
        }
        let values = items
            .iter()
            .map(|item| decode_scalar(field.field_type, item.get("v").unwrap_or(item), name, row))
            .collect::<Result<Vec<_>, _>>()?;
        out.push((name.to_string(), Value::Array(values)));
        return Ok(());
    }

    if field.field_type == FieldType::Record {
        if raw.is_null() {
            if field.mode == FieldMode::Required {
                return Err(decode_error("null value in REQUIRED field", name, row));
            }
            for leaf in leaf_paths(field, name) {
                out.push((leaf, Value::Null));
            }
            return Ok(());
        }
        return decode_fields(&field.fields, raw, &format!("{name}."), row, out);
    }

    let value = decode_scalar(field.field_type, raw, name, row)?;
    if value.is_null() && field.mode == FieldMode::Required {
        return Err(decode_error("null value in REQUIRED field", name, row));
    }
    out.push((name.to_string(), value));
    Ok(())
}

// Repeated records surface each child path as a list across the repeated elements.
fn decode_repeated_record(
    field: &SchemaField,
    name: &str,
    items: &[JsonValue],
    row: u64,
    out: &mut Vec<(String, Value)>,
) -> Result<(), Error> {
    let paths = leaf_paths(field, name);
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(items.len()); paths.len()];
    for item in items {
        let mut element = Vec::with_capacity(paths.len());
        let inner = item.get("v").unwrap_or(item);
        decode_fields(&field.fields, inner, &format!("{name}."), row, &mut element)?;
        for (column, (_, value)) in columns.iter_mut().zip(element) {
            column.push(value);
        }
    }
    for (path, column) in paths.into_iter().zip(columns) {
        out.push((path, Value::Array(column)));
    }
    Ok(())
}

fn leaf_paths(field: &SchemaField, name: &str) -> Vec<String> {
    if field.field_type != FieldType::Record {
        return vec![name.to_string()];
    }
    field
        .fields
        .iter()
        .flat_map(|child| leaf_paths(child, &format!("{name}.{}", child.name)))
        .collect()
}

fn decode_scalar(field_type: FieldType, raw: &JsonValue, name: &str, row: u64) -> Result<Value, Error> {
    let invalid = |what: &str| {
        decode_error(format!("invalid {what} value"), name, row).with_value(raw.to_string())
    };
    let value = match (field_type, raw) {
        (_, JsonValue::Null) => Value::Null,
        (FieldType::Integer, JsonValue::String(text)) => {
            Value::Integer(text.trim().parse().map_err(|_| invalid("INTEGER"))?)
        }
        (FieldType::Integer, JsonValue::Number(number)) => {
            Value::Integer(number.as_i64().ok_or_else(|| invalid("INTEGER"))?)
        }
        (FieldType::Float, JsonValue::String(text)) => {
            Value::Float(text.trim().parse().map_err(|_| invalid("FLOAT"))?)
        }
        (FieldType::Float, JsonValue::Number(number)) => {
            Value::Float(number.as_f64().ok_or_else(|| invalid("FLOAT"))?)
        }
        (FieldType::Boolean, JsonValue::String(text)) => match text.to_ascii_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return Err(invalid("BOOLEAN")),
        },
        (FieldType::Boolean, JsonValue::Bool(value)) => Value::Boolean(*value),
        (FieldType::Timestamp, JsonValue::String(text)) => {
            Value::Timestamp(parse_timestamp(text).ok_or_else(|| invalid("TIMESTAMP"))?)
        }
        (FieldType::Timestamp, JsonValue::Number(number)) => {
            let seconds = number.as_f64().ok_or_else(|| invalid("TIMESTAMP"))?;
            Value::Timestamp(timestamp_from_seconds(seconds).ok_or_else(|| invalid("TIMESTAMP"))?)
        }
        (FieldType::Record, _) => return Err(invalid("RECORD")),
        (_, JsonValue::String(text)) => Value::String(text.clone()),
        (FieldType::Integer | FieldType::Float | FieldType::Boolean | FieldType::Timestamp, _) => {
            return Err(invalid(field_type.as_str()));
        }
        (_, JsonValue::Bool(value)) => Value::String(value.to_string()),
        (_, JsonValue::Number(number)) => Value::String(number.to_string()),
        (_, other) => return Err(invalid(field_type.as_str()).with_value(other.to_string())),
    };
    Ok(value)
}

// The service encodes timestamps as (possibly fractional, possibly exponent) epoch seconds.
fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    let trimmed = text.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return timestamp_from_seconds(seconds);
    }
    OffsetDateTime::parse(trimmed, &Rfc3339).ok()
}

fn timestamp_from_seconds(seconds: f64) -> Option<OffsetDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(micros * 1_000).ok()
}

fn decode_error(message: impl Into<String>, field: &str, row: u64) -> Error {
    let err = Error::new(ErrorKind::Decode).with_message(message).with_row(row);
    if field.is_empty() {
        err
    } else {
        err.with_field(field)
    }
}
