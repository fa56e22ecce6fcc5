//! Purpose: Model remote table schemas and their flattened (dotted-path) view.
//! Exports: `FieldType`, `FieldMode`, `SchemaField`, `FlatField`, `Schema`.
//! Role: Shared by row decoding, insert validation, and export column ordering.
//! Invariants: Flattened names are unique; lookup by name and by position agree.
//! Invariants: RECORD fields appear before their children in the flattened order.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Bytes,
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    #[serde(alias = "BOOL")]
    Boolean,
    Timestamp,
    Date,
    Time,
    Datetime,
    #[serde(alias = "STRUCT")]
    Record,
    #[serde(other)]
    Unknown,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
            FieldType::Record => "RECORD",
            FieldType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.to_ascii_uppercase().as_str() {
            "STRING" => FieldType::String,
            "BYTES" => FieldType::Bytes,
            "INTEGER" | "INT64" => FieldType::Integer,
            "FLOAT" | "FLOAT64" => FieldType::Float,
            "BOOLEAN" | "BOOL" => FieldType::Boolean,
            "TIMESTAMP" => FieldType::Timestamp,
            "DATE" => FieldType::Date,
            "TIME" => FieldType::Time,
            "DATETIME" => FieldType::Datetime,
            "RECORD" | "STRUCT" => FieldType::Record,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    #[default]
    Nullable,
    Repeated,
}

/// One field of a table definition as the service describes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn record(name: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self {
            fields,
            ..Self::new(name, FieldType::Record)
        }
    }

    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlatField {
    pub name: String,
    pub field_type: FieldType,
    pub mode: FieldMode,
    pub description: Option<String>,
    pub depth: usize,
}

impl FlatField {
    pub fn is_leaf(&self) -> bool {
        self.field_type != FieldType::Record
    }
}

#[derive(Clone, Debug)]
pub struct Schema {
    definition: Vec<SchemaField>,
    flattened: Vec<FlatField>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(definition: Vec<SchemaField>) -> Result<Self, Error> {
        let mut schema = Self {
            definition: Vec::new(),
            flattened: Vec::new(),
            by_name: HashMap::new(),
        };
        schema.populate(&definition, "", 0)?;
        schema.definition = definition;
        Ok(schema)
    }

    fn populate(&mut self, fields: &[SchemaField], prefix: &str, depth: usize) -> Result<(), Error> {
        for field in fields {
            let name = format!("{prefix}{}", field.name);
            if self.by_name.contains_key(&name) {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("duplicate field name in schema")
                    .with_field(name));
            }
            self.by_name.insert(name.clone(), self.flattened.len());
            self.flattened.push(FlatField {
                name: name.clone(),
                field_type: field.field_type,
                mode: field.mode,
                description: field.description.clone(),
                depth,
            });
            if field.field_type == FieldType::Record {
                self.populate(&field.fields, &format!("{name}."), depth + 1)?;
            }
        }
        Ok(())
    }

    /// Top-level fields in service order, with nested children intact.
    pub fn definition(&self) -> &[SchemaField] {
        &self.definition
    }

    pub fn fields(&self) -> &[FlatField] {
        &self.flattened
    }

    pub fn len(&self) -> usize {
        self.flattened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FlatField> {
        self.by_name.get(name).map(|pos| &self.flattened[*pos])
    }

    pub fn field_at(&self, position: usize) -> Option<&FlatField> {
        self.flattened.get(position)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Names of the fields that carry values in a decoded row.
    pub fn leaf_names(&self) -> impl Iterator<Item = &str> {
        self.flattened
            .iter()
            .filter(|field| field.is_leaf())
            .map(|field| field.name.as_str())
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        if self.flattened.len() != other.flattened.len() {
            return false;
        }
        self.flattened.iter().all(|field| {
            other.field(&field.name).is_some_and(|theirs| {
                theirs.field_type == field.field_type && theirs.mode == field.mode
            })
        })
    }
}
