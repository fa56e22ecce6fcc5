// Structured error kinds shared by fetch, cache, insert, and view resolution.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    NotFound,
    Validation,
    LengthUnknown,
    IndexOutOfRange,
    Precondition,
    Decode,
    PartialInsert,
    Transient,
}

impl ErrorKind {
    /// Kinds raised locally before any network effect.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::LengthUnknown
                | ErrorKind::IndexOutOfRange
                | ErrorKind::Precondition
        )
    }
}

/// One row rejected by the remote insert endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InsertFailure {
    pub index: u64,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl fmt::Display for InsertFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.index)?;
        if let Some(reason) = &self.reason {
            write!(f, " [{reason}]")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    table: Option<String>,
    field: Option<String>,
    row: Option<u64>,
    index: Option<i64>,
    value: Option<String>,
    failures: Vec<InsertFailure>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            table: None,
            field: None,
            row: None,
            index: None,
            value: None,
            failures: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn row(&self) -> Option<u64> {
        self.row
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn failures(&self) -> &[InsertFailure] {
        &self.failures
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_failures(mut self, failures: Vec<InsertFailure>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(table) = &self.table {
            write!(f, " (table: {table})")?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field: {field})")?;
        }
        if let Some(row) = self.row {
            write!(f, " (row: {row})")?;
        }
        if let Some(index) = self.index {
            write!(f, " (index: {index})")?;
        }
        if let Some(value) = &self.value {
            write!(f, " (value: {value})")?;
        }
        if !self.failures.is_empty() {
            write!(f, " (failed rows:")?;
            for failure in &self.failures {
                write!(f, " {failure};")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Validation
        | ErrorKind::LengthUnknown
        | ErrorKind::IndexOutOfRange
        | ErrorKind::Precondition => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Decode => 4,
        ErrorKind::PartialInsert => 5,
        ErrorKind::Transient => 6,
    }
}
