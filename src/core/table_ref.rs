// Table references and the `@<ms>` / `@<start>-<stop>` decoration grammar.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decoration {
    Snapshot(i64),
    Window { start: i64, stop: i64 },
}

impl Decoration {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = || {
            Error::new(ErrorKind::Validation)
                .with_message("invalid table decorator")
                .with_value(raw)
        };
        let body = raw.strip_prefix('@').ok_or_else(invalid)?;
        let (start, rest) = split_signed_int(body).ok_or_else(invalid)?;
        if rest.is_empty() {
            return Ok(Decoration::Snapshot(start));
        }
        let rest = rest.strip_prefix('-').ok_or_else(invalid)?;
        let (stop, tail) = split_signed_int(rest).ok_or_else(invalid)?;
        if !tail.is_empty() {
            return Err(invalid());
        }
        Ok(Decoration::Window { start, stop })
    }
}

impl fmt::Display for Decoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoration::Snapshot(at) => write!(f, "@{at}"),
            Decoration::Window { start, stop } => write!(f, "@{start}-{stop}"),
        }
    }
}

fn split_signed_int(text: &str) -> Option<(i64, &str)> {
    let sign_len = usize::from(text.starts_with('-'));
    let digits = text[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

/// Immutable `project:dataset.table[@decorator]` identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableReference {
    project: String,
    dataset: String,
    table: String,
    decoration: Option<Decoration>,
}

impl TableReference {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
            decoration: None,
        }
    }

    /// Accepts `project:dataset.table`, `project.dataset.table`, or `dataset.table`
    /// (with `default_project`), optionally bracketed and optionally decorated.
    pub fn parse(name: &str, default_project: Option<&str>) -> Result<Self, Error> {
        let invalid = |message: &str| {
            Error::new(ErrorKind::Validation)
                .with_message(message.to_string())
                .with_value(name)
        };
        let trimmed = name.trim();
        let trimmed = trimmed
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(trimmed);
        let (path, decoration) = match trimmed.find('@') {
            Some(at) => (&trimmed[..at], Some(Decoration::parse(&trimmed[at..])?)),
            None => (trimmed, None),
        };

        let (project, rest) = match path.split_once(':') {
            Some((project, rest)) => (Some(project), rest),
            None => (None, path),
        };
        let parts: Vec<&str> = rest.split('.').collect();
        let (project, dataset, table) = match (project, parts.as_slice()) {
            (Some(project), [dataset, table]) => (project, *dataset, *table),
            (None, [project, dataset, table]) => (*project, *dataset, *table),
            (None, [dataset, table]) => {
                let project = default_project
                    .ok_or_else(|| invalid("table name has no project and no default project is set"))?;
                (project, *dataset, *table)
            }
            _ => return Err(invalid("table name must be project:dataset.table or dataset.table")),
        };
        if [project, dataset, table].iter().any(|part| part.is_empty()) {
            return Err(invalid("table name has an empty component"));
        }

        Ok(Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
            decoration,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn decoration(&self) -> Option<Decoration> {
        self.decoration
    }

    pub fn is_decorated(&self) -> bool {
        self.decoration.is_some()
    }

    /// Decorator suffix, empty for the live table.
    pub fn decorator(&self) -> String {
        self.decoration.map(|d| d.to_string()).unwrap_or_default()
    }

    /// Table id as addressed on the wire, decorator included.
    pub fn table_id(&self) -> String {
        format!("{}{}", self.table, self.decorator())
    }

    pub fn full_name(&self) -> String {
        format!("{}:{}.{}", self.project, self.dataset, self.table_id())
    }

    /// The same table without any decoration.
    pub fn undecorated(&self) -> Self {
        Self {
            decoration: None,
            ..self.clone()
        }
    }

    pub fn decorate(&self, decoration: Decoration) -> Result<Self, Error> {
        if self.is_decorated() {
            return Err(Error::new(ErrorKind::Precondition)
                .with_message("table reference is already decorated")
                .with_table(self.full_name()));
        }
        Ok(Self {
            decoration: Some(decoration),
            ..self.clone()
        })
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}
