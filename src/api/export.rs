//! Purpose: Stream a table range out as CSV.
//! Exports: `CsvOptions`, `write_csv`, `write_csv_file`.
//! Role: Backing for `Table::to_csv` and the CLI `export` command.
//! Invariants: Columns follow the schema's flattened leaf order; nested records use dotted names.
//! Invariants: Rows are written as they arrive; the whole range is never held in memory.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::ByteRecord;
use tracing::debug;

use super::service::ApiResult;
use super::table::Table;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsvOptions {
    /// Emit a header row of column names.
    pub header: bool,
    pub delimiter: u8,
    pub start: i64,
    pub max_rows: Option<u64>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: b',',
            start: 0,
            max_rows: None,
        }
    }
}

/// Write rows of `table` to `writer`, returning the number of data rows written.
pub fn write_csv<W: Write>(table: &Table, writer: W, options: &CsvOptions) -> ApiResult<u64> {
    let schema = table.schema()?;
    let columns: Vec<&str> = schema.leaf_names().collect();
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(writer);
    let mut record = ByteRecord::with_capacity(1024, columns.len());

    if options.header {
        for name in &columns {
            record.push_field(name.as_bytes());
        }
        csv_writer.write_record(&record).map_err(csv_error)?;
    }

    let mut written = 0u64;
    for row in table.range(options.start, options.max_rows)? {
        let row = row?;
        record.clear();
        for name in &columns {
            let text = match row.get(name) {
                Some(value) => value.to_text()?,
                None => String::new(),
            };
            record.push_field(text.as_bytes());
        }
        csv_writer
            .write_record(&record)
            .map_err(|err| csv_error(err).with_row(written))?;
        written += 1;
    }
    csv_writer.flush().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to flush csv output")
            .with_source(err)
    })?;
    debug!(table = %table.reference(), rows = written, "csv export complete");
    Ok(written)
}

pub fn write_csv_file(table: &Table, path: &Path, options: &CsvOptions) -> ApiResult<u64> {
    let file = File::create(path).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to create {}", path.display()))
            .with_source(err)
    })?;
    write_csv(table, BufWriter::new(file), options)
}

fn csv_error(err: csv::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("failed to write csv record")
        .with_source(err)
}
