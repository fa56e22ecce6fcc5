//! Purpose: `tabula` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs one table command, emits JSON or CSV on stdout.
//! Invariants: Row output is JSON lines; metadata and summaries are single JSON objects.
//! Invariants: Errors are JSON on stderr when stderr is not a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use tabula::api::{
    CsvOptions, DEFAULT_BASE_URL, Error, ErrorKind, InsertOptions, InsertSource, PointInTime,
    RemoteService, RowCache, Table, TableConfig, TableReference, TableService, ViewResolver,
    records_from_jsonl, to_exit_code, write_csv_file,
};

#[derive(Parser)]
#[command(
    name = "tabula",
    version,
    about = "Paged reads, random access, and batched inserts for remote tables",
    after_help = r#"EXAMPLES
  $ tabula info myproject:logs.events
  $ tabula rows logs.events --project myproject --start -10
  $ tabula get myproject:logs.events 0 -1
  $ tabula insert myproject:logs.events --file events.jsonl --index
  $ tabula export myproject:logs.events --output events.csv
  $ tabula decorate myproject:logs.events --since 2h --until 1h

NOTES
  - Table names: project:dataset.table, project.dataset.table, or dataset.table with --project
  - Times: RFC 3339 timestamps or ages such as 90s, 15m, 2h, 3d
  - RUST_LOG controls diagnostics on stderr (default: warn)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, global = true, env = "TABULA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    #[arg(long, global = true, env = "TABULA_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, global = true, env = "TABULA_PROJECT", help = "Project for dataset.table names")]
    project: Option<String>,
    #[arg(long, global = true, help = "Rows requested per page")]
    page_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show table metadata and schema
    Info { table: String },
    /// Stream rows as JSON lines
    Rows {
        table: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
        #[arg(long, help = "Stop after this many rows")]
        max: Option<u64>,
    },
    /// Fetch rows by position; negative positions count from the end
    Get {
        table: String,
        #[arg(required = true, allow_negative_numbers = true)]
        indices: Vec<i64>,
    },
    /// Insert JSON lines records from a file or stdin
    Insert {
        table: String,
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
        #[arg(long, help = "Add an INTEGER column holding each record's ordinal")]
        index: bool,
        #[arg(long, requires = "index")]
        index_name: Option<String>,
    },
    /// Write rows as CSV to stdout or a file
    Export {
        table: String,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[arg(long)]
        no_header: bool,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        start: i64,
        #[arg(long)]
        max: Option<u64>,
    },
    /// Print the snapshot or window name of a table
    #[command(group(ArgGroup::new("view").required(true).args(["at", "since"])))]
    Decorate {
        table: String,
        #[arg(long, help = "Snapshot as of this time")]
        at: Option<String>,
        #[arg(long, help = "Window of rows added since this time")]
        since: Option<String>,
        #[arg(long, requires = "since", help = "Window end (default: now)")]
        until: Option<String>,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                let message = err.to_string();
                let summary = message.lines().next().unwrap_or("invalid arguments");
                return Err(Error::new(ErrorKind::Validation)
                    .with_message(summary.trim_start_matches("error: ").to_string()));
            }
        },
    };

    let mut config = TableConfig::new();
    if let Some(page_size) = cli.page_size {
        config = config.with_page_size(page_size);
    }
    config.validate()?;

    let context = Context {
        base_url: cli.base_url,
        token: cli.token,
        project: cli.project,
        config,
    };
    dispatch(cli.command, &context)?;
    Ok(0)
}

struct Context {
    base_url: String,
    token: Option<String>,
    project: Option<String>,
    config: TableConfig,
}

impl Context {
    fn open(&self, name: &str) -> Result<Table, Error> {
        let mut service = RemoteService::new(self.base_url.clone())?;
        if let Some(token) = &self.token {
            service = service.with_token(token.clone());
        }
        if let Some(project) = &self.project {
            service = service.with_default_project(project.clone());
        }
        let reference = TableReference::parse(name, service.default_project())?;
        let service: Arc<dyn TableService> = Arc::new(service);
        Table::new(service, reference).with_config(self.config.clone())
    }
}

fn dispatch(command: Command, context: &Context) -> Result<(), Error> {
    match command {
        Command::Info { table } => {
            let table = context.open(&table)?;
            emit_json(&info_json(&table)?)
        }
        Command::Rows { table, start, max } => {
            let table = context.open(&table)?;
            let mut out = BufWriter::new(io::stdout().lock());
            for row in table.range(start, max)? {
                write_json_line(&mut out, &row?.to_json()?)?;
            }
            out.flush().map_err(write_error)
        }
        Command::Get { table, indices } => {
            let table = context.open(&table)?;
            let mut cache = RowCache::new();
            let mut out = BufWriter::new(io::stdout().lock());
            for index in indices {
                write_json_line(&mut out, &cache.get(&table, index)?.to_json()?)?;
            }
            out.flush().map_err(write_error)
        }
        Command::Insert {
            table,
            file,
            index,
            index_name,
        } => {
            let table = context.open(&table)?;
            let records = match &file {
                Some(path) => {
                    let file = File::open(path).map_err(|err| {
                        Error::new(ErrorKind::Validation)
                            .with_message(format!("failed to open {}", path.display()))
                            .with_source(err)
                    })?;
                    records_from_jsonl(BufReader::new(file))?
                }
                None => records_from_jsonl(io::stdin().lock())?,
            };
            let options = if index {
                InsertOptions::new().with_index(index_name)
            } else {
                InsertOptions::new()
            };
            let summary = table.insert(&InsertSource::Records(records), options)?;
            emit_json(&json!({
                "table": table.full_name(),
                "batch_id": summary.batch_id,
                "rows": summary.rows,
                "batches": summary.batches,
            }))
        }
        Command::Export {
            table,
            output,
            no_header,
            start,
            max,
        } => {
            let table = context.open(&table)?;
            let options = CsvOptions {
                header: !no_header,
                start,
                max_rows: max,
                ..CsvOptions::default()
            };
            match output {
                Some(path) => {
                    let rows = write_csv_file(&table, &path, &options)?;
                    emit_json(&json!({
                        "table": table.full_name(),
                        "path": path.display().to_string(),
                        "rows": rows,
                    }))
                }
                None => table.to_csv(io::stdout().lock(), &options).map(|_| ()),
            }
        }
        Command::Decorate {
            table,
            at,
            since,
            until,
        } => {
            let reference = TableReference::parse(&table, context.project.as_deref())?;
            let resolver = ViewResolver::new(context.config.max_snapshot_age);
            let decorated = match (at, since) {
                (Some(at), _) => resolver.snapshot(&reference, parse_point_in_time(&at)?)?,
                (None, Some(since)) => {
                    let end = until.as_deref().map(parse_point_in_time).transpose()?;
                    resolver.window(&reference, parse_point_in_time(&since)?, end)?
                }
                (None, None) => {
                    return Err(Error::new(ErrorKind::Validation)
                        .with_message("decorate needs --at or --since"));
                }
            };
            emit_json(&json!({ "table": decorated.full_name() }))
        }
    }
}

fn info_json(table: &Table) -> Result<Value, Error> {
    let metadata = table.metadata()?;
    let schema = serde_json::to_value(metadata.schema.clone().unwrap_or_default()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode schema")
            .with_source(err)
    })?;
    Ok(json!({
        "table": table.full_name(),
        "rows": metadata.num_rows,
        "bytes": metadata.num_bytes,
        "created": metadata.created_on().and_then(format_time),
        "modified": metadata.modified_on().and_then(format_time),
        "expires": metadata.expires_on().and_then(format_time),
        "friendly_name": metadata.friendly_name,
        "description": metadata.description,
        "schema": schema,
    }))
}

fn format_time(value: OffsetDateTime) -> Option<String> {
    value.format(&Rfc3339).ok()
}

/// RFC 3339 timestamps are absolute; `<n>[ms|s|m|h|d]` means that long ago.
fn parse_point_in_time(raw: &str) -> Result<PointInTime, Error> {
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(PointInTime::Absolute(at));
    }
    let invalid = || {
        Error::new(ErrorKind::Validation)
            .with_message("expected an RFC 3339 time or an age like 90s, 15m, 2h, 3d")
            .with_value(raw)
    };
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (amount, unit) = raw.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;
    let age = match unit {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(amount.checked_mul(3_600).ok_or_else(invalid)?),
        "d" => Duration::from_secs(amount.checked_mul(86_400).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(PointInTime::ago(age))
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("failed to write output")
        .with_source(err)
}

fn write_json_line<W: Write>(out: &mut W, value: &Value) -> Result<(), Error> {
    serde_json::to_writer(&mut *out, value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode json")
            .with_source(err)
    })?;
    out.write_all(b"\n").map_err(write_error)
}

fn emit_json(value: &Value) -> Result<(), Error> {
    let mut out = io::stdout().lock();
    write_json_line(&mut out, value)?;
    out.flush().map_err(write_error)
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {err}");
        for cause in error_causes(err) {
            eprintln!("  caused by: {cause}");
        }
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_causes(err: &Error) -> Vec<String> {
    use std::error::Error as _;
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(field) = err.field() {
        inner.insert("field".to_string(), json!(field));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    if let Some(value) = err.value() {
        inner.insert("value".to_string(), json!(value));
    }
    if !err.failures().is_empty() {
        let failures: Vec<Value> = err
            .failures()
            .iter()
            .map(|failure| {
                json!({
                    "index": failure.index,
                    "reason": failure.reason,
                    "message": failure.message,
                })
            })
            .collect();
        inner.insert("failures".to_string(), Value::Array(failures));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}
