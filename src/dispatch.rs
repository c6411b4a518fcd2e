//! Line-oriented command dispatcher.
//!
//! Each input line is one command: `/start`, `/db`, or the path of a received
//! report file. Every command gets exactly one reply string; failures are
//! reported in the reply rather than propagated, so one bad file never stops
//! the loop. A database connection is opened per command and dropped with it.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    error::IngestError,
    io_utils::{SUPPORTED_EXTENSIONS, TableReader},
    pipeline::{Pipeline, open_database, read_source, source_label},
};

/// Number of header labels echoed back when the period column is missing.
const HEADER_PREVIEW: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    DbCheck,
    Upload(PathBuf),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "/start" => Command::Start,
            "/db" => Command::DbCheck,
            "" => Command::Unknown(String::new()),
            other if other.starts_with('/') && !other[1..].contains('/') => {
                Command::Unknown(other.to_string())
            }
            other => Command::Upload(PathBuf::from(other)),
        }
    }
}

pub struct Dispatcher<'a, R: TableReader> {
    pipeline: &'a Pipeline,
    database: PathBuf,
    reader: R,
}

impl<'a, R: TableReader> Dispatcher<'a, R> {
    pub fn new(pipeline: &'a Pipeline, database: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            pipeline,
            database: database.into(),
            reader,
        }
    }

    pub fn handle(&self, command: &Command) -> String {
        match command {
            Command::Start => format!(
                "Loader ready. Send a report file ({}).",
                SUPPORTED_EXTENSIONS.iter().map(|e| format!(".{e}")).join(", ")
            ),
            Command::DbCheck => self.db_check(),
            Command::Upload(path) => self.upload(path),
            Command::Unknown(text) => format!(
                "Unrecognised input ({} char(s)): '{}'. Send /start, /db, or a report path.",
                text.chars().count(),
                text
            ),
        }
    }

    /// Answers every line of `input` on `output`; returns the number handled.
    pub fn serve<I, W>(&self, input: I, mut output: W) -> Result<usize>
    where
        I: BufRead,
        W: Write,
    {
        let mut handled = 0usize;
        for line in input.lines() {
            let line = line.context("Reading command line")?;
            if line.trim().is_empty() {
                continue;
            }
            let reply = self.handle(&Command::parse(&line));
            writeln!(output, "{reply}").context("Writing reply")?;
            output.flush().context("Flushing reply")?;
            handled += 1;
        }
        Ok(handled)
    }

    fn db_check(&self) -> String {
        let result = open_database(&self.database).and_then(|conn| {
            let schema = self.pipeline.schema();
            schema.ensure_schema(&conn)?;
            let columns = schema.existing_columns(&conn)?;
            let rows = self.pipeline.engine().count_rows(&conn)?;
            Ok((columns.len(), rows))
        });
        match result {
            Ok((columns, rows)) => format!(
                "Database available. Table: {} ({columns} column(s), {rows} row(s))",
                self.pipeline.config().table
            ),
            Err(err) => failure("Database error", &err),
        }
    }

    fn upload(&self, path: &Path) -> String {
        if !self.reader.supports(path) {
            return format!(
                "Unsupported file '{}'. Please send one of: {}",
                source_label(path),
                SUPPORTED_EXTENSIONS.iter().map(|e| format!(".{e}")).join(", ")
            );
        }

        let table = match read_source(&self.reader, path) {
            Ok(table) => table,
            Err(err) => return failure("Could not read file", &err),
        };
        if table.is_empty() {
            return "File read, but it contains 0 rows.".to_string();
        }

        let period = self.pipeline.config().contract.period_field();
        if !table.headers.iter().any(|h| period.matches_header(h)) {
            return format!(
                "File read, but no period column found (expected one of: {}).\nFirst columns: {:?}",
                period.source.iter().map(|s| format!("'{s}'")).join(", "),
                table.headers.iter().take(HEADER_PREVIEW).collect::<Vec<_>>()
            );
        }

        let label = source_label(path);
        let result = open_database(&self.database)
            .and_then(|mut conn| self.pipeline.ingest(&mut conn, &table, &label));
        match result {
            Ok(report) => {
                info!(
                    "Dispatched {}: {} seen, {} written",
                    label, report.rows_seen, report.rows_written
                );
                format!(
                    "Load complete.\nRows in file: {}\nRows written (after filters): {}\nColumns in file: {}",
                    report.rows_seen, report.rows_written, report.columns
                )
            }
            Err(err) => failure("Load failed", &err),
        }
    }
}

fn failure(prefix: &str, err: &IngestError) -> String {
    warn!("{prefix}: {err}");
    format!("{prefix}: {}: {err}", err.kind())
}
