//! Tabular input: delimiter and encoding resolution plus the CSV reader.
//!
//! Reports reach the pipeline as a [`Table`]. This module provides the
//! [`TableReader`] seam and the delimited-text implementation used by the
//! CLI and the dispatcher:
//!
//! - **Delimiter resolution**: extension-based auto-detection (`.csv` → comma,
//!   `.tsv` → tab) with manual override support.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Cell classification**: unambiguous numbers, booleans, and ISO dates are
//!   surfaced as native cells, empty fields as [`Cell::Null`], everything else
//!   as text exactly as written.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use regex::Regex;

use crate::{
    data::{Cell, parse_naive_date, parse_naive_datetime, render_number},
    rows::Table,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Extensions accepted by [`CsvTableReader`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Integers longer than this stay text so identifiers keep every digit.
const MAX_NUMERIC_DIGITS: usize = 15;

/// Anything that can turn a file on disk into a [`Table`].
pub trait TableReader {
    fn read_table(&self, path: &Path) -> Result<Table>;

    fn supports(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct CsvTableReader {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for CsvTableReader {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

impl CsvTableReader {
    pub fn new(delimiter: Option<u8>, encoding: &'static Encoding) -> Self {
        Self {
            delimiter,
            encoding,
        }
    }
}

impl TableReader for CsvTableReader {
    fn read_table(&self, path: &Path) -> Result<Table> {
        let delimiter = resolve_input_delimiter(path, self.delimiter);
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        read_table(BufReader::new(file), delimiter, self.encoding)
            .with_context(|| format!("Reading table from {path:?}"))
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|s| ext.eq_ignore_ascii_case(s))
            })
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Reads a whole delimited document into memory.
pub fn read_table<R>(reader: R, delimiter: u8, encoding: &'static Encoding) -> Result<Table>
where
    R: Read,
{
    let mut reader = open_csv_reader(reader, delimiter);
    let headers = decode_record(reader.byte_headers()?, encoding).context("Decoding header row")?;
    let width = headers.len();
    let mut table = Table::new(headers);
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", idx + 2))?;
        let decoded = decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {}", idx + 2))?;
        if decoded.len() > width {
            debug!(
                "Row {} has {} field(s); ignoring {} beyond the header",
                idx + 2,
                decoded.len(),
                decoded.len() - width
            );
        }
        let mut row = decoded
            .iter()
            .take(width)
            .map(|raw| classify_cell(raw))
            .collect::<Vec<_>>();
        row.resize(width, Cell::Null);
        table.push_row(row);
    }
    Ok(table)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Classifies a raw text field the way a spreadsheet decoder would type it.
pub fn classify_cell(raw: &str) -> Cell {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    static ISO_DATE: OnceLock<Regex> = OnceLock::new();

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    let number = NUMBER.get_or_init(|| {
        Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?$").expect("valid number regex")
    });
    // Only text that renders back identically becomes a number; `1.10` and
    // `1E3` stay text so distinct codes never collapse.
    if number.is_match(trimmed)
        && trimmed.chars().filter(char::is_ascii_digit).count() <= MAX_NUMERIC_DIGITS
        && let Ok(parsed) = trimmed.parse::<f64>()
        && render_number(parsed) == trimmed
    {
        return Cell::Number(parsed);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Cell::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Cell::Boolean(false);
    }
    let iso_date = ISO_DATE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}([ T]\d{2}:\d{2}(:\d{2}(\.\d+)?)?)?$")
            .expect("valid date regex")
    });
    if iso_date.is_match(trimmed) {
        if let Some(dt) = parse_naive_datetime(trimmed) {
            return Cell::Date(dt);
        }
        if let Some(dt) = parse_naive_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            return Cell::Date(dt);
        }
    }
    Cell::String(raw.to_string())
}
