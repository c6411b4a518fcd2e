//! Plain-text table rendering for contract listings and ingestion reports.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{config::LoaderConfig, pipeline::IngestReport};

/// One line per contract field: position, canonical name, kind, role, sources.
pub fn render_contract(config: &LoaderConfig) -> String {
    let headers = ["#", "field", "kind", "role", "source"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = config
        .contract
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let role = field
                .role
                .map(|r| format!("{r:?}").to_lowercase())
                .unwrap_or_default();
            vec![
                (idx + 1).to_string(),
                field.name.clone(),
                field.kind.to_string(),
                role,
                field.source.join(" | "),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_reports(reports: &[IngestReport]) -> String {
    let headers = ["source", "rows", "written", "skipped", "columns"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = reports
        .iter()
        .map(|r| {
            vec![
                r.source_file.clone(),
                r.rows_seen.to_string(),
                r.rows_written.to_string(),
                r.excluded().to_string(),
                r.columns.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separators = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separators, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
