#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use turnover_loader::contract::{ColumnContract, FieldKind};

/// Extra report column that is not part of the contract.
pub const COMMENT_HEADER: &str = "Комментарий";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the SQLite database used by the test.
    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("snapshots.db")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a properly quoted CSV report and returns its path.
    pub fn write_report(&self, name: &str, headers: &[String], rows: &[Vec<String>]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut writer = csv::Writer::from_path(&path).expect("create report");
        writer.write_record(headers).expect("write header");
        for row in rows {
            writer.write_record(row).expect("write row");
        }
        writer.flush().expect("flush report");
        path
    }
}

/// Header of a full turnover report: every contract column plus a comment.
pub fn turnover_headers() -> Vec<String> {
    let mut headers = ColumnContract::turnover()
        .fields()
        .iter()
        .map(|f| f.source[0].clone())
        .collect::<Vec<_>>();
    headers.push(COMMENT_HEADER.to_string());
    headers
}

/// A turnover report row with plausible values for every column.
pub fn turnover_row(period: &str, code: &str, revenue: &str) -> Vec<String> {
    let mut row = ColumnContract::turnover()
        .fields()
        .iter()
        .map(|f| match f.name.as_str() {
            "period" => period.to_string(),
            "item_code" => code.to_string(),
            "revenue" => revenue.to_string(),
            _ => match f.kind {
                FieldKind::Flag => "Нет".to_string(),
                FieldKind::Measure => "1 000,5".to_string(),
                FieldKind::Text | FieldKind::Timestamp => format!("{}-{code}", f.name),
            },
        })
        .collect::<Vec<_>>();
    row.push(format!("note for {code}"));
    row
}
