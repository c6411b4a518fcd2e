//! End-to-end ingestion of one tabular source.
//!
//! contract check → row projection → schema ensure → transactional upsert.
//! The contract is checked before any row is projected and before the
//! database is touched, so a mis-shaped report writes nothing.

use std::{path::Path, time::Duration};

use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    config::LoaderConfig,
    error::{IngestError, IngestResult},
    io_utils::TableReader,
    projection::RowProjector,
    rows::Table,
    schema::SchemaManager,
    upsert::{Batch, IngestCounts, UpsertEngine},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_file: String,
    pub rows_seen: usize,
    pub rows_written: usize,
    pub columns: usize,
}

impl IngestReport {
    pub fn counts(&self) -> IngestCounts {
        IngestCounts {
            rows_seen: self.rows_seen,
            rows_written: self.rows_written,
        }
    }

    pub fn excluded(&self) -> usize {
        self.counts().excluded()
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: LoaderConfig,
}

impl Pipeline {
    pub fn new(config: LoaderConfig) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(&self.config)
    }

    pub fn engine(&self) -> UpsertEngine<'_> {
        UpsertEngine::new(&self.config)
    }

    /// Validates the header and projects every row into a batch.
    pub fn prepare(&self, table: &Table) -> IngestResult<Batch> {
        let projector =
            RowProjector::new(&self.config.contract, &self.config.booleans, &table.headers)?;
        let mut batch = Batch::new(table.row_count());
        for (idx, row) in table.rows.iter().enumerate() {
            match projector.project(row) {
                (Some(record), payload) => batch.push(record, payload),
                (None, _) => debug!("Row {} has no period or item identifier", idx + 1),
            }
        }
        Ok(batch)
    }

    pub fn ensure_schema(&self, conn: &Connection) -> IngestResult<()> {
        self.schema().ensure_schema(conn)
    }

    pub fn ingest(
        &self,
        conn: &mut Connection,
        table: &Table,
        source_file: &str,
    ) -> IngestResult<IngestReport> {
        if table.is_empty() {
            info!("{source_file} contains no data rows");
            return Ok(IngestReport {
                source_file: source_file.to_string(),
                rows_seen: 0,
                rows_written: 0,
                columns: table.column_count(),
            });
        }

        let batch = self.prepare(table)?;
        self.ensure_schema(conn)?;
        let counts = self.engine().upsert(conn, &batch, source_file)?;
        if counts.excluded() > 0 {
            warn!(
                "{} of {} row(s) in {} skipped: missing '{}' or '{}'",
                counts.excluded(),
                counts.rows_seen,
                source_file,
                self.config.contract.period_field().name,
                self.config.contract.identifier_field().name
            );
        }
        Ok(IngestReport {
            source_file: source_file.to_string(),
            rows_seen: counts.rows_seen,
            rows_written: counts.rows_written,
            columns: table.column_count(),
        })
    }

    pub fn ingest_path(
        &self,
        conn: &mut Connection,
        reader: &dyn TableReader,
        path: &Path,
    ) -> IngestResult<IngestReport> {
        let table = read_source(reader, path)?;
        let label = source_label(path);
        info!(
            "Read {} row(s) across {} column(s) from {}",
            table.row_count(),
            table.column_count(),
            label
        );
        self.ingest(conn, &table, &label)
    }
}

pub fn read_source(reader: &dyn TableReader, path: &Path) -> IngestResult<Table> {
    reader
        .read_table(path)
        .map_err(|source| IngestError::UnreadableSource {
            path: path.to_path_buf(),
            source,
        })
}

/// File name used as provenance in `source_file`.
pub fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn open_database(path: &Path) -> IngestResult<Connection> {
    let conn = Connection::open(path).map_err(IngestError::storage(format!(
        "opening database {}",
        path.display()
    )))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(IngestError::storage("configuring busy timeout"))?;
    Ok(conn)
}
