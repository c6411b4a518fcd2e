//! Target relation management.
//!
//! [`SchemaManager::ensure_schema`] is additive only. It creates the snapshot
//! table when absent, then checks every column and the `(period, item)`
//! unique index one by one and adds whatever is missing. Existing columns are
//! never dropped or retyped, and running it against a complete relation is a
//! no-op, so it is called before every ingestion.

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    config::LoaderConfig,
    contract::FieldKind,
    error::{IngestError, IngestResult},
};

pub const ID_COLUMN: &str = "id";
pub const LOADED_AT_COLUMN: &str = "loaded_at";
pub const SOURCE_FILE_COLUMN: &str = "source_file";
pub const PAYLOAD_COLUMN: &str = "payload";

const NOW_EXPRESSION: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Declaration used inside `CREATE TABLE`.
    pub create: String,
    /// Declaration used by `ALTER TABLE … ADD COLUMN`. SQLite refuses
    /// `NOT NULL` and non-constant defaults there, so it is looser.
    pub add: String,
}

impl ColumnDef {
    fn plain(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.to_string(),
            create: format!("{} {sql_type}", quote_ident(name)),
            add: format!("{} {sql_type}", quote_ident(name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaManager<'a> {
    config: &'a LoaderConfig,
}

impl<'a> SchemaManager<'a> {
    pub fn new(config: &'a LoaderConfig) -> Self {
        Self { config }
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn index_name(&self) -> String {
        let contract = &self.config.contract;
        format!(
            "ux_{}_{}_{}",
            self.config.table,
            contract.period_field().name,
            contract.identifier_field().name
        )
    }

    /// Every column of the relation in declaration order.
    pub fn columns(&self) -> Vec<ColumnDef> {
        let contract = &self.config.contract;
        let period = &contract.period_field().name;
        let mut columns = vec![
            ColumnDef {
                name: ID_COLUMN.to_string(),
                create: format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID_COLUMN)),
                add: format!("{} INTEGER", quote_ident(ID_COLUMN)),
            },
            ColumnDef {
                name: period.clone(),
                create: format!("{} TEXT NOT NULL", quote_ident(period)),
                add: format!("{} TEXT", quote_ident(period)),
            },
            ColumnDef {
                name: LOADED_AT_COLUMN.to_string(),
                create: format!(
                    "{} TEXT NOT NULL DEFAULT {NOW_EXPRESSION}",
                    quote_ident(LOADED_AT_COLUMN)
                ),
                add: format!("{} TEXT", quote_ident(LOADED_AT_COLUMN)),
            },
            ColumnDef::plain(SOURCE_FILE_COLUMN, "TEXT"),
        ];
        columns.extend(
            contract
                .fields()
                .iter()
                .filter(|f| f.name != *period)
                .map(|f| ColumnDef::plain(&f.name, f.kind.sql_type())),
        );
        columns.push(ColumnDef::plain(PAYLOAD_COLUMN, "TEXT"));
        columns
    }

    pub fn ensure_schema(&self, conn: &Connection) -> IngestResult<()> {
        let table = quote_ident(&self.config.table);
        let columns = self.columns();

        let body = columns
            .iter()
            .map(|c| format!("    {}", c.create))
            .collect::<Vec<_>>()
            .join(",\n");
        conn.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {table} (\n{body}\n);"))
            .map_err(IngestError::storage(format!(
                "creating table {}",
                self.config.table
            )))?;

        let existing = self.existing_columns(conn)?;
        let mut added = 0usize;
        for column in columns
            .iter()
            .filter(|c| c.name != ID_COLUMN)
            .filter(|c| !existing.iter().any(|e| e.name.eq_ignore_ascii_case(&c.name)))
        {
            match conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {};", column.add)) {
                Ok(()) => {
                    debug!("Added missing column '{}' to {}", column.name, self.config.table);
                    added += 1;
                }
                Err(err) if is_duplicate_column(&err) => {
                    debug!("Column '{}' appeared concurrently", column.name);
                }
                Err(source) => {
                    return Err(IngestError::StorageUnavailable {
                        context: format!("adding column {}", column.name),
                        source,
                    });
                }
            }
        }

        let contract = &self.config.contract;
        conn.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {table} ({}, {});",
            quote_ident(&self.index_name()),
            quote_ident(&contract.period_field().name),
            quote_ident(&contract.identifier_field().name)
        ))
        .map_err(IngestError::storage(format!(
            "creating unique index {}",
            self.index_name()
        )))?;

        if added > 0 {
            info!(
                "Schema for {} healed: {} column(s) added",
                self.config.table, added
            );
        } else {
            debug!("Schema for {} already complete", self.config.table);
        }
        Ok(())
    }

    /// Columns currently present in the relation; empty when it is absent.
    pub fn existing_columns(&self, conn: &Connection) -> IngestResult<Vec<ColumnInfo>> {
        let mut stmt = conn
            .prepare("SELECT name, type FROM pragma_table_info(?1)")
            .map_err(IngestError::storage("inspecting table columns"))?;
        let columns = stmt
            .query_map(params![self.config.table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(IngestError::storage("inspecting table columns"))?;
        Ok(columns)
    }

    pub fn table_exists(&self, conn: &Connection) -> IngestResult<bool> {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.config.table],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(IngestError::storage("looking up table"))
    }

    pub fn index_exists(&self, conn: &Connection) -> IngestResult<bool> {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![self.index_name()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(IngestError::storage("looking up unique index"))
    }

    pub fn column_kind(&self, name: &str) -> Option<FieldKind> {
        self.config.contract.field(name).map(|f| f.kind)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(message))
        if message.contains("duplicate column name"))
}
