//! Conflict-resolving bulk write of projected rows.
//!
//! A [`Batch`] is written inside one transaction through a single prepared
//! `INSERT … ON CONFLICT (period, item) DO UPDATE` statement. On a key
//! collision every mutable column is replaced by the incoming value and
//! `loaded_at` moves to the batch's ingestion time. Any failure rolls the
//! whole batch back.

use chrono::{NaiveDateTime, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use serde::Serialize;

use crate::{
    config::LoaderConfig,
    data::{Value, format_timestamp},
    error::{IngestError, IngestResult},
    projection::{CanonicalRecord, Payload},
    schema::{LOADED_AT_COLUMN, PAYLOAD_COLUMN, SOURCE_FILE_COLUMN, quote_ident},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    /// Data rows present in the source.
    pub rows_seen: usize,
    /// Rows that had a period and an item identifier and were written.
    pub rows_written: usize,
}

impl IngestCounts {
    pub fn excluded(&self) -> usize {
        self.rows_seen.saturating_sub(self.rows_written)
    }
}

/// Eligible rows of one source plus the number of rows it contained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub rows_seen: usize,
    pub entries: Vec<(CanonicalRecord, Payload)>,
}

impl Batch {
    pub fn new(rows_seen: usize) -> Self {
        Self {
            rows_seen,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, record: CanonicalRecord, payload: Payload) {
        self.entries.push((record, payload));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A persisted snapshot row read back from the relation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub id: i64,
    pub loaded_at: String,
    pub source_file: Option<String>,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertEngine<'a> {
    config: &'a LoaderConfig,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(config: &'a LoaderConfig) -> Self {
        Self { config }
    }

    /// Columns bound by the insert statement, in parameter order.
    pub fn insert_columns(&self) -> Vec<String> {
        let period = &self.config.contract.period_field().name;
        let mut columns = vec![
            period.clone(),
            LOADED_AT_COLUMN.to_string(),
            SOURCE_FILE_COLUMN.to_string(),
        ];
        columns.extend(
            self.config
                .contract
                .fields()
                .iter()
                .filter(|f| f.name != *period)
                .map(|f| f.name.clone()),
        );
        columns.push(PAYLOAD_COLUMN.to_string());
        columns
    }

    pub fn statement(&self) -> String {
        let contract = &self.config.contract;
        let period = &contract.period_field().name;
        let identifier = &contract.identifier_field().name;
        let columns = self.insert_columns();
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != period.as_str() && c.as_str() != identifier.as_str())
            .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!(
            "INSERT INTO {table} ({column_list})\nVALUES ({placeholders})\nON CONFLICT ({period_col}, {identifier_col}) DO UPDATE SET\n    {updates}",
            table = quote_ident(&self.config.table),
            period_col = quote_ident(period),
            identifier_col = quote_ident(identifier),
        )
    }

    pub fn upsert(
        &self,
        conn: &mut Connection,
        batch: &Batch,
        source_file: &str,
    ) -> IngestResult<IngestCounts> {
        let counts = IngestCounts {
            rows_seen: batch.rows_seen,
            rows_written: batch.entries.len(),
        };
        if batch.is_empty() {
            debug!("Nothing to write for {source_file}");
            return Ok(counts);
        }

        let loaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let sql = self.statement();
        let tx = conn
            .transaction()
            .map_err(IngestError::storage("opening transaction"))?;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(IngestError::storage("preparing upsert statement"))?;
            for (idx, (record, payload)) in batch.entries.iter().enumerate() {
                let values = self.bind_values(record, payload, &loaded_at, source_file)?;
                stmt.execute(params_from_iter(values)).map_err(IngestError::storage(format!(
                    "writing row {} of {source_file}",
                    idx + 1
                )))?;
            }
        }
        tx.commit()
            .map_err(IngestError::storage("committing upsert transaction"))?;

        info!(
            "Upserted {} row(s) from {} into {}",
            counts.rows_written, source_file, self.config.table
        );
        Ok(counts)
    }

    fn bind_values(
        &self,
        record: &CanonicalRecord,
        payload: &Payload,
        loaded_at: &str,
        source_file: &str,
    ) -> IngestResult<Vec<SqlValue>> {
        let contract = &self.config.contract;
        let period_name = &contract.period_field().name;
        let mut values = vec![
            SqlValue::Text(format_timestamp(&record.period)),
            SqlValue::Text(loaded_at.to_string()),
            SqlValue::Text(source_file.to_string()),
        ];
        for (field, value) in contract.fields().iter().zip(&record.fields) {
            if field.name == *period_name {
                continue;
            }
            values.push(if field.name == contract.identifier_field().name {
                SqlValue::Text(record.item_id.clone())
            } else {
                to_sql_value(value.as_ref())
            });
        }
        let payload =
            serde_json::to_string(payload).map_err(|source| IngestError::CorruptPayload {
                item_id: record.item_id.clone(),
                source,
            })?;
        values.push(SqlValue::Text(payload));
        Ok(values)
    }

    pub fn count_rows(&self, conn: &Connection) -> IngestResult<i64> {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.config.table)),
            [],
            |row| row.get(0),
        )
        .map_err(IngestError::storage("counting rows"))
    }

    pub fn load_snapshot(
        &self,
        conn: &Connection,
        period: &NaiveDateTime,
        item_id: &str,
    ) -> IngestResult<Option<StoredSnapshot>> {
        let contract = &self.config.contract;
        let sql = format!(
            "SELECT {id}, {loaded_at}, {source_file}, {payload} FROM {table} WHERE {period_col} = ?1 AND {identifier_col} = ?2",
            id = quote_ident(crate::schema::ID_COLUMN),
            loaded_at = quote_ident(LOADED_AT_COLUMN),
            source_file = quote_ident(SOURCE_FILE_COLUMN),
            payload = quote_ident(PAYLOAD_COLUMN),
            table = quote_ident(&self.config.table),
            period_col = quote_ident(&contract.period_field().name),
            identifier_col = quote_ident(&contract.identifier_field().name),
        );
        let row = conn
            .query_row(&sql, params![format_timestamp(period), item_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .optional()
            .map_err(IngestError::storage("loading snapshot"))?;
        let Some((id, loaded_at, source_file, payload)) = row else {
            return Ok(None);
        };
        let payload = match payload {
            Some(text) => serde_json::from_str::<Payload>(&text).map_err(|source| {
                IngestError::CorruptPayload {
                    item_id: item_id.to_string(),
                    source,
                }
            })?,
            None => Payload::new(),
        };
        Ok(Some(StoredSnapshot {
            id,
            loaded_at,
            source_file,
            payload,
        }))
    }
}

fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(Value::Text(s)) => SqlValue::Text(s.clone()),
        Some(Value::Flag(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Measure(d)) => SqlValue::Text(d.normalize().to_string()),
        Some(Value::Timestamp(ts)) => SqlValue::Text(format_timestamp(ts)),
    }
}
