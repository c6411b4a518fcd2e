//! Failure taxonomy for the ingestion pipeline.
//!
//! Only contract, source, and storage problems surface as errors. Cell-level
//! conversion problems degrade to `None` inside [`crate::data`], and rows
//! without a period or item identifier are dropped by
//! [`crate::projection`] and show up only as the gap between
//! `rows_seen` and `rows_written`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Required canonical columns are absent after renaming.
    #[error("Missing required columns after rename: {}", missing.join(", "))]
    ContractViolation { missing: Vec<String> },

    #[error("Unable to read source {path:?}: {source:#}")]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Storage unavailable while {context}: {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A payload could not be encoded for, or decoded from, the store.
    #[error("Payload for item {item_id} is not valid JSON: {source}")]
    CorruptPayload {
        item_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid loader configuration: {0}")]
    InvalidConfig(String),
}

impl IngestError {
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| IngestError::StorageUnavailable { context, source }
    }

    /// Short machine-friendly label used in dispatcher replies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::ContractViolation { .. } => "ContractViolation",
            IngestError::UnreadableSource { .. } => "UnreadableSource",
            IngestError::StorageUnavailable { .. } => "StorageUnavailable",
            IngestError::CorruptPayload { .. } => "CorruptPayload",
            IngestError::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
