//! Row projection: one source row → canonical record + payload.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde_json::{Map, Value as JsonValue};

use crate::{
    contract::{ColumnContract, FieldBinding},
    data::{BooleanTokens, Cell, Value, parse_cell, to_field_key},
    error::IngestResult,
};

/// Lossless snapshot of a source row keyed by normalized column label.
pub type Payload = Map<String, JsonValue>;

/// Typed view of a row. `fields` follows the contract's field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub period: NaiveDateTime,
    pub item_id: String,
    pub fields: Vec<Option<Value>>,
}

impl CanonicalRecord {
    pub fn get<'a>(&'a self, contract: &ColumnContract, name: &str) -> Option<&'a Value> {
        contract
            .fields()
            .iter()
            .position(|f| f.name == name)
            .and_then(|idx| self.fields.get(idx))
            .and_then(Option::as_ref)
    }
}

/// Projects rows of one table against a contract.
///
/// Construction renames and validates the header once, so a table that
/// breaks the contract is rejected before any row is looked at.
#[derive(Debug)]
pub struct RowProjector<'a> {
    contract: &'a ColumnContract,
    tokens: &'a BooleanTokens,
    binding: FieldBinding,
    payload_keys: Vec<String>,
}

impl<'a> RowProjector<'a> {
    pub fn new(
        contract: &'a ColumnContract,
        tokens: &'a BooleanTokens,
        headers: &[String],
    ) -> IngestResult<Self> {
        let renamed = contract.apply(headers);
        let binding = contract.bind(&renamed)?;
        Ok(Self {
            contract,
            tokens,
            binding,
            payload_keys: payload_keys(headers),
        })
    }

    pub fn payload_keys(&self) -> &[String] {
        &self.payload_keys
    }

    pub fn project(&self, row: &[Cell]) -> (Option<CanonicalRecord>, Payload) {
        (self.record(row), self.payload(row))
    }

    pub fn payload(&self, row: &[Cell]) -> Payload {
        self.payload_keys
            .iter()
            .enumerate()
            .map(|(idx, key)| {
                let value = row.get(idx).map(Cell::to_json).unwrap_or(JsonValue::Null);
                (key.clone(), value)
            })
            .collect()
    }

    /// Returns `None` when the row has no usable period or item identifier.
    pub fn record(&self, row: &[Cell]) -> Option<CanonicalRecord> {
        let fields = self
            .contract
            .fields()
            .iter()
            .zip(&self.binding.columns)
            .map(|(field, &column)| {
                row.get(column)
                    .and_then(|cell| parse_cell(cell, field.kind, self.tokens))
            })
            .collect::<Vec<_>>();

        let period = match row.get(self.binding.period).map(|c| {
            parse_cell(c, self.contract.period_field().kind, self.tokens)
        }) {
            Some(Some(Value::Timestamp(ts))) => ts,
            _ => return None,
        };
        let item_id = match row.get(self.binding.identifier).map(|c| {
            parse_cell(c, self.contract.identifier_field().kind, self.tokens)
        }) {
            Some(Some(Value::Text(id))) if !id.is_empty() => id,
            _ => return None,
        };
        Some(CanonicalRecord {
            period,
            item_id,
            fields,
        })
    }
}

/// Payload keys for a header row. Labels that normalize to the same key get
/// a numeric suffix so no column is silently overwritten.
pub fn payload_keys(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .map(|header| {
            let base = to_field_key(header);
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            }
        })
        .collect()
}
