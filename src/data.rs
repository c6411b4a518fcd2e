//! Raw cells, typed values, and the cell normalizers.
//!
//! Every conversion in this module is total: a cell that cannot be read as the
//! requested kind yields `None` rather than an error, so a single odd value in
//! a report never aborts an ingestion.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::contract::FieldKind;

/// Largest magnitude rendered as an integer when a float has no fraction.
const INTEGRAL_RENDER_LIMIT: f64 = 1e15;

const DEFAULT_TRUTHY: &[&str] = &["1", "true", "yes", "y", "да"];
const DEFAULT_FALSY: &[&str] = &["0", "false", "no", "n", "нет"];

/// A single scalar as handed over by a tabular reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    String(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Payload representation of the cell.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::String(s) => serde_json::Value::String(s.clone()),
            Cell::Number(n) => number_to_json(*n),
            Cell::Boolean(b) => serde_json::Value::Bool(*b),
            Cell::Date(dt) => serde_json::Value::String(format_timestamp(dt)),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Boolean(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::Date(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// A canonical field after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Flag(bool),
    Measure(Decimal),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Flag(b) => b.to_string(),
            Value::Measure(d) => d.normalize().to_string(),
            Value::Timestamp(ts) => format_timestamp(ts),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Token sets recognised by [`parse_bool`]. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanTokens {
    pub truthy: Vec<String>,
    pub falsy: Vec<String>,
}

impl Default for BooleanTokens {
    fn default() -> Self {
        Self {
            truthy: DEFAULT_TRUTHY.iter().map(|t| t.to_string()).collect(),
            falsy: DEFAULT_FALSY.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl BooleanTokens {
    pub fn resolve(&self, token: &str) -> Option<bool> {
        let lowered = token.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if self.truthy.iter().any(|t| t.to_lowercase() == lowered) {
            return Some(true);
        }
        if self.falsy.iter().any(|t| t.to_lowercase() == lowered) {
            return Some(false);
        }
        None
    }
}

pub fn parse_bool(cell: &Cell, tokens: &BooleanTokens) -> Option<bool> {
    match cell {
        Cell::Boolean(b) => Some(*b),
        Cell::Number(n) if *n == 1.0 => Some(true),
        Cell::Number(n) if *n == 0.0 => Some(false),
        Cell::String(s) => tokens.resolve(s),
        _ => None,
    }
}

pub fn parse_numeric(cell: &Cell) -> Option<Decimal> {
    match cell {
        Cell::Number(n) if n.is_finite() => Decimal::from_f64(*n),
        Cell::Boolean(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
        Cell::String(s) => parse_decimal_literal(s),
        _ => None,
    }
}

/// Parses a locale-formatted number: whitespace (including non-breaking
/// spaces used as thousands separators) is dropped and `,` is the decimal
/// separator.
pub fn parse_decimal_literal(value: &str) -> Option<Decimal> {
    let cleaned = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn parse_timestamp(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::Date(dt) => Some(*dt),
        Cell::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

pub fn parse_timestamp_str(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    parse_naive_datetime(trimmed)
        .or_else(|| parse_naive_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y",
    ];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

pub fn parse_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Null => None,
        Cell::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Cell::Number(n) if !n.is_finite() => None,
        Cell::Number(n) => Some(render_number(*n)),
        Cell::Boolean(b) => Some(b.to_string()),
        Cell::Date(dt) => Some(format_timestamp(dt)),
    }
}

/// Converts a cell into the typed value for a canonical field of `kind`.
pub fn parse_cell(cell: &Cell, kind: FieldKind, tokens: &BooleanTokens) -> Option<Value> {
    match kind {
        FieldKind::Text => parse_text(cell).map(Value::Text),
        FieldKind::Flag => parse_bool(cell, tokens).map(Value::Flag),
        FieldKind::Measure => parse_numeric(cell).map(Value::Measure),
        FieldKind::Timestamp => parse_timestamp(cell).map(Value::Timestamp),
    }
}

/// Normalizes a free-text column label into a stable snake-style key.
pub fn to_field_key(label: &str) -> String {
    let replaced = label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '.' | '-' => '_',
            other => other,
        })
        .collect::<String>();
    let mut key = String::with_capacity(replaced.len());
    for ch in replaced.chars() {
        if ch == '_' && key.ends_with('_') {
            continue;
        }
        key.push(ch);
    }
    key.to_lowercase()
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

pub(crate) fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < INTEGRAL_RENDER_LIMIT {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

fn number_to_json(value: f64) -> serde_json::Value {
    if !value.is_finite() {
        return serde_json::Value::Null;
    }
    if value.fract() == 0.0 && value.abs() < INTEGRAL_RENDER_LIMIT {
        return serde_json::Value::from(value as i64);
    }
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
