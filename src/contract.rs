//! Column contract: source label → canonical field mapping.
//!
//! A [`ColumnContract`] lists every canonical field a report must provide,
//! the source labels it may appear under, and how its cells are typed. Every
//! field in the contract is required; columns that the contract does not
//! mention are carried only in the row payload.

use std::{collections::HashSet, fmt, sync::OnceLock};

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

/// Columns owned by the store itself; contract fields may not reuse them.
pub const RESERVED_COLUMNS: &[&str] = &["id", "loaded_at", "source_file", "payload"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Flag,
    Measure,
    Timestamp,
}

impl FieldKind {
    /// Column declaration used when the field is materialised in SQLite.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Flag => "INTEGER",
            FieldKind::Measure => "NUMERIC",
            FieldKind::Timestamp => "TEXT",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::Text => "text",
            FieldKind::Flag => "flag",
            FieldKind::Measure => "measure",
            FieldKind::Timestamp => "timestamp",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Period,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(alias = "sources")]
    pub source: Vec<String>,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<FieldRole>,
}

impl FieldSpec {
    pub fn new(source: &str, name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            source: vec![source.to_string()],
            kind,
            role: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.source.push(alias.to_string());
        self
    }

    pub fn with_role(mut self, role: FieldRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn matches_header(&self, header: &str) -> bool {
        let header = header.trim();
        self.source.iter().any(|s| s.trim() == header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContractDef", into = "ContractDef")]
pub struct ColumnContract {
    fields: Vec<FieldSpec>,
    period: usize,
    identifier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContractDef {
    fields: Vec<FieldSpec>,
}

impl TryFrom<ContractDef> for ColumnContract {
    type Error = IngestError;

    fn try_from(def: ContractDef) -> IngestResult<Self> {
        ColumnContract::new(def.fields)
    }
}

impl From<ColumnContract> for ContractDef {
    fn from(contract: ColumnContract) -> Self {
        ContractDef {
            fields: contract.fields,
        }
    }
}

/// Positions of the contract fields inside a renamed header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub period: usize,
    pub identifier: usize,
    /// Column index for each contract field, in contract order.
    pub columns: Vec<usize>,
}

impl ColumnContract {
    pub fn new(fields: Vec<FieldSpec>) -> IngestResult<Self> {
        if fields.is_empty() {
            return Err(IngestError::InvalidConfig(
                "Contract must define at least one field".to_string(),
            ));
        }
        let mut names = HashSet::new();
        let mut sources = HashSet::new();
        for field in &fields {
            if !is_sql_identifier(&field.name) {
                return Err(IngestError::InvalidConfig(format!(
                    "Field name '{}' is not a valid column identifier",
                    field.name
                )));
            }
            // SQLite identifiers are case-insensitive.
            let folded = field.name.to_ascii_lowercase();
            if RESERVED_COLUMNS.contains(&folded.as_str()) {
                return Err(IngestError::InvalidConfig(format!(
                    "Field name '{}' is reserved",
                    field.name
                )));
            }
            if !names.insert(folded) {
                return Err(IngestError::InvalidConfig(format!(
                    "Field name '{}' is declared more than once",
                    field.name
                )));
            }
            if field.source.is_empty() {
                return Err(IngestError::InvalidConfig(format!(
                    "Field '{}' has no source column",
                    field.name
                )));
            }
            for source in &field.source {
                if !sources.insert(source.trim()) {
                    return Err(IngestError::InvalidConfig(format!(
                        "Source column '{source}' is mapped more than once"
                    )));
                }
            }
        }
        let period = single_role(&fields, FieldRole::Period)?;
        let identifier = single_role(&fields, FieldRole::Identifier)?;
        if fields[period].kind != FieldKind::Timestamp {
            return Err(IngestError::InvalidConfig(format!(
                "Period field '{}' must be a timestamp",
                fields[period].name
            )));
        }
        if fields[identifier].kind != FieldKind::Text {
            return Err(IngestError::InvalidConfig(format!(
                "Identifier field '{}' must be text",
                fields[identifier].name
            )));
        }
        Ok(Self {
            fields,
            period,
            identifier,
        })
    }

    /// Detailed stock/turnover report contract.
    pub fn turnover() -> Self {
        use FieldKind::{Flag, Measure, Text, Timestamp};
        let fields = vec![
            FieldSpec::new("Номенклатура", "item", Text),
            FieldSpec::new("Номенклатура.Код", "item_code", Text).with_role(FieldRole::Identifier),
            FieldSpec::new("Номенклатура.Артикул", "article", Text),
            FieldSpec::new("Номенклатура.Сегмент номенклатуры", "segment", Text),
            FieldSpec::new("Номенклатура.Сегмент номенклатуры.Родитель", "pg", Text),
            FieldSpec::new("Номенклатура.Группа управления запасами", "guz", Text),
            FieldSpec::new("Номенклатура.Группа аналитического учета", "gau", Text),
            FieldSpec::new("Номенклатура.Основной менеджер", "manager", Text),
            FieldSpec::new("Номенклатура.Основной поставщик", "supplier", Text),
            FieldSpec::new("Неликвид", "nonliq", Flag),
            FieldSpec::new("Н-решение", "n_descn", Text),
            FieldSpec::new("Средний остаток, шт", "av_stock_qty", Measure),
            FieldSpec::new("Расход, шт", "sales_qty", Measure),
            FieldSpec::new("Выручка", "revenue", Measure),
            FieldSpec::new("Конечный остаток (товары)", "curr_stock_qty", Measure),
            FieldSpec::new("Себестоимость (из отч. себ)", "curr_stock_cost", Measure),
            FieldSpec::new("Себестоимость продаж за период", "sales_cost", Measure),
            FieldSpec::new("Себестоимость среднего остатка", "av_stock_cost", Measure),
            FieldSpec::new("Оборачиваемость, руб", "turns_rub", Measure),
            FieldSpec::new("Свободный остаток текущий", "free_stock_q_ty", Measure),
            FieldSpec::new("Себестоимость свободного остатка", "free_stock_cost", Measure),
            FieldSpec::new("Ранг", "rank_turns", Text),
            FieldSpec::new("Period", "period", Timestamp)
                .with_alias("Период")
                .with_role(FieldRole::Period),
            FieldSpec::new("Рзв", "rezerv_qty", Measure),
            FieldSpec::new("Себ.Рзв", "rezerv_cost", Measure),
            FieldSpec::new("Уровень", "level_turns", Text),
            FieldSpec::new("Вал.Пр", "margin", Measure),
            FieldSpec::new("Рент. %", "prof_pc", Measure),
            FieldSpec::new("Рент.Тов.Зап", "prof_stock", Measure),
        ];
        Self::new(fields).expect("valid built-in turnover contract")
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn period_field(&self) -> &FieldSpec {
        &self.fields[self.period]
    }

    pub fn identifier_field(&self) -> &FieldSpec {
        &self.fields[self.identifier]
    }

    pub fn required_canonical_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Renames mapped headers to their canonical names. Unmapped headers are
    /// returned unchanged. When a field lists several aliases and more than
    /// one is present, only the first occurrence is renamed.
    pub fn apply(&self, headers: &[String]) -> Vec<String> {
        let mut claimed = HashSet::new();
        headers
            .iter()
            .map(|header| {
                match self
                    .fields
                    .iter()
                    .find(|f| f.matches_header(header) && !claimed.contains(f.name.as_str()))
                {
                    Some(field) => {
                        claimed.insert(field.name.as_str());
                        field.name.clone()
                    }
                    None => header.clone(),
                }
            })
            .collect()
    }

    /// Fails with the sorted list of required names absent from `renamed`.
    pub fn validate(&self, renamed: &[String]) -> IngestResult<()> {
        let present = renamed.iter().map(String::as_str).collect::<HashSet<_>>();
        let missing = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !present.contains(name))
            .sorted()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestError::ContractViolation { missing })
        }
    }

    /// Validates `renamed` and resolves the column index of every field.
    pub fn bind(&self, renamed: &[String]) -> IngestResult<FieldBinding> {
        self.validate(renamed)?;
        let columns = self
            .fields
            .iter()
            .map(|f| {
                renamed
                    .iter()
                    .position(|h| *h == f.name)
                    .ok_or_else(|| IngestError::ContractViolation {
                        missing: vec![f.name.clone()],
                    })
            })
            .collect::<IngestResult<Vec<_>>>()?;
        Ok(FieldBinding {
            period: columns[self.period],
            identifier: columns[self.identifier],
            columns,
        })
    }
}

fn single_role(fields: &[FieldSpec], role: FieldRole) -> IngestResult<usize> {
    let positions = fields
        .iter()
        .positions(|f| f.role == Some(role))
        .collect::<Vec<_>>();
    match positions.as_slice() {
        [single] => Ok(*single),
        [] => Err(IngestError::InvalidConfig(format!(
            "Contract must mark one field with role {role:?}"
        ))),
        _ => Err(IngestError::InvalidConfig(format!(
            "Contract marks more than one field with role {role:?}"
        ))),
    }
}

pub fn is_sql_identifier(value: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
        .is_match(value)
}
