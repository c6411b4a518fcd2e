//! Loader configuration: target relation, column contract, boolean tokens.
//!
//! The configuration is fixed for the lifetime of a pipeline. It is either
//! the built-in turnover contract ([`LoaderConfig::default`]) or read from a
//! YAML file:
//!
//! ```yaml
//! table: raw_turnover_stock
//! contract:
//!   fields:
//!     - name: period
//!       source: [Period, Период]
//!       kind: timestamp
//!       role: period
//!     - name: item_code
//!       source: [Номенклатура.Код]
//!       kind: text
//!       role: identifier
//! booleans:
//!   truthy: ["1", "true", "yes", "y", "да"]
//!   falsy: ["0", "false", "no", "n", "нет"]
//! ```

use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    contract::{ColumnContract, is_sql_identifier},
    data::BooleanTokens,
    error::{IngestError, IngestResult},
};

pub const DEFAULT_TABLE: &str = "raw_turnover_stock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "LoaderConfig::default_table")]
    pub table: String,
    pub contract: ColumnContract,
    #[serde(default)]
    pub booleans: BooleanTokens,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            contract: ColumnContract::turnover(),
            booleans: BooleanTokens::default(),
        }
    }
}

impl LoaderConfig {
    pub fn new(table: &str, contract: ColumnContract) -> IngestResult<Self> {
        let config = Self {
            table: table.to_string(),
            contract,
            booleans: BooleanTokens::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn default_table() -> String {
        DEFAULT_TABLE.to_string()
    }

    pub fn validate(&self) -> IngestResult<()> {
        if !is_sql_identifier(&self.table) {
            return Err(IngestError::InvalidConfig(format!(
                "Table name '{}' is not a valid identifier",
                self.table
            )));
        }
        if self.booleans.truthy.iter().any(|t| {
            self.booleans
                .falsy
                .iter()
                .any(|f| f.to_lowercase() == t.to_lowercase())
        }) {
            return Err(IngestError::InvalidConfig(
                "A boolean token cannot be both truthy and falsy".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: LoaderConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml_string()?;
        fs::write(path, yaml).with_context(|| format!("Writing config file {path:?}"))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing config to YAML string")
    }
}
