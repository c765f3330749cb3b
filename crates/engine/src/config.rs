use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use snapmerge_core::Table;

use crate::error::EngineError;
use crate::plan::ConflictStrategy;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Tunables for an [`Importer`](crate::Importer).
///
/// ```toml
/// batch_size = 250
///
/// [strategies]
/// agents = "merge"
/// plugins = "modify"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Rows per insert statement group. A failing batch is counted as
    /// errors in full, so smaller batches contain failures more tightly.
    pub batch_size: usize,
    /// Per-table conflict strategy overrides keyed by table name.
    pub strategies: BTreeMap<String, ConflictStrategy>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strategies: BTreeMap::new(),
        }
    }
}

impl ImportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be at least 1".into()));
        }
        self.strategy_overrides().map(|_| ())
    }

    pub fn strategy_overrides(&self) -> Result<BTreeMap<Table, ConflictStrategy>, EngineError> {
        self.strategies
            .iter()
            .map(|(name, strategy)| {
                Table::parse(name)
                    .map(|table| (table, *strategy))
                    .map_err(|_| EngineError::Config(format!("unknown table in strategies: {name}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = ImportConfig::from_toml_str("").unwrap();
        assert_eq!(config, ImportConfig::default());
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn parses_batch_size_and_overrides() {
        let config = ImportConfig::from_toml_str(
            r#"
            batch_size = 25

            [strategies]
            agents = "merge"
            plugins = "modify"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 25);
        let overrides = config.strategy_overrides().unwrap();
        assert_eq!(overrides[&Table::Agents], ConflictStrategy::Merge);
        assert_eq!(overrides[&Table::Plugins], ConflictStrategy::Modify);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = ImportConfig::from_toml_str("batch_size = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn rejects_unknown_table_and_strategy() {
        assert!(ImportConfig::from_toml_str("[strategies]\nwidgets = \"skip\"").is_err());
        assert!(ImportConfig::from_toml_str("[strategies]\nagents = \"replace\"").is_err());
        assert!(ImportConfig::from_toml_str("batch_sise = 3").is_err());
    }
}
