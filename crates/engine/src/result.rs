use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use snapmerge_core::Table;
use snapmerge_storage::StorageError;

use crate::error::EngineError;
use crate::state::ConflictRecord;

/// Per-table outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub added: usize,
    pub updated: usize,
    pub skips: usize,
    pub errors: usize,
    pub conflict_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintDetail {
    pub table: String,
    pub field: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub message: String,
    pub details: Option<ConstraintDetail>,
    /// Rendered underlying error.
    pub cause: String,
}

impl ImportFailure {
    /// Best-effort classification: the violated constraint when the storage
    /// layer identified one, a generic message otherwise.
    pub fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::Storage(StorageError::UniqueViolation {
                table,
                field,
                value,
            }) => Self {
                message: match value {
                    Some(v) => format!("{table}.{field} value {v:?} already exists"),
                    None => format!("{table}.{field} already exists"),
                },
                details: Some(ConstraintDetail {
                    table: table.clone(),
                    field: field.clone(),
                    value: value.clone(),
                }),
                cause: err.to_string(),
            },
            _ => Self {
                message: "import failed".to_string(),
                details: None,
                cause: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub success: bool,
    pub results: BTreeMap<String, ImportResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ImportFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
}

impl AggregateResult {
    pub fn succeeded(results: BTreeMap<Table, ImportResult>, conflicts: Vec<ConflictRecord>) -> Self {
        Self {
            success: true,
            results: results
                .into_iter()
                .map(|(table, result)| (table.as_str().to_string(), result))
                .collect(),
            error: None,
            conflicts,
        }
    }

    /// Nothing was committed, so every table reports zero effect.
    pub fn failed(tables: impl IntoIterator<Item = Table>, err: &EngineError) -> Self {
        Self {
            success: false,
            results: tables
                .into_iter()
                .map(|table| (table.as_str().to_string(), ImportResult::default()))
                .collect(),
            error: Some(ImportFailure::from_error(err)),
            conflicts: Vec::new(),
        }
    }

    pub fn result(&self, table: Table) -> Option<&ImportResult> {
        self.results.get(table.as_str())
    }

    pub fn total_added(&self) -> usize {
        self.results.values().map(|r| r.added).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.results.values().map(|r| r.errors).sum()
    }
}
