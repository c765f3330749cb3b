use snapmerge_core::{CoreError, Table};
use snapmerge_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid import plan for {table}: {reason}")]
    InvalidPlan { table: Table, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("owner not found: {0}")]
    OwnerNotFound(String),

    #[error("legacy import failed: {0}")]
    Legacy(String),
}

impl EngineError {
    pub(crate) fn invalid_plan(table: Table, reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            table,
            reason: reason.into(),
        }
    }
}
