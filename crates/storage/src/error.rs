use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// A row collided with a unique constraint. `field` is the first column
    /// of the violated constraint, `value` that column's value in the
    /// offending row when it had one.
    #[error("unique constraint violated on {table}.{field}")]
    UniqueViolation {
        table: String,
        field: String,
        value: Option<String>,
    },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("core error: {0}")]
    Core(#[from] snapmerge_core::CoreError),
}

impl StorageError {
    /// The store rejected the data itself, as opposed to failing to run.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StorageError::UniqueViolation { .. } | StorageError::ConstraintViolation(_)
        )
    }
}
