use snapmerge_core::{FieldValue, OwnerId, Record, Table};

use crate::error::StorageError;

/// Row predicate over a single column. Filters passed together are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, FieldValue),
    In(&'static str, Vec<FieldValue>),
}

impl Filter {
    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) => c,
        }
    }
}

/// Query and transaction primitives the importer runs against.
///
/// `begin`/`commit`/`rollback` bracket one atomic unit. The insert methods
/// are individually atomic: either every row of the call lands or none does,
/// which lets a caller contain a failed batch without aborting the enclosing
/// transaction.
pub trait Store {
    fn begin(&mut self) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;

    fn rollback(&mut self) -> Result<(), StorageError>;

    fn owner_exists(&self, owner: &OwnerId) -> Result<bool, StorageError>;

    fn find_many(&self, table: Table, filters: &[Filter]) -> Result<Vec<Record>, StorageError>;

    fn find_first(&self, table: Table, filters: &[Filter]) -> Result<Option<Record>, StorageError>;

    /// Insert rows, returning the listed columns of each inserted row in
    /// input order. Rows of tables with a single `id` key get a generated
    /// identifier when they carry none.
    fn insert_returning(
        &mut self,
        table: Table,
        rows: &[Record],
        returning: &[&'static str],
    ) -> Result<Vec<Record>, StorageError>;

    fn insert(&mut self, table: Table, rows: &[Record]) -> Result<usize, StorageError>;

    /// Overwrite the columns in `set` on every row matching `filters`.
    fn update(
        &mut self,
        table: Table,
        set: &Record,
        filters: &[Filter],
    ) -> Result<usize, StorageError>;
}
