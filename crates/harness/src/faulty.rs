use rusqlite::ffi;
use snapmerge_core::{OwnerId, Record, Table};
use snapmerge_storage::{Filter, StorageError, Store};

/// Where a `FaultyStore` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Unique-field lookups on the table.
    FindFirst(Table),
    /// Inserts into the table.
    Insert(Table),
    Update(Table),
    Commit,
}

/// A store that passes everything through except the configured fault,
/// which fails the way a broken disk would rather than as a constraint.
pub struct FaultyStore<S> {
    inner: S,
    fault: Option<Fault>,
    pub rollbacks: usize,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fault: None,
            rollbacks: 0,
        }
    }

    pub fn failing(inner: S, fault: Fault) -> Self {
        Self {
            inner,
            fault: Some(fault),
            rollbacks: 0,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, at: Fault) -> Result<(), StorageError> {
        if self.fault == Some(at) {
            return Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_IOERR),
                Some(format!("injected failure at {at:?}")),
            )));
        }
        Ok(())
    }
}

impl<S: Store> Store for FaultyStore<S> {
    fn begin(&mut self) -> Result<(), StorageError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check(Fault::Commit)?;
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.rollbacks += 1;
        self.inner.rollback()
    }

    fn owner_exists(&self, owner: &OwnerId) -> Result<bool, StorageError> {
        self.inner.owner_exists(owner)
    }

    fn find_many(&self, table: Table, filters: &[Filter]) -> Result<Vec<Record>, StorageError> {
        self.inner.find_many(table, filters)
    }

    fn find_first(&self, table: Table, filters: &[Filter]) -> Result<Option<Record>, StorageError> {
        self.check(Fault::FindFirst(table))?;
        self.inner.find_first(table, filters)
    }

    fn insert_returning(
        &mut self,
        table: Table,
        rows: &[Record],
        returning: &[&'static str],
    ) -> Result<Vec<Record>, StorageError> {
        self.check(Fault::Insert(table))?;
        self.inner.insert_returning(table, rows, returning)
    }

    fn insert(&mut self, table: Table, rows: &[Record]) -> Result<usize, StorageError> {
        self.check(Fault::Insert(table))?;
        self.inner.insert(table, rows)
    }

    fn update(
        &mut self,
        table: Table,
        set: &Record,
        filters: &[Filter],
    ) -> Result<usize, StorageError> {
        self.check(Fault::Update(table))?;
        self.inner.update(table, set, filters)
    }
}
