use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;
use snapmerge_core::{FieldValue, OwnerId, Record, Snapshot, Table, generate_id};
use snapmerge_engine::{AggregateResult, EngineError, ImportConfig, Importer, LegacyImport};
use snapmerge_storage::{Filter, SqliteStorage, StorageError, Store};
use tempfile::TempDir;

const DB_FILE: &str = "import.db";

/// Seed for the importer's transform randomness, so suffixed values repeat
/// across runs.
pub const TRANSFORM_SEED: u64 = 7;

/// One owner with a fresh store and an importer over it.
pub struct TestInstance {
    pub owner: OwnerId,
    pub importer: Importer<SqliteStorage>,
    // Keeps a file-backed store's directory alive.
    dir: Option<TempDir>,
}

impl TestInstance {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(ImportConfig::default())
    }

    pub fn with_config(config: ImportConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Self::build(storage, config, None)
    }

    /// Same as `new`, but the store lives in a temporary file.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(DB_FILE);
        let storage = SqliteStorage::open(&path.to_string_lossy())?;
        Ok(Self::build(storage, ImportConfig::default(), Some(dir))?)
    }

    fn build(
        storage: SqliteStorage,
        config: ImportConfig,
        dir: Option<TempDir>,
    ) -> Result<Self, EngineError> {
        let owner = OwnerId::new(format!("owner-{}", generate_id()));
        storage.create_owner(&owner)?;
        let importer = Importer::with_config(storage, config)?
            .with_rng(StdRng::seed_from_u64(TRANSFORM_SEED));
        Ok(Self {
            owner,
            importer,
            dir,
        })
    }

    /// Path of the database file for instances built with `on_disk`.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.path().join(DB_FILE))
    }

    pub fn storage(&self) -> &SqliteStorage {
        self.importer.storage()
    }

    /// Register another owner in the same store.
    pub fn add_owner(&self, name: &str) -> Result<OwnerId, StorageError> {
        let owner = OwnerId::new(name);
        self.storage().create_owner(&owner)?;
        Ok(owner)
    }

    /// Import a `{ "data": { ... } }` document for this instance's owner.
    pub fn import(&mut self, document: serde_json::Value) -> Result<AggregateResult, EngineError> {
        let owner = self.owner.clone();
        self.import_as(&owner, document)
    }

    pub fn import_as(
        &mut self,
        owner: &OwnerId,
        document: serde_json::Value,
    ) -> Result<AggregateResult, EngineError> {
        let snapshot = Snapshot::from_json_value(document)?;
        Ok(self.importer.import(owner, &snapshot))
    }

    pub fn import_text(&mut self, json: &str, legacy: &mut dyn LegacyImport) -> AggregateResult {
        let owner = self.owner.clone();
        self.importer.import_json(&owner, json, legacy)
    }

    /// Write rows straight to the store as this owner, bypassing the importer.
    pub fn seed(&mut self, table: Table, rows: serde_json::Value) -> Result<usize, StorageError> {
        let owner_column = table.schema().owner_column;
        let rows: Vec<Record> = as_rows(rows)
            .into_iter()
            .map(|mut row| {
                if let Some(column) = owner_column {
                    row.insert(column.to_string(), FieldValue::Text(self.owner.to_string()));
                }
                row
            })
            .collect();
        self.importer.storage_mut().insert(table, &rows)
    }

    /// Every row of `table` belonging to this instance's owner.
    pub fn rows(&self, table: Table) -> Result<Vec<Record>, StorageError> {
        let schema = table.schema();
        let column = if schema.owner_singleton {
            "id"
        } else {
            match schema.owner_column {
                Some(column) => column,
                None => return self.storage().find_many(table, &[]),
            }
        };
        self.storage().find_many(
            table,
            &[Filter::Eq(column, FieldValue::Text(self.owner.to_string()))],
        )
    }

    pub fn row_by_client_id(
        &self,
        table: Table,
        client_id: &str,
    ) -> Result<Option<Record>, StorageError> {
        self.storage().find_first(
            table,
            &[
                Filter::Eq("client_id", client_id.into()),
                Filter::Eq("user_id", FieldValue::Text(self.owner.to_string())),
            ],
        )
    }

    pub fn count(&self, table: Table) -> Result<usize, StorageError> {
        Ok(self.rows(table)?.len())
    }
}

/// Wrap table rows into an importable document.
pub fn snapshot(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "version": 7, "data": data })
}

/// Convert a JSON object into a row.
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from(v)))
            .collect(),
        _ => Record::new(),
    }
}

fn as_rows(value: serde_json::Value) -> Vec<Record> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().map(record).collect(),
        other => vec![record(other)],
    }
}
