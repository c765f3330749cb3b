pub mod config;
pub mod error;
pub mod legacy;
pub mod plan;
pub mod precheck;
pub mod result;
pub mod state;
pub mod table_importer;
pub mod transform;

pub use config::ImportConfig;
pub use error::EngineError;
pub use legacy::{LegacyImport, import_legacy, is_legacy_payload};
pub use plan::{ConflictStrategy, ImportPlan, ImportPlanRegistry, Relation};
pub use precheck::LOOKUP_CHUNK_SIZE;
pub use result::{AggregateResult, ConstraintDetail, ImportFailure, ImportResult};
pub use state::{ConflictLog, ConflictRecord, IdentifierMap, ImportContext};
pub use table_importer::{Disposition, TableImporter};
pub use transform::Transform;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{info, warn};

use snapmerge_core::{OwnerId, Snapshot, Table};
use snapmerge_storage::Store;

/// Runs a snapshot import against a store: precheck, then every plan's
/// table import inside one transaction.
pub struct Importer<S: Store> {
    storage: S,
    registry: ImportPlanRegistry,
    config: ImportConfig,
    rng: Box<dyn RngCore + Send>,
}

impl<S: Store> Importer<S> {
    pub fn new(storage: S) -> Result<Self, EngineError> {
        Self::with_config(storage, ImportConfig::default())
    }

    pub fn with_config(storage: S, config: ImportConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let registry =
            ImportPlanRegistry::standard()?.with_strategy_overrides(&config.strategy_overrides()?);
        Ok(Self {
            storage,
            registry,
            config,
            rng: Box::new(StdRng::from_entropy()),
        })
    }

    /// Replace the plan registry. Configured strategy overrides are applied
    /// to the new plans.
    pub fn with_registry(mut self, registry: ImportPlanRegistry) -> Result<Self, EngineError> {
        self.registry = registry.with_strategy_overrides(&self.config.strategy_overrides()?);
        Ok(self)
    }

    /// Randomness source for field transforms.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn registry(&self) -> &ImportPlanRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import `snapshot` for `owner`. Either every table's effect commits or
    /// none does; the result says which.
    pub fn import(&mut self, owner: &OwnerId, snapshot: &Snapshot) -> AggregateResult {
        let mut ctx = ImportContext::new(owner.clone());
        match self.run(&mut ctx, snapshot) {
            Ok(results) => {
                if !ctx.conflicts.is_empty() {
                    info!(owner = %owner, conflicts = ctx.conflicts.len(), "import finished with conflicts");
                }
                AggregateResult::succeeded(results, ctx.conflicts.into_records())
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "import failed; nothing committed");
                AggregateResult::failed(self.registry.tables(), &e)
            }
        }
    }

    /// Parse and import a JSON export. Older exports are handed to `legacy`.
    pub fn import_json(
        &mut self,
        owner: &OwnerId,
        json: &str,
        legacy: &mut dyn LegacyImport,
    ) -> AggregateResult {
        let payload: serde_json::Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                let err = EngineError::Core(e.into());
                return AggregateResult::failed(self.registry.tables(), &err);
            }
        };
        if is_legacy_payload(&payload) {
            info!(owner = %owner, "routing export to legacy importer");
            return import_legacy(legacy, owner, &payload);
        }
        match Snapshot::from_json_value(payload) {
            Ok(snapshot) => self.import(owner, &snapshot),
            Err(e) => AggregateResult::failed(self.registry.tables(), &EngineError::Core(e)),
        }
    }

    pub(crate) fn run(
        &mut self,
        ctx: &mut ImportContext,
        snapshot: &Snapshot,
    ) -> Result<BTreeMap<Table, ImportResult>, EngineError> {
        if !self.storage.owner_exists(&ctx.owner)? {
            return Err(EngineError::OwnerNotFound(ctx.owner.to_string()));
        }
        for name in snapshot.unknown_tables() {
            warn!(table = name, "snapshot table has no import plan; ignoring");
        }

        let seeded = precheck::seed_identifier_map(&self.storage, &self.registry, snapshot, ctx)?;
        info!(owner = %ctx.owner, rows = snapshot.total_rows(), existing = seeded, "starting import");

        self.storage.begin()?;
        let result = self.import_tables(ctx, snapshot);
        match result {
            Ok(results) => {
                if let Err(e) = self.storage.commit() {
                    if let Err(rb) = self.storage.rollback() {
                        warn!(error = %rb, "rollback after failed commit failed");
                    }
                    return Err(e.into());
                }
                Ok(results)
            }
            Err(e) => {
                if let Err(rb) = self.storage.rollback() {
                    warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn import_tables(
        &mut self,
        ctx: &mut ImportContext,
        snapshot: &Snapshot,
    ) -> Result<BTreeMap<Table, ImportResult>, EngineError> {
        let mut results = BTreeMap::new();
        for plan in self.registry.plans() {
            let rows = snapshot.rows(plan.table);
            let result = TableImporter::new(
                plan,
                &mut self.storage,
                self.rng.as_mut(),
                self.config.batch_size,
            )
            .run(rows, ctx)?;
            results.insert(plan.table, result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapmerge_storage::SqliteStorage;

    fn importer(owner: &OwnerId) -> Importer<SqliteStorage> {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.create_owner(owner).unwrap();
        Importer::new(storage)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(1))
    }

    fn snapshot(json: serde_json::Value) -> Snapshot {
        Snapshot::from_json_value(serde_json::json!({ "data": json })).unwrap()
    }

    #[test]
    fn run_maps_source_and_client_ids() {
        let owner = OwnerId::new("u1");
        let mut importer = importer(&owner);
        let snapshot = snapshot(serde_json::json!({
            "agents": [
                { "id": "ag-1", "slug": "a" },
                { "id": "ag-2", "client_id": "c-2", "slug": "b" }
            ],
            "agents_to_sessions": []
        }));

        let mut ctx = ImportContext::new(owner.clone());
        let results = importer.run(&mut ctx, &snapshot).unwrap();

        assert_eq!(results[&Table::Agents].added, 2);
        let first = ctx.id_map.resolve(Table::Agents, "ag-1").unwrap();
        assert_ne!(first, "ag-1");
        assert_eq!(
            ctx.id_map.resolve(Table::Agents, "ag-2"),
            ctx.id_map.resolve(Table::Agents, "c-2")
        );
        assert!(ctx.id_map.is_empty(Table::AgentsToSessions));
    }

    #[test]
    fn run_seeds_existing_rows_before_importing() {
        let owner = OwnerId::new("u1");
        let mut importer = importer(&owner);
        let doc = snapshot(serde_json::json!({
            "session_groups": [{ "id": "sg-1", "name": "Work" }]
        }));
        importer.import(&owner, &doc);
        let persisted = importer
            .storage()
            .find_first(Table::SessionGroups, &[])
            .unwrap()
            .unwrap()["id"]
            .as_text()
            .unwrap()
            .to_string();

        let mut ctx = ImportContext::new(owner.clone());
        let results = importer.run(&mut ctx, &doc).unwrap();

        assert_eq!(results[&Table::SessionGroups].skips, 1);
        assert_eq!(ctx.id_map.resolve(Table::SessionGroups, "sg-1"), Some(persisted.as_str()));
        assert_eq!(ctx.id_map.resolve(Table::SessionGroups, &persisted), Some(persisted.as_str()));
    }

    #[test]
    fn missing_owner_fails_before_any_write() {
        let mut importer = importer(&OwnerId::new("u1"));
        let mut ctx = ImportContext::new(OwnerId::new("ghost"));
        let err = importer
            .run(&mut ctx, &snapshot(serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, EngineError::OwnerNotFound(ref id) if id == "ghost"));
    }

    #[test]
    fn each_import_starts_with_fresh_state() {
        let owner = OwnerId::new("u1");
        let mut importer = importer(&owner);
        let doc = snapshot(serde_json::json!({
            "plugins": [{ "id": "p1", "identifier": "search" }]
        }));

        let first = importer.import(&owner, &doc);
        let second = importer.import(&owner, &doc);

        assert!(first.conflicts.is_empty());
        assert!(second.conflicts.is_empty());
        assert_eq!(second.result(Table::Plugins).unwrap().skips, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let config = ImportConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Importer::with_config(storage, config),
            Err(EngineError::Config(_))
        ));
    }
}
