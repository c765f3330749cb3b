//! Mutable state scoped to a single import call.

use std::collections::HashMap;

use serde::Serialize;

use snapmerge_core::{OwnerId, Table};

/// Per-table mapping from any source-side identifier (snapshot `id` or
/// client identifier) to the identifier the store holds for that row.
/// Several source identifiers may map to one persisted identifier.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    tables: HashMap<Table, HashMap<String, String>>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source → persisted` for `table`. Composite-key tables have no
    /// single identifier, so nothing is recorded for them and `false` is
    /// returned.
    pub fn record(
        &mut self,
        table: Table,
        source: impl Into<String>,
        persisted: impl Into<String>,
    ) -> bool {
        if table.schema().is_composite() {
            return false;
        }
        self.tables
            .entry(table)
            .or_default()
            .insert(source.into(), persisted.into());
        true
    }

    pub fn resolve(&self, table: Table, source: &str) -> Option<&str> {
        self.tables
            .get(&table)
            .and_then(|m| m.get(source))
            .map(String::as_str)
    }

    pub fn len(&self, table: Table) -> usize {
        self.tables.get(&table).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

/// One detected uniqueness collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub table: Table,
    pub field: String,
    pub value: Option<String>,
}

/// Append-only diagnostics; nothing downstream reads it back.
#[derive(Debug, Default)]
pub struct ConflictLog {
    records: Vec<ConflictRecord>,
}

impl ConflictLog {
    pub fn push(&mut self, table: Table, field: impl Into<String>, value: Option<String>) {
        self.records.push(ConflictRecord {
            table,
            field: field.into(),
            value,
        });
    }

    pub fn records(&self) -> &[ConflictRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ConflictRecord> {
        self.records
    }
}

pub struct ImportContext {
    pub owner: OwnerId,
    pub id_map: IdentifierMap,
    pub conflicts: ConflictLog,
}

impl ImportContext {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            id_map: IdentifierMap::new(),
            conflicts: ConflictLog::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_sources_resolve_to_one_persisted_id() {
        let mut map = IdentifierMap::new();
        assert!(map.record(Table::Agents, "src-1", "p-1"));
        assert!(map.record(Table::Agents, "client-1", "p-1"));
        assert_eq!(map.resolve(Table::Agents, "src-1"), Some("p-1"));
        assert_eq!(map.resolve(Table::Agents, "client-1"), Some("p-1"));
        assert_eq!(map.resolve(Table::Sessions, "src-1"), None);
        assert_eq!(map.len(Table::Agents), 2);
    }

    #[test]
    fn composite_tables_never_gain_entries() {
        let mut map = IdentifierMap::new();
        assert!(!map.record(Table::AgentsToSessions, "a", "b"));
        assert!(!map.record(Table::MessagesFiles, "a", "b"));
        assert!(map.is_empty(Table::AgentsToSessions));
        assert!(map.is_empty(Table::MessagesFiles));
    }

    #[test]
    fn conflict_log_appends_in_order() {
        let mut log = ConflictLog::default();
        log.push(Table::Agents, "slug", Some("a".into()));
        log.push(Table::Plugins, "identifier", None);
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].field, "slug");
        assert_eq!(log.records()[1].table, Table::Plugins);
    }
}
