use std::collections::BTreeMap;

use serde::Deserialize;

use crate::CoreError;
use crate::field_value::{FieldValue, Record};
use crate::table::Table;

/// Externally produced per-table row collection.
///
/// Table names are kept as strings so a snapshot naming tables this build
/// does not know still parses; the importer reports and ignores them.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: Option<u32>,
    tables: BTreeMap<String, Vec<Record>>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    version: Option<u32>,
    data: BTreeMap<String, Vec<serde_json::Map<String, serde_json::Value>>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        let raw: RawSnapshot = serde_json::from_str(s)?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, CoreError> {
        let raw: RawSnapshot = serde_json::from_value(value)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSnapshot) -> Self {
        let tables = raw
            .data
            .into_iter()
            .map(|(name, rows)| {
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|(k, v)| (k, FieldValue::from(v)))
                            .collect::<Record>()
                    })
                    .collect();
                (name, rows)
            })
            .collect();
        Self {
            version: raw.version,
            tables,
        }
    }

    /// Rows for `table`, empty when the snapshot does not carry it.
    pub fn rows(&self, table: Table) -> &[Record] {
        self.tables
            .get(table.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push_row(&mut self, table: Table, row: Record) {
        self.tables
            .entry(table.as_str().to_string())
            .or_default()
            .push(row);
    }

    /// Table names present in the snapshot that have no catalog entry.
    pub fn unknown_tables(&self) -> Vec<&str> {
        self.tables
            .keys()
            .filter(|name| Table::parse(name).is_err())
            .map(String::as_str)
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tables_and_rows() {
        let snapshot = Snapshot::from_json_str(
            r#"{
                "version": 7,
                "data": {
                    "agents": [{"id": "a1", "slug": "helper", "tags": ["x"]}],
                    "sessions": [],
                    "legacy_things": [{"id": 1}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(snapshot.version, Some(7));
        let agents = snapshot.rows(Table::Agents);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["slug"], FieldValue::Text("helper".into()));
        assert_eq!(agents[0]["tags"], FieldValue::Json(serde_json::json!(["x"])));
        assert!(snapshot.rows(Table::Sessions).is_empty());
        assert!(snapshot.rows(Table::Messages).is_empty());
        assert_eq!(snapshot.unknown_tables(), vec!["legacy_things"]);
        assert_eq!(snapshot.total_rows(), 2);
    }

    #[test]
    fn missing_data_is_invalid() {
        assert!(matches!(
            Snapshot::from_json_str(r#"{"version": 1}"#),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn non_object_rows_are_rejected() {
        assert!(Snapshot::from_json_str(r#"{"data": {"agents": [1, 2]}}"#).is_err());
    }
}
