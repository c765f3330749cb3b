//! Seeds the identifier map from rows the owner already has, before the
//! import transaction opens.

use std::collections::BTreeSet;

use tracing::debug;

use snapmerge_core::table::{CLIENT_ID_COLUMN, ID_COLUMN};
use snapmerge_core::{FieldValue, OwnerId, Record, Snapshot, Table};
use snapmerge_storage::{Filter, Store};

use crate::error::EngineError;
use crate::plan::ImportPlanRegistry;
use crate::state::ImportContext;

/// Most values bound into a single membership lookup.
pub const LOOKUP_CHUNK_SIZE: usize = 500;

/// Client identifier a snapshot row is known by: its `client_id`, else its `id`.
pub(crate) fn effective_client_id(row: &Record) -> Option<String> {
    row.get(CLIENT_ID_COLUMN)
        .and_then(FieldValue::as_key)
        .or_else(|| row.get(ID_COLUMN).and_then(FieldValue::as_key))
}

/// Rows owned by `owner` whose client identifier is one of the effective
/// client identifiers of `rows`. The table must support client lookup.
pub(crate) fn find_owned_by_client_ids<S: Store + ?Sized>(
    store: &S,
    table: Table,
    owner: &OwnerId,
    rows: &[Record],
) -> Result<Vec<Record>, EngineError> {
    let schema = table.schema();
    let (Some(owner_column), Some(client_column)) = (schema.owner_column, schema.client_id_column)
    else {
        return Ok(Vec::new());
    };

    let client_ids: BTreeSet<String> = rows.iter().filter_map(effective_client_id).collect();
    if client_ids.is_empty() {
        return Ok(Vec::new());
    }

    find_in_chunks(
        store,
        table,
        &[Filter::Eq(
            owner_column,
            FieldValue::Text(owner.as_str().to_string()),
        )],
        client_column,
        client_ids.into_iter().map(FieldValue::Text).collect(),
    )
}

/// Rows matching `scope` whose `column` is one of `values`, looked up
/// `LOOKUP_CHUNK_SIZE` values at a time so no statement outgrows the
/// store's bound-parameter limit.
pub(crate) fn find_in_chunks<S: Store + ?Sized>(
    store: &S,
    table: Table,
    scope: &[Filter],
    column: &'static str,
    values: Vec<FieldValue>,
) -> Result<Vec<Record>, EngineError> {
    let mut found = Vec::new();
    for chunk in values.chunks(LOOKUP_CHUNK_SIZE) {
        let mut filters = scope.to_vec();
        filters.push(Filter::In(column, chunk.to_vec()));
        found.extend(store.find_many(table, &filters)?);
    }
    Ok(found)
}

/// Register `client_id → id` and `id → id` for every stored row of the owner
/// that the snapshot refers to by client identifier. Returns the number of
/// rows found.
pub fn seed_identifier_map<S: Store + ?Sized>(
    store: &S,
    registry: &ImportPlanRegistry,
    snapshot: &Snapshot,
    ctx: &mut ImportContext,
) -> Result<usize, EngineError> {
    let mut seeded = 0;
    for plan in registry.plans() {
        let table = plan.table;
        if !table.schema().supports_client_lookup() {
            continue;
        }
        let rows = snapshot.rows(table);
        if rows.is_empty() {
            continue;
        }

        let existing = find_owned_by_client_ids(store, table, &ctx.owner, rows)?;
        for row in &existing {
            let Some(id) = row.get(ID_COLUMN).and_then(FieldValue::as_key) else {
                continue;
            };
            if let Some(client_id) = row.get(CLIENT_ID_COLUMN).and_then(FieldValue::as_key) {
                ctx.id_map.record(table, client_id, id.clone());
            }
            ctx.id_map.record(table, id.clone(), id);
        }
        if !existing.is_empty() {
            debug!(table = %table, existing = existing.len(), "seeded identifier map");
        }
        seeded += existing.len();
    }
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapmerge_storage::SqliteStorage;

    fn text_row(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn effective_client_id_falls_back_to_id() {
        assert_eq!(
            effective_client_id(&text_row(&[("id", "a"), ("client_id", "c")])),
            Some("c".into())
        );
        assert_eq!(effective_client_id(&text_row(&[("id", "a")])), Some("a".into()));
        assert_eq!(
            effective_client_id(&text_row(&[("id", "a"), ("client_id", "")])),
            Some("a".into())
        );
        assert_eq!(effective_client_id(&Record::new()), None);
    }

    #[test]
    fn seeds_existing_rows_for_the_owner_only() {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let owner = OwnerId::new("u1");
        store.create_owner(&owner).unwrap();
        store.create_owner(&OwnerId::new("u2")).unwrap();
        store
            .insert(
                Table::Agents,
                &[
                    text_row(&[("id", "p-1"), ("slug", "a"), ("user_id", "u1"), ("client_id", "c-1")]),
                    text_row(&[("id", "p-2"), ("slug", "b"), ("user_id", "u2"), ("client_id", "c-2")]),
                ],
            )
            .unwrap();

        let mut snapshot = Snapshot::new();
        snapshot.push_row(Table::Agents, text_row(&[("id", "src-1"), ("client_id", "c-1")]));
        snapshot.push_row(Table::Agents, text_row(&[("id", "src-2"), ("client_id", "c-2")]));

        let registry = ImportPlanRegistry::standard().unwrap();
        let mut ctx = ImportContext::new(owner);
        let seeded = seed_identifier_map(&store, &registry, &snapshot, &mut ctx).unwrap();

        assert_eq!(seeded, 1);
        assert_eq!(ctx.id_map.resolve(Table::Agents, "c-1"), Some("p-1"));
        assert_eq!(ctx.id_map.resolve(Table::Agents, "p-1"), Some("p-1"));
        // Another owner's row with a matching client id is invisible.
        assert_eq!(ctx.id_map.resolve(Table::Agents, "c-2"), None);
    }
}
