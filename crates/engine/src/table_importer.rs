//! The per-table import pipeline.
//!
//! For one plan and that table's snapshot rows:
//! 1. find rows the store already holds (by owner + client id, and by id for
//!    tables that keep snapshot identifiers)
//! 2. map those rows' identifiers to themselves
//! 3. drop snapshot rows matching an existing row
//! 4. prepare the rest: identifiers, timestamps, owner, transforms,
//!    relation remapping, self-reference clearing
//! 5. classify each candidate against unique fields (insert, merge or skip)
//! 6. insert in batches and map source identifiers to persisted ones
//!
//! A batch the store rejects on a constraint is counted as errors and the
//! pipeline moves on. Any other failure propagates.

use std::collections::{HashMap, HashSet};

use rand::RngCore;
use tracing::{debug, info, warn};

use snapmerge_core::table::{CLIENT_ID_COLUMN, ID_COLUMN};
use snapmerge_core::{FieldValue, Record, Table, TableSchema};
use snapmerge_storage::{Filter, StorageError, Store};

use crate::error::EngineError;
use crate::plan::{ConflictStrategy, ImportPlan};
use crate::precheck::{effective_client_id, find_in_chunks, find_owned_by_client_ids};
use crate::result::ImportResult;
use crate::state::ImportContext;

/// How a prepared candidate leaves conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Insert,
    /// Overwrite the stored row whose `field` equals `value`.
    Merge {
        field: &'static str,
        value: FieldValue,
        existing_id: Option<String>,
    },
    Skip,
}

/// A snapshot row after preparation, with the identifiers it was known by in
/// the snapshot.
#[derive(Debug, Clone)]
struct Candidate {
    source_id: Option<String>,
    client_id: Option<String>,
    row: Record,
}

pub struct TableImporter<'a, S: Store + ?Sized> {
    plan: &'a ImportPlan,
    store: &'a mut S,
    rng: &'a mut dyn RngCore,
    batch_size: usize,
}

impl<'a, S: Store + ?Sized> TableImporter<'a, S> {
    pub fn new(
        plan: &'a ImportPlan,
        store: &'a mut S,
        rng: &'a mut dyn RngCore,
        batch_size: usize,
    ) -> Self {
        Self {
            plan,
            store,
            rng,
            batch_size: batch_size.max(1),
        }
    }

    fn table(&self) -> Table {
        self.plan.table
    }

    fn schema(&self) -> &'static TableSchema {
        self.plan.table.schema()
    }

    pub fn run(mut self, rows: &[Record], ctx: &mut ImportContext) -> Result<ImportResult, EngineError> {
        let mut result = ImportResult::default();
        if rows.is_empty() {
            return Ok(result);
        }
        let table = self.table();
        debug!(table = %table, rows = rows.len(), "importing table");

        let existing = self.find_existing(rows, ctx)?;
        result.skips += existing.len();
        if !self.plan.composite_key {
            for row in &existing {
                seed_existing(ctx, table, row);
            }
        }

        let retained = self.select_candidates(rows, &existing, ctx);

        let mut to_insert = Vec::with_capacity(retained.len());
        for row in retained {
            let mut candidate = self.prepare(row, ctx);
            match self.classify(&mut candidate, ctx, &mut result)? {
                Disposition::Insert => to_insert.push(candidate),
                Disposition::Skip => result.skips += 1,
                Disposition::Merge {
                    field,
                    value,
                    existing_id,
                } => {
                    self.merge(&candidate, field, value, existing_id, ctx)?;
                    result.updated += 1;
                }
            }
        }

        self.insert_batches(to_insert, ctx, &mut result)?;

        info!(
            table = %table,
            added = result.added,
            updated = result.updated,
            skips = result.skips,
            errors = result.errors,
            "table imported"
        );
        Ok(result)
    }

    /// Stored rows the snapshot rows already correspond to, de-duplicated by
    /// identifier.
    fn find_existing(&self, rows: &[Record], ctx: &ImportContext) -> Result<Vec<Record>, EngineError> {
        let table = self.table();
        let mut found = Vec::new();

        if self.schema().supports_client_lookup() {
            found.extend(find_owned_by_client_ids(&*self.store, table, &ctx.owner, rows)?);
        }

        if self.plan.preserve_id && !self.plan.composite_key {
            let ids: HashSet<String> = rows
                .iter()
                .filter_map(|r| r.get(ID_COLUMN).and_then(FieldValue::as_key))
                .collect();
            if !ids.is_empty() {
                found.extend(find_in_chunks(
                    &*self.store,
                    table,
                    &[],
                    ID_COLUMN,
                    ids.into_iter().map(FieldValue::Text).collect(),
                )?);
            }
        }

        let mut seen = HashSet::new();
        found.retain(|row| match row.get(ID_COLUMN).and_then(FieldValue::as_key) {
            Some(id) => seen.insert(id),
            None => true,
        });
        Ok(found)
    }

    /// Snapshot rows that do not match an existing row. A row matched by
    /// client identifier has its own `id` mapped to the existing row.
    fn select_candidates<'r>(
        &self,
        rows: &'r [Record],
        existing: &[Record],
        ctx: &mut ImportContext,
    ) -> Vec<&'r Record> {
        if existing.is_empty() {
            return rows.iter().collect();
        }
        let table = self.table();
        let check_client = self.schema().supports_client_lookup();
        let check_id = self.plan.preserve_id && !self.plan.composite_key;

        let mut by_client: HashMap<String, Option<String>> = HashMap::new();
        let mut ids: HashSet<String> = HashSet::new();
        for row in existing {
            let id = row.get(ID_COLUMN).and_then(FieldValue::as_key);
            if let Some(client_id) = row.get(CLIENT_ID_COLUMN).and_then(FieldValue::as_key) {
                by_client.insert(client_id, id.clone());
            }
            if let Some(id) = id {
                ids.insert(id);
            }
        }

        let mut retained = Vec::with_capacity(rows.len());
        for row in rows {
            let source_id = row.get(ID_COLUMN).and_then(FieldValue::as_key);
            if check_client
                && let Some(client_id) = effective_client_id(row)
                && let Some(persisted) = by_client.get(&client_id)
            {
                if let (Some(source), Some(persisted)) = (source_id, persisted) {
                    ctx.id_map.record(table, source, persisted.clone());
                }
                continue;
            }
            if check_id && source_id.is_some_and(|id| ids.contains(&id)) {
                continue;
            }
            retained.push(row);
        }
        retained
    }

    fn prepare(&mut self, raw: &Record, ctx: &ImportContext) -> Candidate {
        let table = self.table();
        let schema = self.schema();
        let source_id = raw.get(ID_COLUMN).and_then(FieldValue::as_key);
        let client_id = effective_client_id(raw);

        let mut row = Record::new();
        let mut dropped = Vec::new();
        for (key, value) in raw {
            if schema.has_column(key) {
                row.insert(key.clone(), value.clone());
            } else {
                dropped.push(key.as_str());
            }
        }
        if !dropped.is_empty() {
            debug!(table = %table, fields = ?dropped, "dropping fields with no column");
        }

        if self.plan.composite_key || !self.plan.preserve_id {
            row.remove(ID_COLUMN);
        }

        for column in schema.timestamp_columns() {
            let Some(value) = row.get(column) else {
                continue;
            };
            match value.to_timestamp() {
                Some(ts) => {
                    row.insert(column.to_string(), ts);
                }
                None => {
                    if !value.is_null() {
                        warn!(table = %table, field = column, value = %value.display_value(), "unreadable timestamp; using store default");
                    }
                    row.remove(column);
                }
            }
        }

        if let Some(client_column) = schema.client_id_column {
            match &client_id {
                Some(id) => row.insert(client_column.to_string(), FieldValue::Text(id.clone())),
                None => row.remove(client_column),
            };
        }

        if let Some(owner_column) = schema.owner_column {
            row.insert(
                owner_column.to_string(),
                FieldValue::Text(ctx.owner.as_str().to_string()),
            );
        }

        for (field, transform) in &self.plan.transforms {
            if let Some(value) = row.get(*field) {
                let next = transform.apply(value, &mut *self.rng);
                row.insert(field.to_string(), next);
            }
        }

        if schema.owner_singleton {
            row.insert(
                ID_COLUMN.to_string(),
                FieldValue::Text(ctx.owner.as_str().to_string()),
            );
        }

        for relation in &self.plan.relations {
            let Some(value) = row.get(relation.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let resolved = value
                .as_key()
                .and_then(|key| ctx.id_map.resolve(relation.source_table, &key))
                .map(str::to_string);
            match resolved {
                Some(persisted) => {
                    row.insert(relation.field.to_string(), FieldValue::Text(persisted));
                }
                None => {
                    warn!(
                        table = %table,
                        field = relation.field,
                        source_table = %relation.source_table,
                        value = %value.display_value(),
                        "unresolved relation; clearing field"
                    );
                    row.insert(relation.field.to_string(), FieldValue::Null);
                }
            }
        }

        for field in &self.plan.self_references {
            row.insert(field.to_string(), FieldValue::Null);
        }

        Candidate {
            source_id,
            client_id,
            row,
        }
    }

    /// Check each unique field against the owner's stored rows and apply the
    /// plan's strategy to the first collision that ends the candidate's insert.
    fn classify(
        &mut self,
        candidate: &mut Candidate,
        ctx: &mut ImportContext,
        result: &mut ImportResult,
    ) -> Result<Disposition, EngineError> {
        let table = self.table();
        let owner_scope = owner_filter(self.schema(), ctx);
        for &field in &self.plan.unique_fields {
            let Some(value) = candidate.row.get(field).filter(|v| !v.is_null()).cloned() else {
                continue;
            };
            let mut filters = vec![Filter::Eq(field, value.clone())];
            filters.extend(owner_scope.clone());
            let Some(existing) = self.store.find_first(table, &filters)? else {
                continue;
            };

            debug!(table = %table, field, value = %value.display_value(), strategy = ?self.plan.strategy, "unique conflict");
            ctx.conflicts.push(table, field, Some(value.display_value()));
            result.conflict_fields.insert(field.to_string());

            match self.plan.strategy {
                ConflictStrategy::Skip => return Ok(Disposition::Skip),
                ConflictStrategy::Merge => {
                    return Ok(Disposition::Merge {
                        field,
                        value,
                        existing_id: existing.get(ID_COLUMN).and_then(FieldValue::as_key),
                    });
                }
                ConflictStrategy::Modify => {
                    // Without a transform the value stays and the insert decides.
                    if let Some(transform) = self.plan.transform_for(field) {
                        let next = transform.apply(&value, &mut *self.rng);
                        candidate.row.insert(field.to_string(), next);
                    }
                }
            }
        }
        Ok(Disposition::Insert)
    }

    fn merge(
        &mut self,
        candidate: &Candidate,
        field: &'static str,
        value: FieldValue,
        existing_id: Option<String>,
        ctx: &mut ImportContext,
    ) -> Result<(), EngineError> {
        let table = self.table();
        let mut set = candidate.row.clone();
        set.remove(ID_COLUMN);
        let filters = match &existing_id {
            Some(id) => vec![Filter::Eq(ID_COLUMN, FieldValue::Text(id.clone()))],
            None => {
                let mut filters = vec![Filter::Eq(field, value)];
                filters.extend(owner_filter(self.schema(), ctx));
                filters
            }
        };
        self.store.update(table, &set, &filters)?;

        if let Some(persisted) = existing_id {
            if let Some(source) = &candidate.source_id {
                ctx.id_map.record(table, source.clone(), persisted.clone());
            }
            if let Some(client_id) = &candidate.client_id {
                ctx.id_map.record(table, client_id.clone(), persisted);
            }
        }
        Ok(())
    }

    fn insert_batches(
        &mut self,
        candidates: Vec<Candidate>,
        ctx: &mut ImportContext,
        result: &mut ImportResult,
    ) -> Result<(), EngineError> {
        let table = self.table();
        let mut returning = vec![ID_COLUMN];
        if let Some(client_column) = self.schema().client_id_column {
            returning.push(client_column);
        }

        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            let rows: Vec<Record> = batch.iter().map(|c| c.row.clone()).collect();

            let outcome = if self.plan.composite_key {
                self.store.insert(table, &rows)
            } else {
                self.store
                    .insert_returning(table, &rows, &returning)
                    .map(|inserted| {
                        for (candidate, stored) in batch.iter().zip(&inserted) {
                            record_inserted(ctx, table, candidate, stored);
                        }
                        inserted.len()
                    })
            };

            match outcome {
                Ok(added) => result.added += added,
                Err(e) if e.is_constraint() => {
                    result.errors += batch.len();
                    if let StorageError::UniqueViolation { field, value, .. } = &e {
                        ctx.conflicts.push(table, field.clone(), value.clone());
                        result.conflict_fields.insert(field.clone());
                    }
                    warn!(table = %table, batch = index, rows = batch.len(), error = %e, "batch insert failed");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Restricts a lookup to the importing owner's rows on owned tables.
fn owner_filter(schema: &TableSchema, ctx: &ImportContext) -> Option<Filter> {
    schema
        .owner_column
        .map(|column| Filter::Eq(column, FieldValue::Text(ctx.owner.as_str().to_string())))
}

fn seed_existing(ctx: &mut ImportContext, table: Table, row: &Record) {
    let Some(id) = row.get(ID_COLUMN).and_then(FieldValue::as_key) else {
        return;
    };
    if let Some(client_id) = row.get(CLIENT_ID_COLUMN).and_then(FieldValue::as_key) {
        ctx.id_map.record(table, client_id, id.clone());
    }
    ctx.id_map.record(table, id.clone(), id);
}

fn record_inserted(ctx: &mut ImportContext, table: Table, candidate: &Candidate, stored: &Record) {
    let Some(persisted) = stored.get(ID_COLUMN).and_then(FieldValue::as_key) else {
        return;
    };
    if let Some(source) = &candidate.source_id {
        ctx.id_map.record(table, source.clone(), persisted.clone());
    }
    if let Some(client_id) = stored.get(CLIENT_ID_COLUMN).and_then(FieldValue::as_key) {
        ctx.id_map.record(table, client_id, persisted);
    }
}
