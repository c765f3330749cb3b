//! Declarative per-table import plans and their ordered registry.
//!
//! Registry order is insertion order. A plan may only relate to tables whose
//! plans come strictly earlier, so identifiers of referenced rows are already
//! in the identifier map by the time a referencing row is prepared.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use snapmerge_core::Table;

use crate::error::EngineError;
use crate::transform::Transform;

/// What to do when a candidate row collides with a stored row on a unique
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Leave the stored row alone and drop the candidate.
    Skip,
    /// Rewrite the colliding value with the field's transform and insert.
    #[default]
    Modify,
    /// Overwrite the stored row with the candidate's fields.
    Merge,
}

/// Foreign key from `field` to the identifier of a row in `source_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub field: &'static str,
    pub source_table: Table,
}

#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub table: Table,
    pub strategy: ConflictStrategy,
    /// Keep the snapshot's row identifier instead of letting the store assign one.
    pub preserve_id: bool,
    pub composite_key: bool,
    pub unique_fields: Vec<&'static str>,
    pub transforms: Vec<(&'static str, Transform)>,
    pub relations: Vec<Relation>,
    /// Foreign keys into this same table. Always cleared on import.
    pub self_references: Vec<&'static str>,
}

impl ImportPlan {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            strategy: ConflictStrategy::default(),
            preserve_id: false,
            composite_key: table.schema().is_composite(),
            unique_fields: Vec::new(),
            transforms: Vec::new(),
            relations: Vec::new(),
            self_references: Vec::new(),
        }
    }

    pub fn strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn preserve_id(mut self) -> Self {
        self.preserve_id = true;
        self
    }

    pub fn unique(mut self, field: &'static str) -> Self {
        self.unique_fields.push(field);
        self
    }

    pub fn transform(mut self, field: &'static str, transform: Transform) -> Self {
        self.transforms.push((field, transform));
        self
    }

    pub fn relation(mut self, field: &'static str, source_table: Table) -> Self {
        self.relations.push(Relation {
            field,
            source_table,
        });
        self
    }

    pub fn self_reference(mut self, field: &'static str) -> Self {
        self.self_references.push(field);
        self
    }

    pub fn transform_for(&self, field: &str) -> Option<Transform> {
        self.transforms
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, t)| *t)
    }
}

/// Built-in plans in dependency order.
pub fn standard_plans() -> Vec<ImportPlan> {
    use ConflictStrategy::{Merge, Modify, Skip};
    use Table::*;

    vec![
        ImportPlan::new(UserSettings).strategy(Merge).unique("id"),
        ImportPlan::new(Plugins).strategy(Skip).unique("identifier"),
        ImportPlan::new(Agents)
            .strategy(Modify)
            .unique("slug")
            .transform("slug", Transform::RandomSuffix),
        ImportPlan::new(SessionGroups),
        ImportPlan::new(Sessions)
            .strategy(Modify)
            .unique("slug")
            .transform("slug", Transform::RandomSuffix)
            .relation("group_id", SessionGroups),
        ImportPlan::new(AgentsToSessions)
            .relation("agent_id", Agents)
            .relation("session_id", Sessions),
        ImportPlan::new(Files).preserve_id(),
        ImportPlan::new(Topics).relation("session_id", Sessions),
        ImportPlan::new(Threads)
            .relation("topic_id", Topics)
            .self_reference("parent_thread_id"),
        ImportPlan::new(Messages)
            .relation("session_id", Sessions)
            .relation("topic_id", Topics)
            .relation("thread_id", Threads)
            .relation("agent_id", Agents)
            .self_reference("parent_id")
            .self_reference("quota_id"),
        ImportPlan::new(MessagesFiles)
            .relation("file_id", Files)
            .relation("message_id", Messages),
    ]
}

#[derive(Debug, Clone)]
pub struct ImportPlanRegistry {
    plans: Vec<ImportPlan>,
}

impl ImportPlanRegistry {
    /// Validate and wrap `plans`. Rejects duplicates, references to tables
    /// that are not registered earlier, fields that are not columns of the
    /// table, and key flags that disagree with the table's schema.
    pub fn new(plans: Vec<ImportPlan>) -> Result<Self, EngineError> {
        let mut registered: HashSet<Table> = HashSet::new();
        for plan in &plans {
            let table = plan.table;
            let schema = table.schema();

            if registered.contains(&table) {
                return Err(EngineError::invalid_plan(table, "registered twice"));
            }
            if plan.composite_key != schema.is_composite() {
                return Err(EngineError::invalid_plan(
                    table,
                    "composite key flag does not match the table's primary key",
                ));
            }
            if plan.composite_key && plan.preserve_id {
                return Err(EngineError::invalid_plan(
                    table,
                    "composite key tables have no identifier to preserve",
                ));
            }

            let check_field = |field: &str, role: &str| {
                if schema.has_column(field) {
                    Ok(())
                } else {
                    Err(EngineError::invalid_plan(
                        table,
                        format!("{role} field {field} is not a column"),
                    ))
                }
            };
            for field in &plan.unique_fields {
                check_field(*field, "unique")?;
            }
            for (field, _) in &plan.transforms {
                check_field(*field, "transform")?;
            }
            for field in &plan.self_references {
                check_field(*field, "self-reference")?;
            }
            for relation in &plan.relations {
                check_field(relation.field, "relation")?;
                if relation.source_table == table {
                    return Err(EngineError::invalid_plan(
                        table,
                        format!("relation {} points at its own table; declare it as a self-reference", relation.field),
                    ));
                }
                if !registered.contains(&relation.source_table) {
                    return Err(EngineError::invalid_plan(
                        table,
                        format!(
                            "relation {} needs {} to be registered earlier",
                            relation.field, relation.source_table
                        ),
                    ));
                }
            }

            registered.insert(table);
        }
        Ok(Self { plans })
    }

    pub fn standard() -> Result<Self, EngineError> {
        Self::new(standard_plans())
    }

    pub fn plans(&self) -> &[ImportPlan] {
        &self.plans
    }

    pub fn plan(&self, table: Table) -> Option<&ImportPlan> {
        self.plans.iter().find(|p| p.table == table)
    }

    pub fn tables(&self) -> impl Iterator<Item = Table> + '_ {
        self.plans.iter().map(|p| p.table)
    }

    /// Replace the conflict strategy of the named tables. Tables without a
    /// plan are ignored.
    pub fn with_strategy_overrides(mut self, overrides: &BTreeMap<Table, ConflictStrategy>) -> Self {
        for plan in &mut self.plans {
            if let Some(strategy) = overrides.get(&plan.table) {
                plan.strategy = *strategy;
            }
        }
        self
    }
}
