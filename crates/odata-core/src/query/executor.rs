//! Query execution against a fetch plan.
//!
//! [`QueryExecutor`] is the seam to a data source. [`MemoryExecutor`] runs
//! plans over in-memory tables: one pass for the root, one per batch child,
//! with join children resolved from keys already on the parent rows.

use super::filter::{BasicFilterEvaluator, FilterEvaluator, RowFilter};
use super::plan::FetchPlanNode;
use crate::catalog::{Cardinality, RelationDescriptor, RelationKind};
use crate::error::ExecutorError;
use crate::value::{Value, ValueKey};
use odata_lang::{OrderSpec, SortDirection};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument, trace};

/// A stored row: field name to value.
pub type Row = BTreeMap<String, Value>;

/// Executes fetch plans.
pub trait QueryExecutor {
    /// Fetch the root rows of `plan` with every expansion attached.
    fn fetch(&self, plan: &FetchPlanNode) -> Result<FetchResult, ExecutorError>;
}

/// Rows returned for the root of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchResult {
    pub rows: Vec<MaterializedEntity>,
    /// Matching rows before `$skip`/`$top`, when `$count` was requested.
    pub total_count: Option<u64>,
}

/// One fetched row plus its resolved expansions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializedEntity {
    pub fields: Row,
    pub related: BTreeMap<String, Related>,
}

impl MaterializedEntity {
    pub fn new(fields: Row) -> Self {
        Self {
            fields,
            related: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_related(mut self, name: impl Into<String>, related: Related) -> Self {
        self.related.insert(name.into(), related);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Resolved value of one expansion on one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Related {
    One(Option<Box<MaterializedEntity>>),
    Many {
        rows: Vec<MaterializedEntity>,
        total_count: Option<u64>,
    },
}

/// In-memory executor keyed by entity (or association) table name.
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Row>>,
    evaluator: Option<Box<dyn FilterEvaluator>>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    /// Create an empty executor using [`BasicFilterEvaluator`].
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            evaluator: Some(Box::new(BasicFilterEvaluator::new())),
        }
    }

    /// Load tables from a JSON object of `{ "Table": [ {row}, ... ] }`.
    pub fn from_json(json: &str) -> Result<Self, ExecutorError> {
        let tables: HashMap<String, Vec<Row>> =
            serde_json::from_str(json).map_err(|e| ExecutorError::InvalidData(e.to_string()))?;
        debug!(tables = tables.len(), "loaded in-memory tables");
        Ok(Self {
            tables,
            ..Self::new()
        })
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn with_filter_evaluator(mut self, evaluator: impl FilterEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Reject every `$filter` with [`ExecutorError::UnsupportedFilter`].
    pub fn without_filter_evaluator(mut self) -> Self {
        self.evaluator = None;
        self
    }

    pub fn insert(&mut self, table: impl Into<String>, row: Row) {
        self.tables.entry(table.into()).or_default().push(row);
    }

    /// Rows of a table; a table that was never loaded is empty.
    pub fn table(&self, name: &str) -> &[Row] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Compile a node's `$filter` once so every group reuses it.
    fn compile_filter(&self, node: &FetchPlanNode) -> Result<Option<Box<dyn RowFilter>>, ExecutorError> {
        let Some(filter) = &node.filter else {
            return Ok(None);
        };
        let Some(evaluator) = &self.evaluator else {
            return Err(ExecutorError::UnsupportedFilter {
                entity: node.entity_name.clone(),
                filter: filter.to_string(),
            });
        };
        evaluator.compile(&node.entity_name, filter).map(Some)
    }

    /// Project rows and resolve the node's children for all of them at once.
    fn materialize(
        &self,
        node: &FetchPlanNode,
        rows: &[&Row],
    ) -> Result<Vec<MaterializedEntity>, ExecutorError> {
        let mut entities: Vec<MaterializedEntity> = rows
            .iter()
            .map(|row| MaterializedEntity::new(project(row, &node.projection)))
            .collect();

        for (name, child) in &node.join_children {
            self.resolve_join(name, child, &mut entities)?;
        }
        for (name, child) in &node.batch_children {
            self.resolve_batch(name, child, rows, &mut entities)?;
        }

        Ok(entities)
    }

    fn resolve_join(
        &self,
        name: &str,
        child: &FetchPlanNode,
        parents: &mut [MaterializedEntity],
    ) -> Result<(), ExecutorError> {
        let relation = child_relation(name, child)?;
        let local_key = relation.local_key().ok_or_else(|| {
            ExecutorError::InvalidPlan(format!("join '{}' has no local key", name))
        })?;

        let wanted: HashSet<ValueKey> = parents
            .iter()
            .filter_map(|p| p.get(local_key))
            .filter(|v| !v.is_null())
            .map(Value::key)
            .collect();

        let candidates = self
            .table(&child.entity_name)
            .iter()
            .filter(|row| {
                row.get(&child.identity_field)
                    .is_some_and(|id| wanted.contains(&id.key()))
            });
        let filter = self.compile_filter(child)?;
        let targets = filter_rows(filter.as_deref(), candidates)?;
        trace!(relation = name, targets = targets.len(), "join rows fetched");

        let materialized = self.materialize(child, &targets)?;
        let by_key: HashMap<ValueKey, &MaterializedEntity> = targets
            .iter()
            .zip(materialized.iter())
            .filter_map(|(row, entity)| row.get(&child.identity_field).map(|id| (id.key(), entity)))
            .collect();

        for parent in parents.iter_mut() {
            let target = parent
                .get(local_key)
                .and_then(|key| by_key.get(&key.key()))
                .map(|entity| Box::new((*entity).clone()));
            parent.related.insert(name.to_string(), Related::One(target));
        }
        Ok(())
    }

    fn resolve_batch(
        &self,
        name: &str,
        child: &FetchPlanNode,
        parent_rows: &[&Row],
        parents: &mut [MaterializedEntity],
    ) -> Result<(), ExecutorError> {
        let relation = child_relation(name, child)?;
        let parent_keys: Vec<Option<ValueKey>> = parent_rows
            .iter()
            .map(|row| {
                row.get(&relation.source_identity_field)
                    .filter(|v| !v.is_null())
                    .map(Value::key)
            })
            .collect();

        let filter = self.compile_filter(child)?;
        let groups = self.group_targets(relation, child, &parent_keys)?;

        let mut flattened: Vec<&Row> = Vec::new();
        let mut spans = Vec::with_capacity(groups.len());
        for group in groups {
            let mut selected = filter_rows(filter.as_deref(), group)?;
            let total = child.count.then_some(selected.len() as u64);
            sort_rows(&mut selected, &child.order_by);
            apply_pagination(&mut selected, child.skip, child.top);
            spans.push((selected.len(), total));
            flattened.extend(selected);
        }
        trace!(relation = name, rows = flattened.len(), "batch rows fetched");

        let mut materialized = self.materialize(child, &flattened)?.into_iter();
        for (parent, (len, total_count)) in parents.iter_mut().zip(spans) {
            let rows: Vec<MaterializedEntity> = materialized.by_ref().take(len).collect();
            let related = match relation.cardinality {
                Cardinality::Single => Related::One(rows.into_iter().next().map(Box::new)),
                Cardinality::Collection => Related::Many { rows, total_count },
            };
            parent.related.insert(name.to_string(), related);
        }
        Ok(())
    }

    /// Candidate target rows for each parent, in parent order.
    fn group_targets<'s>(
        &'s self,
        relation: &RelationDescriptor,
        child: &FetchPlanNode,
        parent_keys: &[Option<ValueKey>],
    ) -> Result<Vec<Vec<&'s Row>>, ExecutorError> {
        let targets = self.table(&child.entity_name);

        let by_parent: HashMap<ValueKey, Vec<&Row>> = match &relation.kind {
            RelationKind::OneToMany { remote_key } | RelationKind::OneToOneReverse { remote_key } => {
                let mut by_parent: HashMap<ValueKey, Vec<&Row>> = HashMap::new();
                for row in targets {
                    if let Some(key) = row.get(remote_key).filter(|v| !v.is_null()) {
                        by_parent.entry(key.key()).or_default().push(row);
                    }
                }
                by_parent
            }
            RelationKind::ManyToMany {
                through,
                source_key,
                target_key,
            } => {
                let links = self
                    .tables
                    .get(through)
                    .ok_or_else(|| ExecutorError::UnknownTable(through.clone()))?;
                let by_identity: HashMap<ValueKey, &Row> = targets
                    .iter()
                    .filter_map(|row| row.get(&child.identity_field).map(|id| (id.key(), row)))
                    .collect();

                let mut by_parent: HashMap<ValueKey, Vec<&Row>> = HashMap::new();
                for link in links {
                    let (Some(source), Some(target)) = (link.get(source_key), link.get(target_key))
                    else {
                        continue;
                    };
                    if let Some(row) = by_identity.get(&target.key()) {
                        by_parent.entry(source.key()).or_default().push(*row);
                    }
                }
                by_parent
            }
            RelationKind::ManyToOne { .. } | RelationKind::OneToOne { .. } => {
                return Err(ExecutorError::InvalidPlan(format!(
                    "forward relation '{}' cannot be batch-fetched",
                    relation.name
                )));
            }
        };

        Ok(parent_keys
            .iter()
            .map(|key| {
                key.as_ref()
                    .and_then(|k| by_parent.get(k))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }
}

impl QueryExecutor for MemoryExecutor {
    #[instrument(skip_all, fields(entity = %plan.entity_name))]
    fn fetch(&self, plan: &FetchPlanNode) -> Result<FetchResult, ExecutorError> {
        let filter = self.compile_filter(plan)?;
        let mut rows = filter_rows(filter.as_deref(), self.table(&plan.entity_name))?;
        let total_count = plan.count.then_some(rows.len() as u64);

        sort_rows(&mut rows, &plan.order_by);
        apply_pagination(&mut rows, plan.skip, plan.top);

        let rows = self.materialize(plan, &rows)?;
        debug!(rows = rows.len(), "fetched root rows");
        Ok(FetchResult { rows, total_count })
    }
}

fn filter_rows<'r>(
    filter: Option<&dyn RowFilter>,
    rows: impl IntoIterator<Item = &'r Row>,
) -> Result<Vec<&'r Row>, ExecutorError> {
    let Some(filter) = filter else {
        return Ok(rows.into_iter().collect());
    };
    let mut kept = Vec::new();
    for row in rows {
        if filter.matches(row)? {
            kept.push(row);
        }
    }
    Ok(kept)
}

fn child_relation<'p>(
    name: &str,
    child: &'p FetchPlanNode,
) -> Result<&'p RelationDescriptor, ExecutorError> {
    child
        .relation
        .as_ref()
        .ok_or_else(|| ExecutorError::InvalidPlan(format!("child '{}' has no relation", name)))
}

/// Copy the projected columns of a row; absent columns stay absent.
fn project(row: &Row, projection: &BTreeSet<String>) -> Row {
    projection
        .iter()
        .filter_map(|field| row.get(field).map(|v| (field.clone(), v.clone())))
        .collect()
}

/// Stable multi-key sort; nulls and missing values sort first.
pub(crate) fn sort_rows(rows: &mut [&Row], order_by: &[OrderSpec]) {
    if order_by.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        for spec in order_by {
            let cmp = Value::compare_opt(a.get(&spec.field), b.get(&spec.field));
            let cmp = match spec.direction {
                SortDirection::Asc => cmp,
                SortDirection::Desc => cmp.reverse(),
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

/// Apply `$skip` then `$top`.
pub(crate) fn apply_pagination<T>(rows: &mut Vec<T>, skip: Option<u64>, top: Option<u64>) {
    let offset = skip.unwrap_or(0) as usize;
    if offset > 0 {
        if offset >= rows.len() {
            rows.clear();
            return;
        }
        rows.drain(0..offset);
    }

    if let Some(limit) = top {
        rows.truncate(limit as usize);
    }
}
