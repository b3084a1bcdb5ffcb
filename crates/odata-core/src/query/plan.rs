//! Fetch plan produced by the planner and consumed by query executors.

use super::diagnostic::Diagnostic;
use crate::catalog::{EntityId, RelationDescriptor};
use odata_lang::{FilterExpr, OrderSpec};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// One entity-typed position in the expansion graph.
///
/// `projection` always holds the identity field, the local key of every
/// join child and, for nodes reached through a remote key, that key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchPlanNode {
    pub entity: EntityId,
    pub entity_name: String,
    pub identity_field: String,
    /// Relation this node was reached through; `None` for the root.
    pub relation: Option<RelationDescriptor>,
    pub depth: usize,
    /// Stored columns to fetch.
    pub projection: BTreeSet<String>,
    /// Virtual fields the projector computes after the fetch.
    pub computed_fields: BTreeSet<String>,
    /// Forward single-valued expansions, fetched in the same query.
    pub join_children: BTreeMap<String, FetchPlanNode>,
    /// Collection or reverse expansions, each fetched by its own query
    /// keyed by the parent identities.
    pub batch_children: BTreeMap<String, FetchPlanNode>,
    pub filter: Option<FilterExpr>,
    pub order_by: Vec<OrderSpec>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
}

impl FetchPlanNode {
    /// Whether this node is the root of the plan.
    pub fn is_root(&self) -> bool {
        self.relation.is_none()
    }

    /// Look up a child by relation name, join or batch.
    pub fn child(&self, relation: &str) -> Option<&FetchPlanNode> {
        self.join_children
            .get(relation)
            .or_else(|| self.batch_children.get(relation))
    }

    /// Iterate over all children, joins first.
    pub fn children(&self) -> impl Iterator<Item = (&String, &FetchPlanNode)> {
        self.join_children.iter().chain(self.batch_children.iter())
    }

    /// Total number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self.children().map(|(_, c)| c.node_count()).sum::<usize>()
    }

    /// Deepest node depth in this subtree.
    pub fn max_depth(&self) -> usize {
        self.children()
            .map(|(_, c)| c.max_depth())
            .max()
            .unwrap_or(self.depth)
    }

    /// Number of independent queries needed: one for this node plus one per
    /// batch child anywhere below it.
    pub fn query_count(&self) -> usize {
        let joins: usize = self
            .join_children
            .values()
            .map(|c| c.query_count() - 1)
            .sum();
        let batches: usize = self.batch_children.values().map(|c| c.query_count()).sum();
        1 + joins + batches
    }

    /// Render the plan as an indented tree.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, "", None);
        out
    }

    fn explain_into(&self, out: &mut String, indent: &str, label: Option<(&str, &str)>) {
        let _ = match label {
            None => write!(out, "{}{}", indent, self.entity_name),
            Some((strategy, name)) => {
                write!(out, "{}{} {} -> {}", indent, strategy, name, self.entity_name)
            }
        };

        let columns: Vec<&str> = self.projection.iter().map(String::as_str).collect();
        let _ = write!(out, " [{}]", columns.join(", "));
        if !self.computed_fields.is_empty() {
            let computed: Vec<&str> = self.computed_fields.iter().map(String::as_str).collect();
            let _ = write!(out, " computed=[{}]", computed.join(", "));
        }
        if let Some(filter) = &self.filter {
            let _ = write!(out, " filter=({})", filter);
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self.order_by.iter().map(ToString::to_string).collect();
            let _ = write!(out, " order=({})", keys.join(", "));
        }
        if let Some(skip) = self.skip {
            let _ = write!(out, " skip={}", skip);
        }
        if let Some(top) = self.top {
            let _ = write!(out, " top={}", top);
        }
        if self.count {
            out.push_str(" count");
        }
        out.push('\n');

        let child_indent = format!("{}  ", indent);
        for (name, child) in &self.join_children {
            child.explain_into(out, &child_indent, Some(("join", name)));
        }
        for (name, child) in &self.batch_children {
            child.explain_into(out, &child_indent, Some(("batch", name)));
        }
    }
}

/// Result of planning: the plan plus everything that was dropped from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOutcome {
    pub plan: FetchPlanNode,
    pub diagnostics: Vec<Diagnostic>,
}
