//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::Table;
use odata_core::query::{Diagnostic, FetchPlanNode, PlanOutcome, ProjectedValue};
use odata_core::{QueryResponse, RelationDescriptor, RelationKind};
use odata_lang::RequestTree;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a parsed request tree.
    fn format_tree(&self, tree: &RequestTree) -> String;

    /// Format a fetch plan and its diagnostics.
    fn format_plan(&self, outcome: &PlanOutcome) -> String;

    /// Format a projected query response.
    fn format_response(&self, response: &QueryResponse) -> String;

    /// Format the relations of an entity type.
    fn format_relations(&self, entity: &str, relations: &[&RelationDescriptor]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_tree(&self, tree: &RequestTree) -> String {
        let mut table = Table::new();
        table.set_header(vec![
            "Path", "Select", "Filter", "Order By", "Top", "Skip", "Count",
        ]);
        add_tree_rows(&mut table, "(root)", tree);
        table.to_string()
    }

    fn format_plan(&self, outcome: &PlanOutcome) -> String {
        let mut table = Table::new();
        table.set_header(vec![
            "Path",
            "Entity",
            "Fetch",
            "Projection",
            "Computed",
            "Filter",
            "Order By",
            "Top",
            "Skip",
        ]);
        add_plan_rows(&mut table, "(root)", "query", &outcome.plan);

        let mut output = table.to_string();
        output.push_str(&format!(
            "\n{} node(s), {} quer{}",
            outcome.plan.node_count(),
            outcome.plan.query_count(),
            if outcome.plan.query_count() == 1 { "y" } else { "ies" }
        ));
        if !outcome.diagnostics.is_empty() {
            output.push_str("\n\n");
            output.push_str(&diagnostics_table(&outcome.diagnostics));
        }
        output
    }

    fn format_response(&self, response: &QueryResponse) -> String {
        let mut output = if response.value.is_empty() {
            "No results".to_string()
        } else {
            let mut columns: Vec<&str> = Vec::new();
            for object in &response.value {
                for key in object.keys() {
                    if !columns.contains(&key) {
                        columns.push(key);
                    }
                }
            }

            let mut table = Table::new();
            table.set_header(columns.clone());
            for object in &response.value {
                let row: Vec<String> = columns
                    .iter()
                    .map(|column| object.get(column).map(format_cell).unwrap_or_default())
                    .collect();
                table.add_row(row);
            }
            table.to_string()
        };

        if let Some(count) = response.count {
            output.push_str(&format!("\n{} matching row(s)", count));
        }
        if !response.diagnostics.is_empty() {
            output.push_str("\n\n");
            output.push_str(&diagnostics_table(&response.diagnostics));
        }
        output
    }

    fn format_relations(&self, entity: &str, relations: &[&RelationDescriptor]) -> String {
        if relations.is_empty() {
            return format!("{} has no relations", entity);
        }

        let mut table = Table::new();
        table.set_header(vec!["Relation", "Target", "Cardinality", "Ownership", "Keys"]);
        for relation in relations {
            table.add_row(vec![
                relation.name.clone(),
                relation.target_name.clone(),
                format!("{:?}", relation.cardinality),
                format!("{:?}", relation.ownership),
                describe_keys(&relation.kind),
            ]);
        }
        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_tree(&self, tree: &RequestTree) -> String {
        to_json(tree)
    }

    fn format_plan(&self, outcome: &PlanOutcome) -> String {
        to_json(outcome)
    }

    fn format_response(&self, response: &QueryResponse) -> String {
        to_json(response)
    }

    fn format_relations(&self, _entity: &str, relations: &[&RelationDescriptor]) -> String {
        to_json(&relations)
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

fn add_tree_rows(table: &mut Table, path: &str, tree: &RequestTree) {
    let select = match tree.selection() {
        None => "*".to_string(),
        Some(fields) => fields.iter().cloned().collect::<Vec<_>>().join(", "),
    };
    let order_by = tree
        .order_by
        .as_ref()
        .map(|specs| specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();

    table.add_row(vec![
        path.to_string(),
        select,
        tree.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
        order_by,
        option_cell(tree.top),
        option_cell(tree.skip),
        if tree.count { "yes".to_string() } else { String::new() },
    ]);

    for (name, nested) in &tree.expand {
        let child_path = if path == "(root)" {
            name.clone()
        } else {
            format!("{}/{}", path, name)
        };
        add_tree_rows(table, &child_path, nested);
    }
}

fn add_plan_rows(table: &mut Table, path: &str, strategy: &str, node: &FetchPlanNode) {
    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    table.add_row(vec![
        path.to_string(),
        node.entity_name.clone(),
        strategy.to_string(),
        join(&node.projection),
        join(&node.computed_fields),
        node.filter.as_ref().map(ToString::to_string).unwrap_or_default(),
        node.order_by
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        option_cell(node.top),
        option_cell(node.skip),
    ]);

    let child_path = |name: &str| {
        if path == "(root)" {
            name.to_string()
        } else {
            format!("{}/{}", path, name)
        }
    };
    for (name, child) in &node.join_children {
        add_plan_rows(table, &child_path(name), "join", child);
    }
    for (name, child) in &node.batch_children {
        add_plan_rows(table, &child_path(name), "batch", child);
    }
}

fn diagnostics_table(diagnostics: &[Diagnostic]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Warning", "Path", "Message"]);
    for diagnostic in diagnostics {
        table.add_row(vec![
            diagnostic.kind.to_string(),
            diagnostic.path.clone(),
            diagnostic.message.clone(),
        ]);
    }
    table.to_string()
}

fn option_cell(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Scalars print as-is; nested objects and lists print as compact JSON.
fn format_cell(value: &ProjectedValue) -> String {
    match value {
        ProjectedValue::Scalar(v) => v.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn describe_keys(kind: &RelationKind) -> String {
    match kind {
        RelationKind::ManyToOne { local_key } | RelationKind::OneToOne { local_key } => {
            format!("local {}", local_key)
        }
        RelationKind::OneToOneReverse { remote_key } | RelationKind::OneToMany { remote_key } => {
            format!("remote {}", remote_key)
        }
        RelationKind::ManyToMany {
            through,
            source_key,
            target_key,
        } => format!("{} ({} -> {})", through, source_key, target_key),
    }
}
