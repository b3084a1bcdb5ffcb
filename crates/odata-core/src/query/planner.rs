//! Fetch plan builder.
//!
//! The planner walks a [`RequestTree`] against the catalog and decides, for
//! every expansion, whether it is join-fetched with its parent or
//! batch-fetched by its own query. It never fails on the request itself:
//! anything it cannot honour is dropped and reported as a [`Diagnostic`].

use super::diagnostic::{join_path, Diagnostic, DiagnosticKind};
use super::plan::{FetchPlanNode, PlanOutcome};
use crate::catalog::{Catalog, EntityDef, EntityId, RelationDescriptor};
use crate::config::PlannerConfig;
use crate::error::Error;
use odata_lang::{OrderSpec, RequestTree};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, trace};

/// Per-request state threaded explicitly through the recursion.
#[derive(Default)]
struct BuildContext {
    /// Expansion edges from the root to the current node.
    path: Vec<(EntityId, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl BuildContext {
    fn path_to(&self, name: &str) -> String {
        let segments: Vec<&str> = self.path.iter().map(|(_, rel)| rel.as_str()).collect();
        join_path(segments.as_slice(), name)
    }

    fn record(&mut self, kind: DiagnosticKind, name: &str, message: String) {
        let diagnostic = Diagnostic::new(kind, self.path_to(name), message);
        debug!(kind = %diagnostic.kind, path = %diagnostic.path, "{}", diagnostic.message);
        self.diagnostics.push(diagnostic);
    }
}

/// Planner that transforms request trees into fetch plans.
pub struct QueryPlanner<'a> {
    catalog: &'a Catalog,
    config: PlannerConfig,
}

impl<'a> QueryPlanner<'a> {
    /// Create a new planner with a catalog reference and default limits.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            config: PlannerConfig::default(),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a request against the named root entity.
    ///
    /// Only an unregistered root entity is an error.
    #[instrument(skip_all, fields(entity = entity))]
    pub fn build(&self, entity: &str, tree: &RequestTree) -> Result<PlanOutcome, Error> {
        let id = self
            .catalog
            .entity_id(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;
        self.build_for(id, tree)
    }

    /// Plan a request against a root entity id.
    pub fn build_for(&self, entity: EntityId, tree: &RequestTree) -> Result<PlanOutcome, Error> {
        let def = self
            .catalog
            .entity(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;

        let mut ctx = BuildContext::default();
        let plan = self.build_node(entity, def, None, tree, 0, &mut ctx);
        debug!(
            nodes = plan.node_count(),
            queries = plan.query_count(),
            diagnostics = ctx.diagnostics.len(),
            "fetch plan built"
        );

        Ok(PlanOutcome {
            plan,
            diagnostics: ctx.diagnostics,
        })
    }

    fn build_node(
        &self,
        entity: EntityId,
        def: &EntityDef,
        relation: Option<&RelationDescriptor>,
        tree: &RequestTree,
        depth: usize,
        ctx: &mut BuildContext,
    ) -> FetchPlanNode {
        let mut projection = BTreeSet::new();
        let mut computed_fields = BTreeSet::new();
        projection.insert(def.identity_field.clone());

        match tree.selection() {
            None => {
                for field in &def.fields {
                    if field.is_virtual() {
                        computed_fields.insert(field.name.clone());
                    } else {
                        projection.insert(field.name.clone());
                    }
                }
            }
            Some(select) => {
                for name in select {
                    self.select_field(entity, def, tree, name, &mut projection, &mut computed_fields, ctx);
                }
            }
        }

        // Batched rows are grouped per parent by the key they point back with.
        if let Some(remote_key) = relation.and_then(RelationDescriptor::remote_key) {
            projection.insert(remote_key.to_string());
        }

        let order_by = self.order_by(def, tree.order_by.as_deref().unwrap_or_default(), ctx);

        let mut join_children = BTreeMap::new();
        let mut batch_children = BTreeMap::new();

        for (name, nested) in &tree.expand {
            if depth + 1 > self.config.max_expansion_depth {
                let message = format!(
                    "expansion is nested deeper than the limit of {}",
                    self.config.max_expansion_depth
                );
                ctx.record(DiagnosticKind::DepthExceeded, name, message);
                continue;
            }

            let descriptor = match self.catalog.describe(entity, name) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    ctx.record(DiagnosticKind::UnknownField, name, err.to_string());
                    continue;
                }
            };

            if self.config.prune_cycles
                && ctx.path.iter().any(|(id, rel)| *id == entity && rel == name)
            {
                let message = format!(
                    "'{}' on {} is already expanded on this path",
                    name, def.name
                );
                ctx.record(DiagnosticKind::CycleDetected, name, message);
                continue;
            }

            let Some(target_def) = self.catalog.entity(descriptor.target) else {
                continue;
            };

            if let Some(local_key) = descriptor.local_key() {
                projection.insert(local_key.to_string());
            }

            ctx.path.push((entity, name.clone()));
            let child = self.build_node(
                descriptor.target,
                target_def,
                Some(descriptor),
                nested,
                depth + 1,
                ctx,
            );
            ctx.path.pop();

            if descriptor.is_join() {
                trace!(relation = %name, target = %descriptor.target_name, "join fetch");
                join_children.insert(name.clone(), child);
            } else {
                trace!(relation = %name, target = %descriptor.target_name, "batch fetch");
                batch_children.insert(name.clone(), child);
            }
        }

        FetchPlanNode {
            entity,
            entity_name: def.name.clone(),
            identity_field: def.identity_field.clone(),
            relation: relation.cloned(),
            depth,
            projection,
            computed_fields,
            join_children,
            batch_children,
            filter: tree.filter.clone(),
            order_by,
            top: tree.top,
            skip: tree.skip,
            count: tree.count,
        }
    }

    /// Route one `$select` entry to the projection, the computed set, or a
    /// diagnostic.
    #[allow(clippy::too_many_arguments)]
    fn select_field(
        &self,
        entity: EntityId,
        def: &EntityDef,
        tree: &RequestTree,
        name: &str,
        projection: &mut BTreeSet<String>,
        computed_fields: &mut BTreeSet<String>,
        ctx: &mut BuildContext,
    ) {
        if let Some(field) = def.get_field(name) {
            if field.is_virtual() {
                computed_fields.insert(field.name.clone());
            } else {
                projection.insert(field.name.clone());
            }
            return;
        }

        if tree.expand.contains_key(name) {
            // satisfied by the expansion itself
            return;
        }

        let message = if self.catalog.describe(entity, name).is_ok() {
            format!("relation '{}' is selected but not expanded", name)
        } else {
            format!("unknown field '{}' on {}", name, def.name)
        };
        ctx.record(DiagnosticKind::UnknownField, name, message);
    }

    fn order_by(&self, def: &EntityDef, keys: &[OrderSpec], ctx: &mut BuildContext) -> Vec<OrderSpec> {
        if !self.config.validate_order_by {
            return keys.to_vec();
        }

        keys.iter()
            .filter(|spec| match def.get_field(&spec.field) {
                Some(field) if field.is_stored() => true,
                Some(_) => {
                    let message = format!("cannot order by computed field '{}'", spec.field);
                    ctx.record(DiagnosticKind::UnknownField, &spec.field, message);
                    false
                }
                None => {
                    let message = format!("unknown order key '{}' on {}", spec.field, def.name);
                    ctx.record(DiagnosticKind::UnknownField, &spec.field, message);
                    false
                }
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, RelationDef, SchemaBundle};
    use odata_lang::{parse, SortDirection};
    use pretty_assertions::assert_eq;

    fn create_test_catalog() -> Catalog {
        let author = EntityDef::new("Author", "id").with_stored(["id", "name", "email"]);
        let post = EntityDef::new("Post", "id")
            .with_stored(["id", "title", "body", "author_id"])
            .with_field(FieldDef::computed("word_count", "wc(body)"));
        let comment =
            EntityDef::new("Comment", "id").with_stored(["id", "text", "approved", "post_id", "author_id"]);
        let tag = EntityDef::new("Tag", "id").with_stored(["id", "label"]);

        let schema = SchemaBundle::new()
            .with_entity(author)
            .with_entity(post)
            .with_entity(comment)
            .with_entity(tag)
            .with_relation(RelationDef::many_to_one("author", "Post", "author_id", "Author"))
            .with_relation(RelationDef::one_to_many("posts", "Author", "Post", "author_id"))
            .with_relation(RelationDef::one_to_many("comments", "Post", "Comment", "post_id"))
            .with_relation(RelationDef::many_to_one("post", "Comment", "post_id", "Post"))
            .with_relation(RelationDef::many_to_one("author", "Comment", "author_id", "Author"))
            .with_relation(RelationDef::many_to_many(
                "tags", "Post", "Tag", "post_tags", "post_id", "tag_id",
            ));

        Catalog::from_bundle(schema).unwrap()
    }

    fn plan(catalog: &Catalog, entity: &str, query: &str) -> PlanOutcome {
        let tree = parse(query).unwrap();
        QueryPlanner::new(catalog).build(entity, &tree).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_simple_plan() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Author", "$select=name");

        assert!(outcome.diagnostics.is_empty());
        assert!(outcome.plan.is_root());
        assert_eq!(outcome.plan.projection, set(&["id", "name"]));
        assert!(outcome.plan.join_children.is_empty());
        assert!(outcome.plan.batch_children.is_empty());
    }

    #[test]
    fn test_select_all_projects_stored_fields() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "");

        assert_eq!(outcome.plan.projection, set(&["author_id", "body", "id", "title"]));
        assert_eq!(outcome.plan.computed_fields, set(&["word_count"]));
    }

    #[test]
    fn test_empty_selection_projects_all_fields() {
        let catalog = create_test_catalog();
        let tree: RequestTree = serde_json::from_str(r#"{"select": []}"#).unwrap();
        let outcome = QueryPlanner::new(&catalog).build("Post", &tree).unwrap();
        assert_eq!(outcome.plan.projection, set(&["author_id", "body", "id", "title"]));
        assert_eq!(outcome.plan.computed_fields, set(&["word_count"]));

        let tree = RequestTree {
            select: Some(BTreeSet::new()),
            ..RequestTree::default()
        };
        let outcome = QueryPlanner::new(&catalog).build("Post", &tree).unwrap();
        assert_eq!(outcome.plan.projection, set(&["author_id", "body", "id", "title"]));
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_forward_join_and_reverse_batch() {
        let catalog = create_test_catalog();
        let outcome = plan(
            &catalog,
            "Post",
            "$select=title&$expand=author($select=name),comments($filter=approved eq true;$orderby=id desc;$top=5)",
        );
        let root = &outcome.plan;

        assert!(outcome.diagnostics.is_empty());
        assert_eq!(root.projection, set(&["author_id", "id", "title"]));

        let author = &root.join_children["author"];
        assert_eq!(author.projection, set(&["id", "name"]));
        assert_eq!(author.depth, 1);

        let comments = &root.batch_children["comments"];
        assert_eq!(comments.projection, set(&["id", "post_id", "text", "approved", "author_id"]));
        assert_eq!(comments.filter.as_ref().map(|f| f.as_str()), Some("approved eq true"));
        assert_eq!(comments.order_by, vec![OrderSpec::new("id", SortDirection::Desc)]);
        assert_eq!(comments.top, Some(5));
        assert_eq!(root.query_count(), 2);
    }

    #[test]
    fn test_local_key_added_even_when_not_selected() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Comment", "$select=text&$expand=post($select=title)");

        assert!(outcome.plan.projection.contains("post_id"));
        assert!(outcome.plan.projection.contains("id"));
    }

    #[test]
    fn test_batch_child_projects_grouping_key() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Author", "$expand=posts($select=title)");

        let posts = &outcome.plan.batch_children["posts"];
        assert_eq!(posts.projection, set(&["author_id", "id", "title"]));
    }

    #[test]
    fn test_many_to_many_is_batched() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$expand=tags");

        let tags = &outcome.plan.batch_children["tags"];
        assert_eq!(tags.projection, set(&["id", "label"]));
        assert!(outcome.plan.join_children.is_empty());
    }

    #[test]
    fn test_unknown_relation_is_dropped() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$expand=editor,author");

        assert!(outcome.plan.join_children.contains_key("author"));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::UnknownField);
        assert_eq!(outcome.diagnostics[0].path, "editor");
    }

    #[test]
    fn test_scalar_expand_is_dropped() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$expand=title");

        assert!(outcome.plan.join_children.is_empty());
        assert!(outcome.diagnostics[0].message.contains("is a field, not a relation"));
    }

    #[test]
    fn test_unknown_select_field_is_dropped() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$select=title,subtitle");

        assert_eq!(outcome.plan.projection, set(&["id", "title"]));
        assert_eq!(
            outcome.diagnostics,
            vec![Diagnostic::new(
                DiagnosticKind::UnknownField,
                "subtitle",
                "unknown field 'subtitle' on Post"
            )]
        );
    }

    #[test]
    fn test_selected_relation_requires_expand() {
        let catalog = create_test_catalog();

        let outcome = plan(&catalog, "Post", "$select=title,author&$expand=author");
        assert!(outcome.diagnostics.is_empty());

        let outcome = plan(&catalog, "Post", "$select=title,author");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(outcome.diagnostics[0].message.contains("selected but not expanded"));
    }

    #[test]
    fn test_dotted_select_without_expansion_is_reported() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$select=author.name");

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].path, "author.name");
    }

    #[test]
    fn test_computed_field_kept_out_of_projection() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$select=title,word_count");

        assert_eq!(outcome.plan.projection, set(&["id", "title"]));
        assert_eq!(outcome.plan.computed_fields, set(&["word_count"]));
    }

    #[test]
    fn test_depth_limit_truncates() {
        let catalog = create_test_catalog();
        let outcome = plan(
            &catalog,
            "Comment",
            "$expand=post($expand=author($expand=posts($expand=comments)))",
        );

        let posts = &outcome.plan.join_children["post"].join_children["author"].batch_children["posts"];
        assert_eq!(posts.depth, 3);
        assert!(posts.batch_children.is_empty());
        assert_eq!(outcome.plan.max_depth(), 3);

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::DepthExceeded);
        assert_eq!(outcome.diagnostics[0].path, "post/author/posts/comments");
    }

    #[test]
    fn test_custom_depth_limit() {
        let catalog = create_test_catalog();
        let tree = parse("$expand=author($expand=posts)").unwrap();
        let outcome = QueryPlanner::new(&catalog)
            .with_config(PlannerConfig::new().with_max_expansion_depth(1))
            .build("Post", &tree)
            .unwrap();

        assert!(outcome.plan.join_children["author"].batch_children.is_empty());
        assert_eq!(outcome.diagnostics[0].path, "author/posts");
    }

    #[test]
    fn test_cycle_is_pruned() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$expand=author($expand=posts($expand=author))");

        let posts = &outcome.plan.join_children["author"].batch_children["posts"];
        assert!(posts.join_children.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::CycleDetected);
        assert_eq!(outcome.diagnostics[0].path, "author/posts/author");
    }

    #[test]
    fn test_cycle_pruning_can_be_disabled() {
        let catalog = create_test_catalog();
        let tree = parse("$expand=author($expand=posts($expand=author))").unwrap();
        let outcome = QueryPlanner::new(&catalog)
            .with_config(PlannerConfig::new().with_cycle_pruning(false))
            .build("Post", &tree)
            .unwrap();

        let posts = &outcome.plan.join_children["author"].batch_children["posts"];
        assert!(posts.join_children.contains_key("author"));
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_same_relation_on_different_branches_is_not_a_cycle() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$expand=author,comments($expand=author)");

        assert!(outcome.diagnostics.is_empty());
        assert!(outcome.plan.batch_children["comments"]
            .join_children
            .contains_key("author"));
    }

    #[test]
    fn test_unknown_order_key_is_dropped() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$orderby=title,rating desc,word_count");

        assert_eq!(outcome.plan.order_by, vec![OrderSpec::asc("title")]);
        assert_eq!(outcome.diagnostics.len(), 2);
    }

    #[test]
    fn test_order_validation_can_be_disabled() {
        let catalog = create_test_catalog();
        let tree = parse("$orderby=rating desc").unwrap();
        let outcome = QueryPlanner::new(&catalog)
            .with_config(PlannerConfig::new().with_order_by_validation(false))
            .build("Post", &tree)
            .unwrap();

        assert_eq!(outcome.plan.order_by, vec![OrderSpec::desc("rating")]);
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_options_are_carried() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$filter=id gt 3&$top=10&$skip=20&$count=true");

        assert_eq!(outcome.plan.filter.as_ref().map(|f| f.as_str()), Some("id gt 3"));
        assert_eq!(outcome.plan.top, Some(10));
        assert_eq!(outcome.plan.skip, Some(20));
        assert!(outcome.plan.count);
    }

    #[test]
    fn test_unknown_root_entity() {
        let catalog = create_test_catalog();
        let result = QueryPlanner::new(&catalog).build("Unknown", &RequestTree::new());
        assert!(matches!(result, Err(Error::UnknownEntity(ref name)) if name == "Unknown"));
    }

    #[test]
    fn test_child_records_relation() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Author", "$expand=posts");

        let posts = outcome.plan.child("posts").unwrap();
        let relation = posts.relation.as_ref().unwrap();
        assert_eq!(relation.name, "posts");
        assert_eq!(relation.source_name, "Author");
        assert_eq!(posts.entity_name, "Post");
    }

    #[test]
    fn test_explain() {
        let catalog = create_test_catalog();
        let outcome = plan(&catalog, "Post", "$select=title&$expand=author($select=name),tags($top=2)");

        assert_eq!(
            outcome.plan.explain(),
            "Post [author_id, id, title]\n  join author -> Author [id, name]\n  batch tags -> Tag [id, label] top=2\n"
        );
    }
}
