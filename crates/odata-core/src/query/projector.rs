//! Shape projection of materialized rows into response objects.

use super::diagnostic::{join_path, Diagnostic, DiagnosticKind};
use super::executor::{MaterializedEntity, Related};
use crate::catalog::{Catalog, EntityId, FieldDef};
use crate::error::ComputedFieldError;
use crate::value::Value;
use odata_lang::RequestTree;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

/// Computes virtual fields after the fetch.
pub trait ComputedFieldResolver: Send + Sync {
    fn resolve(
        &self,
        entity: &str,
        field: &FieldDef,
        row: &MaterializedEntity,
    ) -> Result<Value, ComputedFieldError>;
}

impl<F> ComputedFieldResolver for F
where
    F: Fn(&str, &FieldDef, &MaterializedEntity) -> Result<Value, ComputedFieldError> + Send + Sync,
{
    fn resolve(
        &self,
        entity: &str,
        field: &FieldDef,
        row: &MaterializedEntity,
    ) -> Result<Value, ComputedFieldError> {
        self(entity, field, row)
    }
}

/// Resolver that knows no computed fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoComputedFields;

impl ComputedFieldResolver for NoComputedFields {
    fn resolve(
        &self,
        _entity: &str,
        _field: &FieldDef,
        _row: &MaterializedEntity,
    ) -> Result<Value, ComputedFieldError> {
        Err(ComputedFieldError::Unsupported)
    }
}

static NO_COMPUTED_FIELDS: NoComputedFields = NoComputedFields;

/// A response object. Entries keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedObject {
    entries: Vec<(String, ProjectedValue)>,
}

impl ProjectedObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ProjectedValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&ProjectedValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProjectedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ProjectedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A value in a projected object.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedValue {
    Scalar(Value),
    Object(ProjectedObject),
    List(Vec<ProjectedObject>),
}

impl ProjectedValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ProjectedValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ProjectedObject> {
        match self {
            ProjectedValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ProjectedObject]> {
        match self {
            ProjectedValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl Serialize for ProjectedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProjectedValue::Scalar(v) => v.serialize(serializer),
            ProjectedValue::Object(o) => o.serialize(serializer),
            ProjectedValue::List(items) => items.serialize(serializer),
        }
    }
}

/// Prunes and nests materialized rows into the requested response shape.
pub struct ShapeProjector<'a> {
    catalog: &'a Catalog,
    resolver: &'a dyn ComputedFieldResolver,
}

impl<'a> ShapeProjector<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            resolver: &NO_COMPUTED_FIELDS,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ComputedFieldResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Project one row of `entity`.
    ///
    /// Computed-field failures are appended to `diagnostics`; the field is
    /// left out of the object.
    pub fn project(
        &self,
        entity: EntityId,
        row: &MaterializedEntity,
        tree: &RequestTree,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ProjectedObject {
        let mut path = Vec::new();
        self.project_node(entity, row, tree, &mut path, diagnostics)
    }

    /// Project every row, preserving order.
    pub fn project_all(
        &self,
        entity: EntityId,
        rows: &[MaterializedEntity],
        tree: &RequestTree,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<ProjectedObject> {
        rows.iter()
            .map(|row| self.project(entity, row, tree, diagnostics))
            .collect()
    }

    fn project_node(
        &self,
        entity: EntityId,
        row: &MaterializedEntity,
        tree: &RequestTree,
        path: &mut Vec<String>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ProjectedObject {
        let mut object = ProjectedObject::new();
        let Some(def) = self.catalog.entity(entity) else {
            return object;
        };

        for field in def.fields.iter().filter(|f| tree.selects(&f.name)) {
            if field.is_virtual() {
                match self.resolver.resolve(&def.name, field, row) {
                    Ok(value) => object.insert(field.name.clone(), ProjectedValue::Scalar(value)),
                    Err(err) => {
                        warn!(entity = %def.name, field = %field.name, error = %err, "computed field failed");
                        diagnostics.push(Diagnostic::new(
                            DiagnosticKind::ComputedFieldFailed,
                            join_path(path.as_slice(), &field.name),
                            format!("failed to compute '{}' on {}: {}", field.name, def.name, err),
                        ));
                    }
                }
            } else {
                let value = row.get(&field.name).cloned().unwrap_or_default();
                object.insert(field.name.clone(), ProjectedValue::Scalar(value));
            }
        }

        for (name, nested) in &tree.expand {
            let Some(related) = row.related.get(name) else {
                continue;
            };
            let Ok(descriptor) = self.catalog.describe(entity, name) else {
                continue;
            };

            path.push(name.clone());
            match related {
                Related::One(None) => object.insert(name.clone(), ProjectedValue::Scalar(Value::Null)),
                Related::One(Some(target)) => {
                    let projected =
                        self.project_node(descriptor.target, target, nested, path, diagnostics);
                    object.insert(name.clone(), ProjectedValue::Object(projected));
                }
                Related::Many { rows, total_count } => {
                    let items = rows
                        .iter()
                        .map(|r| self.project_node(descriptor.target, r, nested, path, diagnostics))
                        .collect();
                    if let (true, Some(count)) = (nested.count, total_count) {
                        let count = i64::try_from(*count).unwrap_or(i64::MAX);
                        object.insert(
                            format!("{}@odata.count", name),
                            ProjectedValue::Scalar(Value::Int(count)),
                        );
                    }
                    object.insert(name.clone(), ProjectedValue::List(items));
                }
            }
            path.pop();
        }

        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, RelationDef, SchemaBundle};
    use odata_lang::parse;
    use pretty_assertions::assert_eq;

    fn create_catalog() -> Catalog {
        let schema = SchemaBundle::new()
            .with_entity(
                EntityDef::new("Post", "id")
                    .with_stored(["id", "title", "body", "author_id"])
                    .with_field(FieldDef::computed("word_count", "wc(body)")),
            )
            .with_entity(EntityDef::new("Author", "id").with_stored(["id", "name", "email"]))
            .with_entity(EntityDef::new("Comment", "id").with_stored(["id", "text", "post_id"]))
            .with_relation(RelationDef::many_to_one("author", "Post", "author_id", "Author"))
            .with_relation(RelationDef::one_to_many("comments", "Post", "Comment", "post_id"));
        Catalog::from_bundle(schema).unwrap()
    }

    fn post_row() -> MaterializedEntity {
        let author = MaterializedEntity::default()
            .with_field("id", 7)
            .with_field("name", "Ada")
            .with_field("email", "ada@example.com");
        let comment = |id: i64, text: &str| {
            MaterializedEntity::default()
                .with_field("id", id)
                .with_field("text", text)
                .with_field("post_id", 1)
        };

        MaterializedEntity::default()
            .with_field("id", 1)
            .with_field("title", "Hello")
            .with_field("body", "one two three")
            .with_field("author_id", 7)
            .with_related("author", Related::One(Some(Box::new(author))))
            .with_related(
                "comments",
                Related::Many {
                    rows: vec![comment(2, "b"), comment(1, "a")],
                    total_count: Some(5),
                },
            )
    }

    fn project(query: &str, row: &MaterializedEntity) -> (ProjectedObject, Vec<Diagnostic>) {
        let catalog = create_catalog();
        let post = catalog.entity_id("Post").unwrap();
        let tree = parse(query).unwrap();
        let mut diagnostics = Vec::new();
        let object = ShapeProjector::new(&catalog).project(post, row, &tree, &mut diagnostics);
        (object, diagnostics)
    }

    #[test]
    fn test_select_prunes_fields() {
        let (object, _) = project("$select=title", &post_row());
        assert_eq!(object.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_default_expansion_includes_all_fields() {
        let (object, _) = project("$select=id,title&$expand=author", &post_row());

        assert_eq!(object.keys().collect::<Vec<_>>(), vec!["id", "title", "author"]);
        let author = object.get("author").and_then(ProjectedValue::as_object).unwrap();
        assert_eq!(author.keys().collect::<Vec<_>>(), vec!["id", "name", "email"]);
    }

    #[test]
    fn test_empty_selection_projects_all_fields() {
        let catalog = create_catalog();
        let post = catalog.entity_id("Post").unwrap();
        let tree = RequestTree::new().with_expand(
            "author",
            RequestTree {
                select: Some(Default::default()),
                ..RequestTree::default()
            },
        );
        let tree = RequestTree {
            select: Some(Default::default()),
            ..tree
        };

        let mut diagnostics = Vec::new();
        let object = ShapeProjector::new(&catalog).project(post, &post_row(), &tree, &mut diagnostics);

        assert_eq!(
            object.keys().collect::<Vec<_>>(),
            vec!["id", "title", "body", "author_id", "author"]
        );
        let author = object.get("author").and_then(ProjectedValue::as_object).unwrap();
        assert_eq!(author.keys().collect::<Vec<_>>(), vec!["id", "name", "email"]);
        // word_count has no resolver here
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_nested_select() {
        let (object, _) = project("$select=title&$expand=author($select=name)", &post_row());
        let author = object.get("author").and_then(ProjectedValue::as_object).unwrap();
        assert_eq!(author.keys().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn test_collection_preserves_order_and_count() {
        let (object, _) = project("$select=id&$expand=comments($select=text;$count=true)", &post_row());

        assert_eq!(
            object.keys().collect::<Vec<_>>(),
            vec!["id", "comments@odata.count", "comments"]
        );
        assert_eq!(
            object.get("comments@odata.count").and_then(ProjectedValue::as_scalar),
            Some(&Value::Int(5))
        );
        let texts: Vec<_> = object
            .get("comments")
            .and_then(ProjectedValue::as_list)
            .unwrap()
            .iter()
            .map(|c| c.get("text").cloned())
            .collect();
        assert_eq!(
            texts,
            vec![
                Some(ProjectedValue::Scalar("b".into())),
                Some(ProjectedValue::Scalar("a".into()))
            ]
        );
    }

    #[test]
    fn test_oversized_count_saturates() {
        let row = MaterializedEntity::default().with_field("id", 1).with_related(
            "comments",
            Related::Many {
                rows: Vec::new(),
                total_count: Some(u64::MAX),
            },
        );
        let (object, _) = project("$select=id&$expand=comments($count=true)", &row);
        assert_eq!(
            object.get("comments@odata.count").and_then(ProjectedValue::as_scalar),
            Some(&Value::Int(i64::MAX))
        );
    }

    #[test]
    fn test_missing_single_projects_null() {
        let row = MaterializedEntity::default()
            .with_field("id", 1)
            .with_related("author", Related::One(None));
        let (object, _) = project("$select=id&$expand=author", &row);
        assert_eq!(object.get("author"), Some(&ProjectedValue::Scalar(Value::Null)));
    }

    #[test]
    fn test_missing_stored_field_projects_null() {
        let row = MaterializedEntity::default().with_field("id", 1);
        let (object, _) = project("$select=id,title", &row);
        assert_eq!(object.get("title"), Some(&ProjectedValue::Scalar(Value::Null)));
    }

    #[test]
    fn test_computed_field_failure_is_diagnosed() {
        let (object, diagnostics) = project("$select=title,word_count", &post_row());

        assert!(object.get("word_count").is_none());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::ComputedFieldFailed);
        assert_eq!(diagnostics[0].path, "word_count");
    }

    #[test]
    fn test_computed_field_resolver() {
        let catalog = create_catalog();
        let post = catalog.entity_id("Post").unwrap();
        let tree = parse("$select=word_count").unwrap();
        let resolver = |_: &str,
                        field: &FieldDef,
                        row: &MaterializedEntity|
         -> Result<Value, ComputedFieldError> {
            assert_eq!(field.name, "word_count");
            let body = row.get("body").and_then(Value::as_str).unwrap_or_default();
            Ok(Value::Int(body.split_whitespace().count() as i64))
        };

        let mut diagnostics = Vec::new();
        let object = ShapeProjector::new(&catalog)
            .with_resolver(&resolver)
            .project(post, &post_row(), &tree, &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(object.get("word_count"), Some(&ProjectedValue::Scalar(Value::Int(3))));
    }

    #[test]
    fn test_dropped_expansion_is_skipped() {
        let row = MaterializedEntity::default().with_field("id", 1);
        let (object, _) = project("$select=id&$expand=editor", &row);
        assert_eq!(object.keys().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_serialize_preserves_order() {
        let (object, _) = project("$select=title,id&$expand=author($select=name)", &post_row());
        let json = serde_json::to_string(&object).unwrap();
        assert_eq!(json, r#"{"id":1,"title":"Hello","author":{"name":"Ada"}}"#);
    }
}
