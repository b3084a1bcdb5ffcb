//! Request tree produced by the query-string parser.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The parsed form of a query string, recursive through `expand`.
///
/// `select == None` means "all fields"; an empty set means the same and is
/// normalized to `None` by the builder and by deserialization. Expansion keys
/// are unique; when the same relation is expanded twice the later occurrence
/// replaces the earlier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestTree {
    #[serde(
        default,
        deserialize_with = "deserialize_select",
        skip_serializing_if = "Option::is_none"
    )]
    pub select: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<OrderSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default)]
    pub count: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expand: BTreeMap<String, RequestTree>,
}

impl RequestTree {
    /// Create an empty request (all fields, no expansion).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the selected fields.
    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        self.select = (!fields.is_empty()).then_some(fields);
        self
    }

    /// Set the filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(FilterExpr::new(filter));
        self
    }

    /// Append an ordering key.
    pub fn with_order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by
            .get_or_insert_with(Vec::new)
            .push(OrderSpec::new(field, direction));
        self
    }

    /// Set the row limit.
    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Set the row offset.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Request a total count.
    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Expand a relation with its own nested request.
    pub fn with_expand(mut self, relation: impl Into<String>, nested: RequestTree) -> Self {
        self.expand.insert(relation.into(), nested);
        self
    }

    /// Whether every field is selected.
    pub fn selects_all(&self) -> bool {
        self.selection().is_none()
    }

    /// Explicitly selected names; `None` when every field is selected.
    pub fn selection(&self) -> Option<&BTreeSet<String>> {
        self.select.as_ref().filter(|fields| !fields.is_empty())
    }

    /// Whether `field` is part of the selection.
    pub fn selects(&self, field: &str) -> bool {
        match self.selection() {
            None => true,
            Some(fields) => fields.contains(field),
        }
    }

    /// Nesting depth of the expansion tree. A request without expansions
    /// has depth 0.
    pub fn depth(&self) -> usize {
        self.expand
            .values()
            .map(|nested| nested.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

fn deserialize_select<'de, D>(deserializer: D) -> Result<Option<BTreeSet<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let select = Option::<BTreeSet<String>>::deserialize(deserializer)?;
    Ok(select.filter(|fields| !fields.is_empty()))
}

/// An opaque filter expression, carried verbatim to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpr(String);

impl FilterExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `$orderby` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}", self.field),
            SortDirection::Desc => write!(f, "{} desc", self.field),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let tree = RequestTree::new()
            .with_select(["title", "body"])
            .with_top(10)
            .with_expand("author", RequestTree::new().with_select(["name"]));

        assert!(tree.selects("title"));
        assert!(!tree.selects("id"));
        assert_eq!(tree.top, Some(10));
        assert!(tree.expand["author"].selects("name"));
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_empty_selection_means_all_fields() {
        let empty: [&str; 0] = [];
        let tree = RequestTree::new().with_select(empty);
        assert_eq!(tree.select, None);
        assert!(tree.selects_all());

        let tree: RequestTree = serde_json::from_str(r#"{"select": []}"#).unwrap();
        assert_eq!(tree.select, None);

        let tree = RequestTree {
            select: Some(BTreeSet::new()),
            ..RequestTree::default()
        };
        assert!(tree.selects_all());
        assert!(tree.selects("anything"));
        assert_eq!(tree.selection(), None);
    }

    #[test]
    fn test_depth() {
        let tree = RequestTree::new()
            .with_expand("tags", RequestTree::new())
            .with_expand(
                "author",
                RequestTree::new().with_expand(
                    "posts",
                    RequestTree::new().with_expand("comments", RequestTree::new()),
                ),
            );
        assert_eq!(tree.depth(), 3);
        assert_eq!(RequestTree::new().depth(), 0);
    }

    #[test]
    fn test_order_spec_display() {
        assert_eq!(OrderSpec::asc("title").to_string(), "title");
        assert_eq!(OrderSpec::desc("created_at").to_string(), "created_at desc");
    }

    #[test]
    fn test_serialize_skips_defaults() {
        let tree = RequestTree::new().with_top(5);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json, serde_json::json!({ "top": 5, "count": false }));
    }
}
