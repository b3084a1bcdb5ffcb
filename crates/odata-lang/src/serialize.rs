//! Rendering a request tree back into a query string.

use crate::ast::RequestTree;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;

/// Characters escaped in top-level option values.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'`');

impl RequestTree {
    /// Render this tree as a query string (without the leading `?`).
    ///
    /// Parsing the result yields an equal tree for any tree the parser can
    /// produce.
    pub fn to_query_string(&self) -> String {
        options(self)
            .into_iter()
            .map(|(key, value)| {
                format!("{}={}", key, utf8_percent_encode(&value, QUERY_VALUE))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn options(tree: &RequestTree) -> Vec<(&'static str, String)> {
    let mut options = Vec::new();

    if let Some(select) = tree.selection() {
        options.push(("$select", select.iter().cloned().collect::<Vec<_>>().join(",")));
    }
    if let Some(filter) = &tree.filter {
        options.push(("$filter", filter.as_str().to_string()));
    }
    if let Some(order_by) = &tree.order_by {
        let keys: Vec<String> = order_by.iter().map(ToString::to_string).collect();
        options.push(("$orderby", keys.join(",")));
    }
    if let Some(top) = tree.top {
        options.push(("$top", top.to_string()));
    }
    if let Some(skip) = tree.skip {
        options.push(("$skip", skip.to_string()));
    }
    if tree.count {
        options.push(("$count", "true".to_string()));
    }
    if let Some(search) = &tree.search {
        options.push(("$search", search.clone()));
    }
    if !tree.expand.is_empty() {
        options.push(("$expand", expand_value(&tree.expand)));
    }

    options
}

fn expand_value(expand: &BTreeMap<String, RequestTree>) -> String {
    expand
        .iter()
        .map(|(name, nested)| {
            let nested_options = options(nested);
            if nested_options.is_empty() {
                name.clone()
            } else {
                let inner: Vec<String> = nested_options
                    .into_iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect();
                format!("{}({})", name, inner.join(";"))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
