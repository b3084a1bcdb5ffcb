//! OData query options
//!
//! This crate turns the system query options of an OData v4 request URL into
//! a [`RequestTree`], a recursive description of which fields and which
//! related entities a client asked for.
//!
//! # Supported options
//!
//! ```text
//! $select=title,body,author.name
//! $filter=views gt 10
//! $orderby=createdAt desc,title
//! $top=10&$skip=20&$count=true
//! $search=red shoes
//! $expand=author($select=name),comments($filter=approved eq true;$top=5)
//! $expand=author($expand=posts($orderby=createdAt desc;$top=3))
//! ```
//!
//! Filter and search expressions are carried verbatim; their grammar belongs
//! to whoever executes them. Parameters that do not start with `$` are
//! ignored, as is `$format`.
//!
//! # Usage
//!
//! ```rust
//! use odata_lang::parse;
//!
//! let tree = parse("$select=title&$expand=author($select=name)").unwrap();
//! assert!(tree.selects("title"));
//! assert!(tree.expand["author"].selects("name"));
//!
//! // Trees render back into an equivalent query string.
//! assert_eq!(parse(&tree.to_query_string()).unwrap(), tree);
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
mod serialize;
pub mod span;


// Re-export main types
pub use ast::{FilterExpr, OrderSpec, RequestTree, SortDirection};
pub use error::ParseError;
pub use span::Span;

/// Parse a raw query string into a request tree.
///
/// # Example
///
/// ```rust
/// use odata_lang::parse;
///
/// let tree = parse("?$top=5&$orderby=title desc").unwrap();
/// assert_eq!(tree.top, Some(5));
/// ```
pub fn parse(raw: &str) -> Result<RequestTree, ParseError> {
    parser::parse(raw)
}

/// Tokenize an `$expand` value (for debugging/testing).
///
/// # Example
///
/// ```rust
/// use odata_lang::tokenize;
///
/// let tokens = tokenize("author($select=name)").unwrap();
/// assert_eq!(tokens.len(), 6);
/// ```
pub fn tokenize(expand_value: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(expand_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let tree = parse("$expand=comments($top=2;$count=true)&$select=title").unwrap();
        assert_eq!(
            tree.to_query_string(),
            "$select=title&$expand=comments($top=2;$count=true)"
        );
    }

    #[test]
    fn test_error_with_source_context() {
        let expand = "author($select=name";
        let err = parse(&format!("$expand={}", expand)).unwrap_err();
        let formatted = err.format_with_source(expand);
        assert!(formatted.contains("error"));
        assert!(formatted.contains("unbalanced '('"));
        assert!(formatted.contains('^'));
    }
}
