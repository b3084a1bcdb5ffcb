//! Query-string parser.
//!
//! Top-level options are split on `&` and percent-decoded. `$expand` values
//! are tokenized and parsed by a small recursive descent parser so that
//! nested option lists can contain commas, semicolons and quoted literals.

use crate::ast::{FilterExpr, OrderSpec, RequestTree, SortDirection};
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::Span;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Parse a raw query string (with or without a leading `?`) into a request
/// tree.
pub fn parse(raw: &str) -> Result<RequestTree, ParseError> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut builder = TreeBuilder::default();

    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = match pair.split_once('=') {
            Some(split) => split,
            None if pair.starts_with('$') => {
                return Err(ParseError::MalformedOption {
                    fragment: pair.to_string(),
                    reason: "missing '='".to_string(),
                })
            }
            None => (pair, ""),
        };

        let key = decode_component(raw_key, pair)?;
        let key = key.trim();
        if !key.starts_with('$') {
            trace!(key, "ignoring non-system query parameter");
            continue;
        }

        let value = decode_component(raw_value, pair)?;
        if key == "$expand" {
            builder.set_expand(parse_expand(&value)?);
        } else {
            builder.apply(key, &value)?;
        }
    }

    Ok(builder.finish())
}

/// Parse a decoded `$expand` value into its expansion map.
pub fn parse_expand(value: &str) -> Result<BTreeMap<String, RequestTree>, ParseError> {
    let mut parser = ExpandParser::new(value)?;
    parser.parse()
}

fn decode_component<'a>(component: &'a str, pair: &str) -> Result<Cow<'a, str>, ParseError> {
    let malformed = |_| ParseError::MalformedOption {
        fragment: pair.to_string(),
        reason: "invalid percent-encoding".to_string(),
    };

    if component.contains('+') {
        let spaced = component.replace('+', " ");
        let decoded = percent_decode_str(&spaced).decode_utf8().map_err(malformed)?;
        Ok(Cow::Owned(decoded.into_owned()))
    } else {
        percent_decode_str(component).decode_utf8().map_err(malformed)
    }
}

/// Accumulates options for one level of the request tree.
#[derive(Default)]
struct TreeBuilder {
    tree: RequestTree,
}

impl TreeBuilder {
    /// Apply one option. Later occurrences replace earlier ones.
    fn apply(&mut self, key: &str, value: &str) -> Result<(), ParseError> {
        let value = value.trim();
        match key {
            "$select" => self.tree.select = parse_select(value),
            "$filter" => self.tree.filter = (!value.is_empty()).then(|| FilterExpr::new(value)),
            "$orderby" => self.tree.order_by = parse_order_by(value)?,
            "$top" => self.tree.top = Some(parse_non_negative(key, value)?),
            "$skip" => self.tree.skip = Some(parse_non_negative(key, value)?),
            "$count" => self.tree.count = parse_bool(key, value)?,
            "$search" => self.tree.search = (!value.is_empty()).then(|| value.to_string()),
            "$format" => trace!(value, "ignoring $format"),
            _ => {
                return Err(ParseError::UnknownOption {
                    option: key.to_string(),
                })
            }
        }
        Ok(())
    }

    fn set_expand(&mut self, expand: BTreeMap<String, RequestTree>) {
        self.tree.expand = expand;
    }

    fn finish(mut self) -> RequestTree {
        fold_dotted_select(&mut self.tree);
        self.tree
    }
}

fn parse_select(value: &str) -> Option<BTreeSet<String>> {
    let fields: BTreeSet<String> = value
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect();

    if fields.is_empty() || fields.contains("*") {
        None
    } else {
        Some(fields)
    }
}

fn parse_order_by(value: &str) -> Result<Option<Vec<OrderSpec>>, ParseError> {
    let mut specs = Vec::new();

    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let invalid = |reason: String| ParseError::InvalidOrderBy {
            item: item.to_string(),
            reason,
        };

        let mut parts = item.split_whitespace();
        let field = parts.next().unwrap_or(item);
        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(dir) => return Err(invalid(format!("unknown direction '{}'", dir))),
        };
        if let Some(extra) = parts.next() {
            return Err(invalid(format!("unexpected '{}' after direction", extra)));
        }

        specs.push(OrderSpec::new(field, direction));
    }

    Ok((!specs.is_empty()).then_some(specs))
}

fn parse_non_negative(option: &str, value: &str) -> Result<u64, ParseError> {
    value
        .parse::<u64>()
        .map_err(|_| ParseError::InvalidNumericOption {
            option: option.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ParseError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ParseError::InvalidBooleanOption {
            option: option.to_string(),
            value: value.to_string(),
        })
    }
}

/// Move dotted selections such as `author.name` into the nested selection of
/// the matching expansion. Entries whose prefix is not expanded, or whose
/// path is not made of plain names, stay as they are so that later stages
/// can report them.
fn fold_dotted_select(tree: &mut RequestTree) {
    if let Some(select) = tree.select.take() {
        let mut kept = BTreeSet::new();
        for entry in select {
            match entry.split_once('.') {
                Some((parent, child)) if child.split('.').all(is_relation_name) => {
                    if let Some(nested) = tree.expand.get_mut(parent) {
                        nested
                            .select
                            .get_or_insert_with(BTreeSet::new)
                            .insert(child.to_string());
                        kept.insert(parent.to_string());
                    } else {
                        kept.insert(entry);
                    }
                }
                _ => {
                    kept.insert(entry);
                }
            }
        }
        tree.select = Some(kept);
    }

    for nested in tree.expand.values_mut() {
        fold_dotted_select(nested);
    }
}

fn is_relation_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Recursive descent parser for `$expand` values.
pub struct ExpandParser<'source> {
    source: &'source str,
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl<'source> ExpandParser<'source> {
    /// Tokenize `source` and prepare to parse it.
    pub fn new(source: &'source str) -> Result<Self, ParseError> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    /// Parse the whole value into an expansion map.
    pub fn parse(&mut self) -> Result<BTreeMap<String, RequestTree>, ParseError> {
        let items = self.parse_items(false)?;
        if let Some(tok) = self.peek() {
            return Err(self.malformed(tok.span, format!("unexpected {}", tok.token.describe())));
        }
        Ok(items)
    }

    /// Parse a comma-separated list of expansions. Inside an option list the
    /// list ends at the `;` or `)` that closes the `$expand` option.
    fn parse_items(&mut self, nested: bool) -> Result<BTreeMap<String, RequestTree>, ParseError> {
        let mut items = BTreeMap::new();

        while let Some(tok) = self.peek() {
            let span = tok.span;
            match &tok.token {
                Token::Comma => self.pos += 1,
                Token::Semicolon | Token::RParen if nested => break,
                Token::RParen => return Err(self.malformed(span, "unbalanced ')'")),
                Token::Text(name) if is_relation_name(name) => {
                    let name = name.clone();
                    self.pos += 1;

                    let tree = self.parse_item_options()?;
                    self.expect_item_end(nested)?;

                    if items.insert(name.clone(), tree).is_some() {
                        debug!(relation = %name, "relation expanded twice, keeping the last occurrence");
                    }
                }
                other => {
                    let reason = format!("expected a relation name, found {}", other.describe());
                    return Err(self.malformed(span, reason));
                }
            }
        }

        Ok(items)
    }

    fn parse_item_options(&mut self) -> Result<RequestTree, ParseError> {
        match self.peek() {
            Some(tok) if tok.token == Token::LParen => {
                let open = tok.span;
                self.pos += 1;
                self.parse_option_list(open)
            }
            _ => Ok(RequestTree::default()),
        }
    }

    /// Parse `$key=value` pairs separated by `;` up to the matching `)`.
    fn parse_option_list(&mut self, open: Span) -> Result<RequestTree, ParseError> {
        let mut builder = TreeBuilder::default();

        loop {
            let tok = self.next_token(open)?;
            match tok.token {
                Token::RParen => break,
                Token::Semicolon => continue,
                Token::Text(key) => {
                    if !key.starts_with('$') {
                        return Err(ParseError::MalformedOption {
                            fragment: key,
                            reason: "expansion options must start with '$'".to_string(),
                        });
                    }

                    let eq = self.next_token(open)?;
                    if eq.token != Token::Eq {
                        let reason = format!("expected '=' after {}", key);
                        return Err(self.malformed(eq.span, reason));
                    }

                    if key == "$expand" {
                        let nested = self.parse_items(true)?;
                        builder.set_expand(nested);
                    } else {
                        let value = self.take_value(open)?;
                        builder.apply(&key, value)?;
                    }
                }
                other => {
                    let reason = format!("expected an option name, found {}", other.describe());
                    return Err(self.malformed(tok.span, reason));
                }
            }
        }

        Ok(builder.finish())
    }

    /// Collect the raw text of an option value, up to the `;` or `)` that
    /// ends it at the current nesting level.
    fn take_value(&mut self, open: Span) -> Result<&'source str, ParseError> {
        let mut depth = 0usize;
        let mut covered: Option<Span> = None;

        loop {
            let Some(tok) = self.peek() else {
                return Err(self.malformed(open, "unbalanced '('"));
            };
            match tok.token {
                Token::Semicolon | Token::RParen if depth == 0 => break,
                Token::LParen => depth += 1,
                Token::RParen => depth -= 1,
                _ => {}
            }
            let span = tok.span;
            covered = Some(covered.map_or(span, |c| c.merge(span)));
            self.pos += 1;
        }

        Ok(covered.map_or("", |span| span.slice(self.source)))
    }

    fn expect_item_end(&self, nested: bool) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => match tok.token {
                Token::Comma => Ok(()),
                Token::Semicolon | Token::RParen if nested => Ok(()),
                Token::RParen => Err(self.malformed(tok.span, "unbalanced ')'")),
                ref other => {
                    let reason = format!("expected ',' between expansions, found {}", other.describe());
                    Err(self.malformed(tok.span, reason))
                }
            },
        }
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    /// Consume the next token; running out inside an option list means the
    /// list opened at `open` was never closed.
    fn next_token(&mut self, open: Span) -> Result<SpannedToken, ParseError> {
        match self.tokens.get(self.pos).cloned() {
            Some(tok) => {
                self.pos += 1;
                Ok(tok)
            }
            None => Err(self.malformed(open, "unbalanced '('")),
        }
    }

    fn malformed(&self, span: Span, reason: impl Into<String>) -> ParseError {
        ParseError::malformed_expand(self.source, span, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_select_and_expand() {
        let tree = parse(
            "$select=title,body&$expand=author($select=name),\
             comments($filter=approved eq true;$orderby=createdAt desc;$top=5)",
        )
        .unwrap();

        let expected = RequestTree::new()
            .with_select(["title", "body"])
            .with_expand("author", RequestTree::new().with_select(["name"]))
            .with_expand(
                "comments",
                RequestTree::new()
                    .with_filter("approved eq true")
                    .with_order("createdAt", SortDirection::Desc)
                    .with_top(5),
            );
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_parse_leading_question_mark() {
        let tree = parse("?$top=3&$skip=6").unwrap();
        assert_eq!(tree.top, Some(3));
        assert_eq!(tree.skip, Some(6));
    }

    #[test]
    fn test_parse_empty_query() {
        assert_eq!(parse("").unwrap(), RequestTree::default());
        assert_eq!(parse("?").unwrap(), RequestTree::default());
    }

    #[test]
    fn test_select_star_means_all_fields() {
        let tree = parse("$select=*").unwrap();
        assert_eq!(tree.select, None);
        let tree = parse("$select= , ").unwrap();
        assert_eq!(tree.select, None);
    }

    #[test]
    fn test_negative_top_is_rejected() {
        let err = parse("$top=-1").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumericOption {
                option: "$top".to_string(),
                value: "-1".to_string(),
            }
        );
    }

    #[test]
    fn test_non_numeric_skip_is_rejected() {
        let err = parse("$skip=ten").unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumericOption { ref option, .. } if option == "$skip"));
    }

    #[test]
    fn test_count_values() {
        assert!(parse("$count=true").unwrap().count);
        assert!(!parse("$count=false").unwrap().count);
        let err = parse("$count=yes").unwrap_err();
        assert!(matches!(err, ParseError::InvalidBooleanOption { .. }));
    }

    #[test]
    fn test_order_by_multiple_keys() {
        let tree = parse("$orderby=lastName,firstName DESC, age asc").unwrap();
        assert_eq!(
            tree.order_by,
            Some(vec![
                OrderSpec::asc("lastName"),
                OrderSpec::desc("firstName"),
                OrderSpec::asc("age"),
            ])
        );
    }

    #[test]
    fn test_order_by_bad_direction() {
        let err = parse("$orderby=title sideways").unwrap_err();
        assert!(matches!(err, ParseError::InvalidOrderBy { ref item, .. } if item == "title sideways"));
    }

    #[test]
    fn test_unclosed_paren_names_fragment() {
        let err = parse("$expand=author(").unwrap_err();
        match err {
            ParseError::MalformedExpand { fragment, span, .. } => {
                assert_eq!(fragment, "(");
                assert_eq!(span, Span::new(6, 7));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_stray_close_paren() {
        let err = parse("$expand=author)").unwrap_err();
        assert!(err.to_string().contains("unbalanced ')'"));
    }

    #[test]
    fn test_unterminated_nested_option() {
        let err = parse("$expand=comments($filter=approved eq true").unwrap_err();
        match err {
            ParseError::MalformedExpand { fragment, .. } => {
                assert!(fragment.starts_with("($filter"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_option() {
        let err = parse("$levels=2").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownOption {
                option: "$levels".to_string()
            }
        );

        let err = parse("$expand=author($bogus=1)").unwrap_err();
        assert!(matches!(err, ParseError::UnknownOption { .. }));
    }

    #[test]
    fn test_non_system_parameters_are_ignored() {
        let tree = parse("page=2&$top=1&api_key=abc").unwrap();
        assert_eq!(tree, RequestTree::new().with_top(1));
    }

    #[test]
    fn test_format_is_ignored() {
        assert_eq!(parse("$format=json").unwrap(), RequestTree::default());
    }

    #[test]
    fn test_missing_equals() {
        let err = parse("$count").unwrap_err();
        assert!(matches!(err, ParseError::MalformedOption { .. }));
    }

    #[test]
    fn test_nested_option_without_dollar() {
        let err = parse("$expand=author(select=name)").unwrap_err();
        assert!(matches!(err, ParseError::MalformedOption { ref fragment, .. } if fragment == "select"));
    }

    #[test]
    fn test_percent_decoding() {
        let tree = parse("$filter=name%20eq%20%27O%27%27Neil%27&$search=red+shoes").unwrap();
        assert_eq!(tree.filter, Some(FilterExpr::new("name eq 'O''Neil'")));
        assert_eq!(tree.search.as_deref(), Some("red shoes"));
    }

    #[test]
    fn test_quoted_literal_inside_expand() {
        let tree = parse("$expand=comments($filter=text eq 'a;b),c';$top=1)").unwrap();
        let comments = &tree.expand["comments"];
        assert_eq!(comments.filter, Some(FilterExpr::new("text eq 'a;b),c'")));
        assert_eq!(comments.top, Some(1));
    }

    #[test]
    fn test_parenthesised_filter_value() {
        let tree = parse("$expand=comments($filter=(a eq 1) or (b eq 2))").unwrap();
        assert_eq!(
            tree.expand["comments"].filter,
            Some(FilterExpr::new("(a eq 1) or (b eq 2)"))
        );
    }

    #[test]
    fn test_nested_expand() {
        let tree = parse("$expand=author($select=name;$expand=posts($top=2),profile)").unwrap();
        let author = &tree.expand["author"];
        assert_eq!(author.select, Some(BTreeSet::from(["name".to_string()])));
        assert_eq!(author.expand["posts"].top, Some(2));
        assert_eq!(author.expand["profile"], RequestTree::default());
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_empty_items_and_empty_option_list() {
        let tree = parse("$expand=,author(),,tags,").unwrap();
        assert_eq!(tree.expand.len(), 2);
        assert_eq!(tree.expand["author"], RequestTree::default());
    }

    #[test]
    fn test_duplicate_expansion_last_wins() {
        let tree = parse("$expand=author($top=1),author($top=2)").unwrap();
        assert_eq!(tree.expand["author"].top, Some(2));
    }

    #[test]
    fn test_duplicate_option_last_wins() {
        let tree = parse("$top=1&$top=7").unwrap();
        assert_eq!(tree.top, Some(7));
    }

    #[test]
    fn test_dotted_select_folds_into_expansion() {
        let tree = parse("$select=title,author.name&$expand=author").unwrap();
        assert_eq!(
            tree.select,
            Some(BTreeSet::from(["author".to_string(), "title".to_string()]))
        );
        assert_eq!(
            tree.expand["author"].select,
            Some(BTreeSet::from(["name".to_string()]))
        );
    }

    #[test]
    fn test_dotted_select_without_expansion_is_kept() {
        let tree = parse("$select=title,author.name").unwrap();
        assert_eq!(
            tree.select,
            Some(BTreeSet::from([
                "author.name".to_string(),
                "title".to_string()
            ]))
        );
    }

    #[test]
    fn test_two_level_dotted_select() {
        let tree = parse("$select=author.posts.title&$expand=author($expand=posts)").unwrap();
        let posts = &tree.expand["author"].expand["posts"];
        assert_eq!(posts.select, Some(BTreeSet::from(["title".to_string()])));
        assert_eq!(
            tree.expand["author"].select,
            Some(BTreeSet::from(["posts".to_string()]))
        );
    }

    #[test]
    fn test_dotted_select_with_non_name_path_stays_top_level() {
        for query in [
            "$select=author.a;b&$expand=author",
            "$select=author.it's&$expand=author",
            "$select=author.x(y&$expand=author",
            "$select=author.&$expand=author",
        ] {
            let tree = parse(query).unwrap();
            let entry = query["$select=".len()..query.find('&').unwrap()].to_string();
            assert_eq!(tree.select, Some(BTreeSet::from([entry])), "{}", query);
            assert_eq!(tree.expand["author"].select, None, "{}", query);
        }
    }

    #[test]
    fn test_missing_comma_between_expansions() {
        let err = parse("$expand=author tags").unwrap_err();
        assert!(err.to_string().contains("expected ',' between expansions"));
    }

    #[test]
    fn test_invalid_relation_name() {
        let err = parse("$expand=$select").unwrap_err();
        assert!(matches!(err, ParseError::MalformedExpand { .. }));
    }
}
