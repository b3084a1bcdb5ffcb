//! Error types for query-string parsing.

use crate::span::Span;
use thiserror::Error;

/// Error raised while turning a raw query string into a request tree.
///
/// Every variant names the offending option or fragment so that callers can
/// report it without access to the original input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Unbalanced parentheses, unterminated literals or a misplaced token
    /// inside an `$expand` value.
    #[error("malformed $expand at offset {}: {reason} near '{fragment}'", .span.start)]
    MalformedExpand {
        fragment: String,
        reason: String,
        /// Location inside the `$expand` value.
        span: Span,
    },

    #[error("invalid value '{value}' for {option}: expected a non-negative integer")]
    InvalidNumericOption { option: String, value: String },

    #[error("invalid value '{value}' for {option}: expected true or false")]
    InvalidBooleanOption { option: String, value: String },

    #[error("invalid $orderby item '{item}': {reason}")]
    InvalidOrderBy { item: String, reason: String },

    #[error("unknown query option '{option}'")]
    UnknownOption { option: String },

    /// A pair that cannot be read as an option at all.
    #[error("malformed query option '{fragment}': {reason}")]
    MalformedOption { fragment: String, reason: String },
}

impl ParseError {
    /// Build a [`ParseError::MalformedExpand`] whose fragment runs from the
    /// start of `span` to the end of `source`, capped to a readable length.
    pub(crate) fn malformed_expand(source: &str, span: Span, reason: impl Into<String>) -> Self {
        let fragment: String = span.slice_to_end(source).chars().take(40).collect();
        ParseError::MalformedExpand {
            fragment,
            reason: reason.into(),
            span,
        }
    }

    /// The option this error is about, when there is one.
    pub fn option(&self) -> Option<&str> {
        match self {
            ParseError::MalformedExpand { .. } => Some("$expand"),
            ParseError::InvalidNumericOption { option, .. }
            | ParseError::InvalidBooleanOption { option, .. }
            | ParseError::UnknownOption { option } => Some(option),
            ParseError::InvalidOrderBy { .. } => Some("$orderby"),
            ParseError::MalformedOption { .. } => None,
        }
    }

    /// Source span inside the `$expand` value, if the error came from there.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::MalformedExpand { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// Format the error with a caret under the offending part of the
    /// `$expand` value. Other errors render as their message.
    pub fn format_with_source(&self, expand_value: &str) -> String {
        let mut result = format!("error: {}\n", self);
        let Some(span) = self.span() else {
            return result;
        };

        result.push_str(&format!("   |\n   | {}\n   | ", expand_value));
        let col = expand_value
            .get(..span.start.min(expand_value.len()))
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);
        for _ in 0..col {
            result.push(' ');
        }
        result.push('^');
        for _ in 1..span.len().min(expand_value.len().saturating_sub(span.start)) {
            result.push('~');
        }
        result.push('\n');
        result
    }
}
