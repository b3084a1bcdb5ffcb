//! Structural lexer for `$expand` values using logos.
//!
//! Only the grouping punctuation is significant; everything else is a run of
//! text whose meaning is decided by the option it belongs to. Single-quoted
//! literals are lexed as a unit so that punctuation inside them never affects
//! grouping.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for the `$expand` grammar.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Eq,

    // OData string literal, '' escapes a quote
    #[regex(r"'([^']|'')*'")]
    Quoted,

    #[regex(r"[^(),;='\s]+", |lex| lex.slice().to_string())]
    Text(String),
}

impl Token {
    /// Short human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Semicolon => "';'".to_string(),
            Token::Eq => "'='".to_string(),
            Token::Quoted => "string literal".to_string(),
            Token::Text(text) => format!("'{}'", text),
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize an `$expand` value.
///
/// Fails on the first character that cannot start a token, which in practice
/// is an unterminated string literal.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span: Span = lexer.span().into();
        match result {
            Ok(token) => tokens.push(SpannedToken { token, span }),
            Err(()) => {
                let reason = if span.slice(source).starts_with('\'') {
                    "unterminated string literal"
                } else {
                    "unexpected character"
                };
                return Err(ParseError::malformed_expand(source, span, reason));
            }
        }
    }

    Ok(tokens)
}
