//! Filter evaluation for in-memory execution.
//!
//! `$filter` text is opaque to the planner. Executors that need to apply it
//! themselves plug in a [`FilterEvaluator`]; [`BasicFilterEvaluator`] covers
//! comparisons, boolean connectives and the string functions `contains`,
//! `startswith` and `endswith`.

use super::executor::Row;
use crate::error::ExecutorError;
use crate::value::Value;
use logos::Logos;
use odata_lang::FilterExpr;
use std::cmp::Ordering;

/// Turns filter expressions into row predicates.
///
/// A filter is compiled once per fetch, before any row is looked at, so a
/// malformed expression fails even when there is nothing to filter.
pub trait FilterEvaluator: Send + Sync {
    fn compile(&self, entity: &str, filter: &FilterExpr) -> Result<Box<dyn RowFilter>, ExecutorError>;
}

/// A compiled filter.
pub trait RowFilter: Send + Sync {
    fn matches(&self, row: &Row) -> Result<bool, ExecutorError>;
}

/// Evaluator for the common subset of the OData filter grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicFilterEvaluator;

impl BasicFilterEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl FilterEvaluator for BasicFilterEvaluator {
    fn compile(&self, _entity: &str, filter: &FilterExpr) -> Result<Box<dyn RowFilter>, ExecutorError> {
        Ok(Box::new(Condition::parse(filter.as_str())?))
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum FilterToken {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("eq")]
    Eq,
    #[token("ne")]
    Ne,
    #[token("gt")]
    Gt,
    #[token("ge")]
    Ge,
    #[token("lt")]
    Lt,
    #[token("le")]
    Le,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    Str(String),
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
    #[regex(r"[A-Za-z_][A-Za-z0-9_/]*", |lex| lex.slice().to_string())]
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StringFunction {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Function {
        function: StringFunction,
        field: String,
        needle: String,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    fn parse(source: &str) -> Result<Self, ExecutorError> {
        let mut tokens = Vec::new();
        for (token, span) in FilterToken::lexer(source).spanned() {
            let token = token.map_err(|_| {
                ExecutorError::Filter(format!(
                    "unexpected input '{}' at offset {}",
                    &source[span.clone()],
                    span.start
                ))
            })?;
            tokens.push(token);
        }

        let mut parser = ConditionParser { tokens, pos: 0 };
        let condition = parser.parse_or()?;
        match parser.peek() {
            None => Ok(condition),
            Some(token) => Err(ExecutorError::Filter(format!(
                "unexpected {:?} after expression",
                token
            ))),
        }
    }

    fn evaluate(&self, row: &Row) -> bool {
        match self {
            Condition::Compare { field, op, value } => compare_field(row, field, *op, value),
            Condition::Function {
                function,
                field,
                needle,
            } => match row.get(field) {
                Some(Value::String(s)) => match function {
                    StringFunction::Contains => s.contains(needle.as_str()),
                    StringFunction::StartsWith => s.starts_with(needle.as_str()),
                    StringFunction::EndsWith => s.ends_with(needle.as_str()),
                },
                _ => false,
            },
            Condition::And(lhs, rhs) => lhs.evaluate(row) && rhs.evaluate(row),
            Condition::Or(lhs, rhs) => lhs.evaluate(row) || rhs.evaluate(row),
            Condition::Not(inner) => !inner.evaluate(row),
        }
    }
}

impl RowFilter for Condition {
    fn matches(&self, row: &Row) -> Result<bool, ExecutorError> {
        Ok(self.evaluate(row))
    }
}

/// Missing fields compare as null.
fn compare_field(row: &Row, field: &str, op: CompareOp, value: &Value) -> bool {
    let field_value = row.get(field).unwrap_or(&Value::Null);
    match op {
        CompareOp::Eq => values_equal(field_value, value),
        CompareOp::Ne => !values_equal(field_value, value),
        CompareOp::Gt => compare_values(field_value, value).is_some_and(Ordering::is_gt),
        CompareOp::Ge => compare_values(field_value, value).is_some_and(Ordering::is_ge),
        CompareOp::Lt => compare_values(field_value, value).is_some_and(Ordering::is_lt),
        CompareOp::Le => compare_values(field_value, value).is_some_and(Ordering::is_le),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => compare_values(a, b) == Some(Ordering::Equal),
    }
}

/// Ordering of two non-null values of compatible types.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

struct ConditionParser {
    tokens: Vec<FilterToken>,
    pos: usize,
}

impl ConditionParser {
    fn peek(&self) -> Option<&FilterToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<FilterToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: FilterToken) -> Result<(), ExecutorError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExecutorError::Filter(format!(
                "expected {:?}, found {:?}",
                expected, token
            ))),
            None => Err(ExecutorError::Filter(format!(
                "expected {:?}, found end of input",
                expected
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Condition, ExecutorError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&FilterToken::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Condition, ExecutorError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&FilterToken::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Condition, ExecutorError> {
        match self.next() {
            Some(FilterToken::Not) => Ok(Condition::Not(Box::new(self.parse_unary()?))),
            Some(FilterToken::LParen) => {
                let inner = self.parse_or()?;
                self.expect(FilterToken::RParen)?;
                Ok(inner)
            }
            Some(FilterToken::Ident(name)) if self.peek() == Some(&FilterToken::LParen) => {
                self.parse_function(&name)
            }
            Some(FilterToken::Ident(field)) => {
                let op = match self.next() {
                    Some(FilterToken::Eq) => CompareOp::Eq,
                    Some(FilterToken::Ne) => CompareOp::Ne,
                    Some(FilterToken::Gt) => CompareOp::Gt,
                    Some(FilterToken::Ge) => CompareOp::Ge,
                    Some(FilterToken::Lt) => CompareOp::Lt,
                    Some(FilterToken::Le) => CompareOp::Le,
                    other => {
                        return Err(ExecutorError::Filter(format!(
                            "expected comparison operator after '{}', found {:?}",
                            field, other
                        )))
                    }
                };
                let value = self.parse_literal()?;
                Ok(Condition::Compare { field, op, value })
            }
            other => Err(ExecutorError::Filter(format!(
                "expected condition, found {:?}",
                other
            ))),
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<Condition, ExecutorError> {
        let function = match name {
            "contains" => StringFunction::Contains,
            "startswith" => StringFunction::StartsWith,
            "endswith" => StringFunction::EndsWith,
            _ => {
                return Err(ExecutorError::Filter(format!(
                    "unsupported function '{}'",
                    name
                )))
            }
        };

        self.expect(FilterToken::LParen)?;
        let field = match self.next() {
            Some(FilterToken::Ident(field)) => field,
            other => {
                return Err(ExecutorError::Filter(format!(
                    "expected field name in {}(), found {:?}",
                    name, other
                )))
            }
        };
        self.expect(FilterToken::Comma)?;
        let needle = match self.next() {
            Some(FilterToken::Str(s)) => s,
            other => {
                return Err(ExecutorError::Filter(format!(
                    "expected string literal in {}(), found {:?}",
                    name, other
                )))
            }
        };
        self.expect(FilterToken::RParen)?;

        Ok(Condition::Function {
            function,
            field,
            needle,
        })
    }

    fn parse_literal(&mut self) -> Result<Value, ExecutorError> {
        match self.next() {
            Some(FilterToken::Str(s)) => Ok(Value::String(s)),
            Some(FilterToken::Int(i)) => Ok(Value::Int(i)),
            Some(FilterToken::Float(f)) => Ok(Value::Float(f)),
            Some(FilterToken::True) => Ok(Value::Bool(true)),
            Some(FilterToken::False) => Ok(Value::Bool(false)),
            Some(FilterToken::Null) => Ok(Value::Null),
            other => Err(ExecutorError::Filter(format!(
                "expected literal, found {:?}",
                other
            ))),
        }
    }
}
