//! Core error types.

use odata_lang::ParseError;
use thiserror::Error;

/// Errors that abort a request.
///
/// Everything else (unknown fields, depth limits, cycles, computed-field
/// failures) is reported as a [`Diagnostic`](crate::query::Diagnostic).
#[derive(Debug, Error)]
pub enum Error {
    /// The query string could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Model metadata is inconsistent.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The root entity type is not registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// The query executor failed.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
}

/// Errors raised while registering model metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("entity '{0}' is registered twice")]
    DuplicateEntity(String),

    #[error("relation '{relation}' is registered twice on '{entity}'")]
    DuplicateRelation { entity: String, relation: String },

    #[error("relation '{relation}' references unknown entity '{entity}'")]
    UnknownEntity { relation: String, entity: String },

    #[error("identity field '{field}' is not declared on '{entity}'")]
    MissingIdentityField { entity: String, field: String },

    #[error("key field '{field}' of relation '{relation}' is not declared on '{entity}'")]
    MissingKeyField {
        relation: String,
        entity: String,
        field: String,
    },

    #[error("relation '{relation}' on '{entity}' has the same name as a field")]
    RelationFieldConflict { entity: String, relation: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// A relation lookup that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown relation '{relation}' on '{entity}': {detail}")]
pub struct UnknownRelation {
    pub entity: String,
    pub relation: String,
    pub detail: String,
}

impl UnknownRelation {
    pub(crate) fn new(
        entity: impl Into<String>,
        relation: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            relation: relation.into(),
            detail: detail.into(),
        }
    }
}

/// Errors returned by a [`QueryExecutor`](crate::query::QueryExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// A filter was requested but no evaluator is configured.
    #[error("no filter evaluator configured for '{filter}' on '{entity}'")]
    UnsupportedFilter { entity: String, filter: String },

    /// The filter evaluator rejected an expression.
    #[error("filter error: {0}")]
    Filter(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The plan cannot be executed as given.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Failure to compute a virtual field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputedFieldError {
    /// No accessor is available for this field.
    #[error("no accessor for computed field")]
    Unsupported,

    #[error("{0}")]
    Failed(String),
}
