//! OData Core - Relation graph, fetch planning, and shape projection.
//!
//! This crate takes a parsed request (see `odata_lang`) through the rest of
//! the read path: the [`Catalog`] answers relation lookups, the
//! [`QueryPlanner`] builds a fetch plan, a [`QueryExecutor`] materializes it
//! and the [`ShapeProjector`] prunes the rows into the response shape.
//!
//! ```rust
//! use odata_core::{Catalog, EntityDef, MemoryExecutor, QueryPipeline, RelationDef, SchemaBundle};
//!
//! let schema = SchemaBundle::new()
//!     .with_entity(EntityDef::new("Post", "id").with_stored(["id", "title", "author_id"]))
//!     .with_entity(EntityDef::new("Author", "id").with_stored(["id", "name"]))
//!     .with_relation(RelationDef::many_to_one("author", "Post", "author_id", "Author"));
//! let catalog = Catalog::from_bundle(schema).unwrap();
//!
//! let executor = MemoryExecutor::from_json(r#"{
//!     "Post": [{"id": 1, "title": "Hello", "author_id": 7}],
//!     "Author": [{"id": 7, "name": "Ada"}]
//! }"#).unwrap();
//!
//! let response = QueryPipeline::new(&catalog)
//!     .run("Post", "$select=title&$expand=author($select=name)", &executor)
//!     .unwrap();
//! assert_eq!(
//!     serde_json::to_string(&response).unwrap(),
//!     r#"{"value":[{"title":"Hello","author":{"name":"Ada"}}]}"#
//! );
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod value;

pub use catalog::{
    Cardinality, Catalog, ComputedField, EntityDef, EntityId, FieldDef, Ownership, RelationDef,
    RelationDescriptor, RelationKind, SchemaBundle,
};
pub use config::PlannerConfig;
pub use error::{CatalogError, ComputedFieldError, Error, ExecutorError, UnknownRelation};
pub use pipeline::{QueryPipeline, QueryResponse};
pub use query::{
    BasicFilterEvaluator, ComputedFieldResolver, Diagnostic, DiagnosticKind, FetchPlanNode,
    FetchResult, FilterEvaluator, MaterializedEntity, MemoryExecutor, NoComputedFields,
    PlanOutcome, ProjectedObject, ProjectedValue, QueryExecutor, QueryPlanner, Related, Row,
    RowFilter, ShapeProjector,
};
pub use value::Value;

/// Re-export the query option parser.
pub use odata_lang as lang;
