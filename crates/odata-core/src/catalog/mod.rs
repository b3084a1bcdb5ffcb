//! Model metadata and the relation graph inspector.
//!
//! The catalog stores entity types, their fields and the relations between
//! them, and answers relation lookups for the plan builder and projector.

#[allow(clippy::module_inception)]
mod catalog;
mod entity;
mod field;
mod relation;
mod schema;

pub use catalog::Catalog;
pub use entity::EntityDef;
pub use field::{ComputedField, FieldDef};
pub use relation::{
    Cardinality, EntityId, Ownership, RelationDef, RelationDescriptor, RelationKind,
};
pub use schema::SchemaBundle;
