//! Query engine: fetch planning, execution and shape projection.
//!
//! The planner compiles a parsed `RequestTree` into a [`FetchPlanNode`], an
//! executor materializes it, and the projector shapes the rows into the
//! response the caller asked for.

mod diagnostic;
mod executor;
mod filter;
mod plan;
mod planner;
mod projector;

pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use executor::{FetchResult, MaterializedEntity, MemoryExecutor, QueryExecutor, Related, Row};
pub use filter::{BasicFilterEvaluator, FilterEvaluator, RowFilter};
pub use plan::{FetchPlanNode, PlanOutcome};
pub use planner::QueryPlanner;
pub use projector::{
    ComputedFieldResolver, NoComputedFields, ProjectedObject, ProjectedValue, ShapeProjector,
};
