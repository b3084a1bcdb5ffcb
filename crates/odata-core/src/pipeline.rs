//! End-to-end request handling: parse, plan, fetch, project.

use crate::catalog::Catalog;
use crate::config::PlannerConfig;
use crate::error::Error;
use crate::query::{
    ComputedFieldResolver, Diagnostic, NoComputedFields, ProjectedObject, QueryExecutor,
    QueryPlanner, ShapeProjector,
};
use serde::Serialize;
use tracing::{debug, instrument};

/// Response body for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub value: Vec<ProjectedObject>,
    #[serde(rename = "@odata.count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Parts of the request that were dropped rather than honoured.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs raw query strings against a catalog and an executor.
pub struct QueryPipeline<'a> {
    catalog: &'a Catalog,
    config: PlannerConfig,
    resolver: &'a dyn ComputedFieldResolver,
}

impl<'a> QueryPipeline<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            config: PlannerConfig::default(),
            resolver: &NoComputedFields,
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ComputedFieldResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Answer `raw_query` against the root entity `entity`.
    ///
    /// Parse errors, an unknown root entity and executor failures abort the
    /// request. Everything else is reported in `diagnostics`.
    #[instrument(skip_all, fields(entity = entity))]
    pub fn run<E>(&self, entity: &str, raw_query: &str, executor: &E) -> Result<QueryResponse, Error>
    where
        E: QueryExecutor + ?Sized,
    {
        let tree = odata_lang::parse(raw_query)?;

        let outcome = QueryPlanner::new(self.catalog)
            .with_config(self.config.clone())
            .build(entity, &tree)?;
        let mut diagnostics = outcome.diagnostics;

        let fetched = executor.fetch(&outcome.plan)?;

        let value = ShapeProjector::new(self.catalog)
            .with_resolver(self.resolver)
            .project_all(outcome.plan.entity, &fetched.rows, &tree, &mut diagnostics);

        debug!(
            rows = value.len(),
            diagnostics = diagnostics.len(),
            "query answered"
        );

        Ok(QueryResponse {
            value,
            count: fetched.total_count,
            diagnostics,
        })
    }
}
