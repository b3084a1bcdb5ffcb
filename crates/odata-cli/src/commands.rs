//! Subcommand execution.

use crate::config::{Args, Command};
use crate::formatter::Formatter;
use odata_core::{
    Catalog, CatalogError, ExecutorError, MemoryExecutor, PlannerConfig, QueryPipeline,
    QueryPlanner, SchemaBundle,
};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schema {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },

    #[error("invalid data {path}: {source}")]
    Data {
        path: PathBuf,
        #[source]
        source: ExecutorError,
    },

    #[error(transparent)]
    Query(#[from] odata_core::Error),

    #[error("{0}")]
    Parse(String),
}

/// Run the selected subcommand and return its rendered output.
pub fn execute(args: &Args, formatter: &dyn Formatter) -> Result<String, CliError> {
    let config = args.planner_config();
    debug!(?config, "planner configuration");

    match &args.command {
        Command::Parse { query } => {
            let tree = odata_lang::parse(query).map_err(|e| parse_error(query, e))?;
            Ok(formatter.format_tree(&tree))
        }
        Command::Plan {
            schema,
            entity,
            query,
        } => {
            let catalog = load_catalog(schema)?;
            plan(&catalog, entity, query, config, formatter)
        }
        Command::Run {
            schema,
            data,
            entity,
            query,
        } => {
            let catalog = load_catalog(schema)?;
            let executor = load_data(data)?;
            let response = QueryPipeline::new(&catalog)
                .with_config(config)
                .run(entity, query, &executor)
                .map_err(|e| match e {
                    odata_core::Error::Parse(err) => parse_error(query, err),
                    other => CliError::Query(other),
                })?;
            info!(
                rows = response.value.len(),
                warnings = response.diagnostics.len(),
                "query finished"
            );
            Ok(formatter.format_response(&response))
        }
        Command::Relations { schema, entity } => {
            let catalog = load_catalog(schema)?;
            let id = catalog
                .entity_id(entity)
                .ok_or_else(|| odata_core::Error::UnknownEntity(entity.clone()))?;
            Ok(formatter.format_relations(entity, &catalog.relations_of(id)))
        }
    }
}

fn plan(
    catalog: &Catalog,
    entity: &str,
    query: &str,
    config: PlannerConfig,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let tree = odata_lang::parse(query).map_err(|e| parse_error(query, e))?;
    let outcome = QueryPlanner::new(catalog)
        .with_config(config)
        .build(entity, &tree)?;
    Ok(formatter.format_plan(&outcome))
}

/// Parse errors in `$expand` point a caret at the offending input.
fn parse_error(query: &str, err: odata_lang::ParseError) -> CliError {
    match expand_value(query) {
        Some(value) if err.span().is_some() => CliError::Parse(err.format_with_source(&value)),
        _ => CliError::Parse(err.to_string()),
    }
}

/// Decoded value of the last `$expand` option in a query string, matching
/// the text the parser reports spans against.
fn expand_value(query: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| decode_component(key).is_some_and(|key| key.trim() == "$expand"))
        .last()
        .and_then(|(_, value)| decode_component(value))
}

fn decode_component(component: &str) -> Option<String> {
    percent_decode_str(&component.replace('+', " "))
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn load_catalog(path: &Path) -> Result<Catalog, CliError> {
    let json = read(path)?;
    let bundle = SchemaBundle::from_json(&json).map_err(|source| CliError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog = Catalog::from_bundle(bundle).map_err(|source| CliError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "schema loaded");
    Ok(catalog)
}

fn load_data(path: &Path) -> Result<MemoryExecutor, CliError> {
    let json = read(path)?;
    MemoryExecutor::from_json(&json).map_err(|source| CliError::Data {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
