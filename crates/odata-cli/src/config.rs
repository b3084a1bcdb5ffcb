//! Command-line arguments.

use crate::formatter::OutputFormat;
use clap::{Parser, Subcommand};
use odata_core::config::DEFAULT_MAX_EXPANSION_DEPTH;
use odata_core::PlannerConfig;
use std::path::PathBuf;

/// OData query tool
#[derive(Parser, Debug)]
#[command(name = "odata")]
#[command(version, about = "Parse, plan and run OData query options", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format.
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Maximum expansion depth below the root entity.
    #[arg(long, default_value_t = DEFAULT_MAX_EXPANSION_DEPTH, global = true)]
    pub max_depth: usize,

    /// Keep expansions that revisit a relation already on their path.
    #[arg(long, global = true)]
    pub no_cycle_pruning: bool,

    /// Pass `$orderby` keys through without checking them against the schema.
    #[arg(long, global = true)]
    pub no_order_by_validation: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a query string and print the request tree.
    Parse {
        /// Raw query string, e.g. `$select=title&$expand=author`.
        query: String,
    },

    /// Build the fetch plan for a query.
    Plan {
        /// JSON schema bundle.
        #[arg(short, long)]
        schema: PathBuf,

        /// Root entity type.
        #[arg(short, long)]
        entity: String,

        query: String,
    },

    /// Run a query against JSON data and print the projected response.
    Run {
        /// JSON schema bundle.
        #[arg(short, long)]
        schema: PathBuf,

        /// JSON object of table name to rows.
        #[arg(short, long)]
        data: PathBuf,

        /// Root entity type.
        #[arg(short, long)]
        entity: String,

        query: String,
    },

    /// List the relations of an entity type.
    Relations {
        /// JSON schema bundle.
        #[arg(short, long)]
        schema: PathBuf,

        /// Entity type to inspect.
        #[arg(short, long)]
        entity: String,
    },
}

impl Args {
    /// Planner configuration selected by the global flags.
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig::new()
            .with_max_expansion_depth(self.max_depth)
            .with_cycle_pruning(!self.no_cycle_pruning)
            .with_order_by_validation(!self.no_order_by_validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let args = Args::parse_from(["odata", "parse", "$top=1"]);
        assert_eq!(args.format, OutputFormat::Table);
        assert_eq!(args.planner_config(), PlannerConfig::default());
    }

    #[test]
    fn test_config_flags() {
        let args = Args::parse_from([
            "odata",
            "plan",
            "--schema",
            "schema.json",
            "--entity",
            "Post",
            "$expand=author",
            "--max-depth",
            "1",
            "--no-cycle-pruning",
            "--format",
            "json",
        ]);

        let config = args.planner_config();
        assert_eq!(config.max_expansion_depth, 1);
        assert!(!config.prune_cycles);
        assert!(config.validate_order_by);
        assert_eq!(args.format, OutputFormat::Json);

        match args.command {
            Command::Plan {
                schema,
                entity,
                query,
            } => {
                assert_eq!(schema, PathBuf::from("schema.json"));
                assert_eq!(entity, "Post");
                assert_eq!(query, "$expand=author");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_data() {
        let result = Args::try_parse_from(["odata", "run", "-s", "schema.json", "-e", "Post", ""]);
        assert!(result.is_err());
    }
}
