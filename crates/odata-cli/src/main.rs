//! OData Command-Line Tool
//!
//! Parses OData query options, prints fetch plans, and runs queries against
//! JSON fixtures.

mod commands;
mod config;
mod formatter;

use clap::Parser;
use config::Args;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

fn main() {
    let default_directive = "odata=info"
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::INFO.into());

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive))
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match commands::execute(&args, &*formatter) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
