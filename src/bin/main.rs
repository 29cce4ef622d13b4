//! fedquery binary.
//!
//! This binary runs federated queries against the sources declared in
//! configuration and prints the results as JSON.

use clap::Parser;
use fedquery_core::{
    cli::commands::{Commands, LoggingConfig},
    cli::handlers::{handle_query, handle_sources, QueryKind},
    config::{Args, ServiceConfig},
};
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: Args,

    #[command(flatten)]
    pub logging: LoggingConfig,

    #[command(subcommand)]
    pub command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout carries the query results
    let level = cli.logging.get_effective_level();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.parse().unwrap_or(LevelFilter::WARN).into())
                .parse_lossy(cli.logging.log_filter.as_deref().unwrap_or("")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = ServiceConfig::load(&cli.args)?;
    debug!(rewrite = ?config.rewrite, "fedquery starting up");

    match &cli.command {
        Commands::Sources => handle_sources(&config)?,
        Commands::Any(cmd) => handle_query(&config, QueryKind::Any, cmd)?,
        Commands::Count(cmd) => handle_query(&config, QueryKind::Count, cmd)?,
        Commands::First(cmd) => handle_query(&config, QueryKind::First, cmd)?,
        Commands::FirstOrDefault(cmd) => handle_query(&config, QueryKind::FirstOrDefault, cmd)?,
        Commands::List(cmd) => handle_query(&config, QueryKind::List, cmd)?,
    }

    Ok(())
}
