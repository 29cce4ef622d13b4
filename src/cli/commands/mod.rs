use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured sources and their element types
    Sources,
    /// Whether any element matches
    Any(QueryCommand),
    /// Number of matching elements across all sources
    Count(QueryCommand),
    /// First matching element; fails when there is none
    First(QueryCommand),
    /// First matching element, or null
    FirstOrDefault(QueryCommand),
    /// All matching elements
    List(QueryCommand),
}

#[derive(Args, Debug, Clone)]
pub struct QueryCommand {
    /// Element type to query
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub element_type: String,

    /// Filter of the form `field OP literal`, OP one of = != > >= < <=
    #[arg(short = 'w', long = "where", value_name = "FILTER")]
    pub filters: Vec<String>,

    /// Restrict the query to the named sources
    #[arg(short = 's', long = "source", value_name = "NAME")]
    pub sources: Vec<String>,

    /// Take at most N elements before the operator runs
    #[arg(long, value_name = "N")]
    pub take: Option<i64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log filter directives, e.g. `fedquery_core::query=debug`
    #[arg(long = "log-filter", value_name = "FILTER", global = true)]
    pub log_filter: Option<String>,
}

impl LoggingConfig {
    pub fn get_effective_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
