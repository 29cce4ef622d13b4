//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Listing configured sources
//! - Running federated queries against them

pub mod commands;
pub mod handlers;

pub use commands::{Commands, LoggingConfig, QueryCommand};
pub use handlers::{build_query, handle_query, handle_sources, parse_filter, QueryKind};
