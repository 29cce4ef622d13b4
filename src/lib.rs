//! fedquery: expression-rewriting query federation.
//!
//! Queries are expression trees over queryables. When a queryable is backed
//! by several physical sources, the federation rewrite executes the
//! supported operators across all of them and replaces the call by its
//! result before the remaining tree runs.

pub mod cli;
pub mod config;
pub mod error;
pub mod query;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use query::{Expr, Lambda, QueryEngine, QueryEngineBuilder, QueryOutput, RewriteOptions};
pub use storage::{MemorySource, MultiSourceQueryable, Queryable, SourceProvider, SourceRegistry};
pub use types::{ElementType, Field, FieldType, Record, TypeRegistry, Value};
