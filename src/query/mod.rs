//! Query rewriting and execution
//!
//! This module provides the federation pipeline:
//! - Expression trees and their in-memory evaluation
//! - Element type reconciliation across sources
//! - Recognition of federatable call shapes
//! - Per-source and cross-source execution
//! - The rewrite pass tying these together

pub mod eval;
pub mod executor;
pub mod expr;
pub mod federator;
pub mod matcher;
pub mod reconcile;
pub mod rewriter;

pub use executor::{apply_predicates, SourceExecutor};
pub use expr::{BinaryOp, Call, Closure, Constant, Expr, Lambda, Method, UnaryOp};
pub use federator::{FederationResult, Federator};
pub use matcher::{match_call, FederatedCall, PredicateSet, TerminalOp};
pub use reconcile::reconcile;
pub use rewriter::{FederationRewriter, RewriteOptions, RewriteState, Rewritten};

use crate::error::{Error, Result};
use crate::storage::SourceProvider;
use crate::types::{Record, Value};
use std::sync::Arc;
use tracing::debug;

/// Result of executing a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Value(Value),
    Element(Option<Record>),
    Elements(Vec<Record>),
}

impl QueryOutput {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryOutput::Value(value) => value.to_json(),
            QueryOutput::Element(Some(record)) => record.to_json(),
            QueryOutput::Element(None) => serde_json::Value::Null,
            QueryOutput::Elements(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}

/// High-level engine: rewrites a tree for federation, then executes it.
pub struct QueryEngine {
    options: RewriteOptions,
    provider: Option<Arc<dyn SourceProvider>>,
}

impl QueryEngine {
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    /// Run the rewrite pass alone.
    pub fn rewrite(&self, expr: Expr) -> Result<Rewritten> {
        let mut rewriter = FederationRewriter::new(self.options);
        if let Some(provider) = &self.provider {
            rewriter = rewriter.with_provider(provider.clone());
        }
        rewriter.rewrite(expr)
    }

    /// Rewrite and execute a query.
    pub fn execute(&self, expr: Expr) -> Result<QueryOutput> {
        let rewritten = self.rewrite(expr)?;
        debug!(expr = %rewritten.expr, "Executing rewritten query");
        match eval::execute(&rewritten.expr)? {
            Constant::Value(value) => Ok(QueryOutput::Value(value)),
            Constant::Record(record) => Ok(QueryOutput::Element(record)),
            Constant::Queryable(queryable) => Ok(QueryOutput::Elements(queryable.to_list()?)),
            other => Err(Error::InvalidData(format!(
                "Query produced a non-data result: {:?}",
                other
            ))),
        }
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(RewriteOptions::default())
    }
}

/// Builder for configuring and creating a QueryEngine
#[derive(Default)]
pub struct QueryEngineBuilder {
    options: RewriteOptions,
    provider: Option<Arc<dyn SourceProvider>>,
}

impl QueryEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pull_all_to_memory(mut self, enabled: bool) -> Self {
        self.options.pull_all_to_memory = enabled;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> QueryEngine {
        QueryEngine {
            options: self.options,
            provider: self.provider,
        }
    }
}
