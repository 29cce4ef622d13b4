//! Cross-source execution of federated operations.
//!
//! Sources are always visited in the order they were given, one at a time.
//! Each operation combines per-source results its own way:
//! - `any` stops at the first source reporting a match
//! - `count` sums every source
//! - `first_or_default` / `first` return the first element found in source order
//! - `take` accumulates until the requested number of elements is reached
//! - `load_to_memory` concatenates everything

use crate::error::{Error, Result};
use crate::query::executor::SourceExecutor;
use crate::query::expr::Constant;
use crate::query::matcher::{FederatedCall, PredicateSet, TerminalOp};
use crate::query::reconcile::reconcile;
use crate::storage::{MemorySource, Queryable};
use crate::types::{ElementType, Record, Value};
use std::sync::Arc;
use tracing::debug;

/// Result of one federated operation.
#[derive(Debug, Clone)]
pub enum FederationResult {
    Any(bool),
    Count(usize),
    First(Option<Record>),
    Take(Arc<MemorySource>),
    Materialized(Arc<MemorySource>),
}

impl FederationResult {
    /// The constant embedded in the rewritten tree.
    pub fn into_constant(self) -> Constant {
        match self {
            FederationResult::Any(any) => Constant::Value(Value::Bool(any)),
            FederationResult::Count(count) => Constant::Value(Value::Int(count as i64)),
            FederationResult::First(record) => Constant::Record(record),
            FederationResult::Take(source) | FederationResult::Materialized(source) => {
                Constant::Queryable(source)
            }
        }
    }

    /// In-memory queryable produced by `Take` and `Where`, if any.
    pub fn queryable(&self) -> Option<Arc<dyn Queryable>> {
        match self {
            FederationResult::Take(source) | FederationResult::Materialized(source) => {
                Some(source.clone() as Arc<dyn Queryable>)
            }
            _ => None,
        }
    }
}

/// Runs one logical operation over an ordered list of sources.
pub struct Federator<'a> {
    sources: &'a [Arc<dyn Queryable>],
    element_type: ElementType,
}

impl<'a> Federator<'a> {
    /// Reconciles the element type of `sources`, which must not be empty.
    pub fn new(sources: &'a [Arc<dyn Queryable>]) -> Result<Self> {
        let element_type = reconcile(sources)?;
        Ok(Self {
            sources,
            element_type,
        })
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    /// Run a matched call.
    pub fn federate(call: &FederatedCall) -> Result<FederationResult> {
        let federator = Federator::new(&call.sources)?;
        debug!(
            op = %call.op,
            sources = call.sources.len(),
            element_type = %federator.element_type,
            predicates = %call.predicates,
            "Federating call"
        );
        let predicates = &call.predicates;
        Ok(match call.op {
            TerminalOp::Any => FederationResult::Any(federator.any(predicates)?),
            TerminalOp::Count => FederationResult::Count(federator.count(predicates)?),
            TerminalOp::FirstOrDefault => {
                FederationResult::First(federator.first_or_default(predicates)?)
            }
            TerminalOp::First => FederationResult::First(Some(federator.first(predicates)?)),
            TerminalOp::Take(n) => FederationResult::Take(federator.take(n, predicates)?),
            TerminalOp::Where => {
                FederationResult::Materialized(federator.load_to_memory(predicates)?)
            }
        })
    }

    fn executor<'p>(&'p self, predicates: &'p PredicateSet) -> SourceExecutor<'p> {
        SourceExecutor::new(&self.element_type, predicates)
    }

    pub fn any(&self, predicates: &PredicateSet) -> Result<bool> {
        let executor = self.executor(predicates);
        for (index, source) in self.sources.iter().enumerate() {
            if executor.any(source)? {
                debug!(source = index, "Any satisfied, skipping remaining sources");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn count(&self, predicates: &PredicateSet) -> Result<usize> {
        let executor = self.executor(predicates);
        let mut total = 0;
        for source in self.sources {
            total += executor.count(source)?;
        }
        Ok(total)
    }

    pub fn first_or_default(&self, predicates: &PredicateSet) -> Result<Option<Record>> {
        let executor = self.executor(predicates);
        for source in self.sources {
            if let Some(record) = executor.first_or_default(source)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn first(&self, predicates: &PredicateSet) -> Result<Record> {
        self.first_or_default(predicates)?
            .ok_or_else(|| Error::EmptySequence(predicates.to_string()))
    }

    pub fn take(&self, count: usize, predicates: &PredicateSet) -> Result<Arc<MemorySource>> {
        let executor = self.executor(predicates);
        let mut taken = Vec::with_capacity(count.min(1024));
        for source in self.sources {
            if taken.len() == count {
                break;
            }
            let remaining = count - taken.len();
            taken.extend(executor.take(source, remaining)?);
        }
        debug!(requested = count, taken = taken.len(), "Take federated");
        Ok(Arc::new(MemorySource::new(self.element_type.clone(), taken)))
    }

    pub fn load_to_memory(&self, predicates: &PredicateSet) -> Result<Arc<MemorySource>> {
        let executor = self.executor(predicates);
        let mut loaded = Vec::new();
        for source in self.sources {
            loaded.extend(executor.to_list(source)?);
        }
        debug!(
            sources = self.sources.len(),
            records = loaded.len(),
            "Loaded sources into memory"
        );
        Ok(Arc::new(MemorySource::new(self.element_type.clone(), loaded)))
    }
}
