//! Queryable sources.
//!
//! This module provides the source abstraction the federator works over:
//! - `Queryable`: one physical source with composable filters
//! - `MultiSourceQueryable`: an ordered set of sources sharing an element type lattice
//! - `ProviderContext`: provider-side execution context of a source
//! - `SourceProvider` / `SourceRegistry`: data-access entry point lookup
//!
//! Concrete providers live in `memory` (in-process records) and `duckdb`.

pub mod duckdb;
pub mod memory;
pub mod sql;

pub use self::duckdb::{DuckDbBackend, DuckDbContext, DuckDbSource};
pub use memory::MemorySource;

use crate::error::{Error, Result};
use crate::query::expr::Lambda;
use crate::types::{ElementType, Record, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A physical source of elements.
///
/// Filters compose: `filter` returns a new handle and leaves `self` untouched.
/// Terminal operations execute synchronously against the source.
pub trait Queryable: Send + Sync + fmt::Debug {
    /// Element type of the records this source produces.
    fn element_type(&self) -> &ElementType;

    /// Compose `predicate`, written against `as_type`, onto this source.
    fn filter(&self, as_type: &ElementType, predicate: &Lambda) -> Result<Arc<dyn Queryable>>;

    fn any(&self) -> Result<bool>;

    fn count(&self) -> Result<usize>;

    fn first_or_default(&self) -> Result<Option<Record>>;

    /// Up to `n` records in source order.
    fn take(&self, n: usize) -> Result<Vec<Record>>;

    fn to_list(&self) -> Result<Vec<Record>>;

    /// Provider execution context, if this source is backed by a database.
    fn context(&self) -> Option<Arc<dyn ProviderContext>> {
        None
    }
}

/// Provider-side execution context.
pub trait ProviderContext: Send + Sync + fmt::Debug {
    /// Provider name, used in diagnostics.
    fn provider(&self) -> &str;

    /// SQL expression producing a fresh unique id inside the provider.
    fn new_id_sql(&self) -> &str;

    /// Generate a unique id through the provider.
    fn new_id(&self) -> Result<Value>;
}

/// Fails unless records of `source_type` can be viewed as `as_type`.
pub(crate) fn ensure_dispatchable(as_type: &ElementType, source_type: &ElementType) -> Result<()> {
    if as_type.is_assignable_from(source_type) {
        Ok(())
    } else {
        Err(Error::TypeDispatch(format!(
            "Source of element type '{}' cannot be queried as '{}'",
            source_type, as_type
        )))
    }
}

/// An ordered, non-empty collection of sources queried as one.
#[derive(Debug, Clone)]
pub struct MultiSourceQueryable {
    sources: Vec<Arc<dyn Queryable>>,
}

impl MultiSourceQueryable {
    pub fn new(sources: Vec<Arc<dyn Queryable>>) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::InvalidData(
                "A multi-source queryable needs at least one source".to_string(),
            ));
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Arc<dyn Queryable>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether more than one source backs this queryable.
    pub fn is_federated(&self) -> bool {
        self.sources.len() > 1
    }

    /// Reconciled element type of the sources.
    pub fn element_type(&self) -> ElementType {
        crate::query::reconcile::reconcile_types(
            self.sources[0].element_type(),
            self.sources[1..].iter().map(|s| s.element_type()),
        )
    }
}

/// Supplies the sources behind a data-access entry point.
pub trait SourceProvider: Send + Sync {
    /// All data of `element_type`. `args` are the constant arguments of the call.
    fn get_data(&self, element_type: &ElementType, args: &[Value]) -> Result<MultiSourceQueryable>;
}

struct NamedSource {
    name: String,
    source: Arc<dyn Queryable>,
}

/// Sources registered by name, in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<NamedSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, source: Arc<dyn Queryable>) -> Result<()> {
        if self.sources.iter().any(|s| s.name == name) {
            return Err(Error::Config(format!("Source '{}' registered twice", name)));
        }
        debug!(source = name, element_type = %source.element_type(), "Registered source");
        self.sources.push(NamedSource {
            name: name.to_string(),
            source,
        });
        Ok(())
    }

    /// Registered sources as `(name, element type)` pairs.
    pub fn list(&self) -> Vec<(String, ElementType)> {
        self.sources
            .iter()
            .map(|s| (s.name.clone(), s.source.element_type().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceProvider for SourceRegistry {
    /// Every source whose elements are assignable to `element_type`. Text
    /// arguments restrict the result to the named sources.
    fn get_data(&self, element_type: &ElementType, args: &[Value]) -> Result<MultiSourceQueryable> {
        let mut names = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Text(name) => names.push(name.as_str()),
                other => {
                    return Err(Error::UnsupportedOperation(format!(
                        "GetData argument of type {} is not supported",
                        other.type_name()
                    )))
                }
            }
        }

        let sources: Vec<Arc<dyn Queryable>> = self
            .sources
            .iter()
            .filter(|s| element_type.is_assignable_from(s.source.element_type()))
            .filter(|s| names.is_empty() || names.contains(&s.name.as_str()))
            .map(|s| s.source.clone())
            .collect();

        if sources.is_empty() {
            return Err(Error::InvalidData(format!(
                "No sources registered for {}",
                element_type
            )));
        }
        debug!(element_type = %element_type, sources = sources.len(), "Resolved data sources");
        MultiSourceQueryable::new(sources)
    }
}
