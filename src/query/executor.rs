//! Per-source execution of filtered terminal operations.

use crate::error::Result;
use crate::query::matcher::PredicateSet;
use crate::storage::{ensure_dispatchable, Queryable};
use crate::types::{ElementType, Record};
use std::sync::Arc;
use tracing::trace;

/// Compose every predicate onto `query` in order, dispatching as `element_type`.
///
/// Each application yields a new handle; `query` itself is never modified.
pub fn apply_predicates(
    query: &Arc<dyn Queryable>,
    element_type: &ElementType,
    predicates: &PredicateSet,
) -> Result<Arc<dyn Queryable>> {
    let mut filtered = query.clone();
    for predicate in predicates.iter() {
        filtered = filtered.filter(element_type, predicate)?;
    }
    Ok(filtered)
}

/// Runs terminal operations against one source at a time, with the same
/// dispatch type and filters for every source of a federation call.
pub struct SourceExecutor<'a> {
    element_type: &'a ElementType,
    predicates: &'a PredicateSet,
}

impl<'a> SourceExecutor<'a> {
    pub fn new(element_type: &'a ElementType, predicates: &'a PredicateSet) -> Self {
        Self {
            element_type,
            predicates,
        }
    }

    pub fn element_type(&self) -> &ElementType {
        self.element_type
    }

    fn filtered(&self, source: &Arc<dyn Queryable>) -> Result<Arc<dyn Queryable>> {
        trace!(
            source_type = %source.element_type(),
            as_type = %self.element_type,
            predicates = self.predicates.len(),
            "Applying predicates to source"
        );
        ensure_dispatchable(self.element_type, source.element_type())?;
        apply_predicates(source, self.element_type, self.predicates)
    }

    pub fn any(&self, source: &Arc<dyn Queryable>) -> Result<bool> {
        self.filtered(source)?.any()
    }

    pub fn count(&self, source: &Arc<dyn Queryable>) -> Result<usize> {
        self.filtered(source)?.count()
    }

    pub fn first_or_default(&self, source: &Arc<dyn Queryable>) -> Result<Option<Record>> {
        self.filtered(source)?.first_or_default()
    }

    pub fn take(&self, source: &Arc<dyn Queryable>, n: usize) -> Result<Vec<Record>> {
        self.filtered(source)?.take(n)
    }

    pub fn to_list(&self, source: &Arc<dyn Queryable>) -> Result<Vec<Record>> {
        self.filtered(source)?.to_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::query::expr::{Expr, Lambda};
    use crate::storage::MemorySource;
    use crate::types::{Field, FieldType};

    fn source(ty: &ElementType, values: &[i64]) -> Arc<dyn Queryable> {
        let records = values
            .iter()
            .map(|v| Record::new(ty.clone()).with("n", *v))
            .collect();
        Arc::new(MemorySource::new(ty.clone(), records))
    }

    fn n_gt(v: i64) -> Lambda {
        Lambda::new("x", Expr::param("x").field("n").gt(Expr::lit(v)))
    }

    #[test]
    fn test_apply_predicates_in_sequence() {
        let ty = ElementType::root("Number", vec![Field::new("n", FieldType::Int)]);
        let src = source(&ty, &[1, 2, 3, 4]);
        let predicates = PredicateSet::from(vec![n_gt(1), n_gt(2)]);

        let filtered = apply_predicates(&src, &ty, &predicates).unwrap();
        assert_eq!(filtered.count().unwrap(), 2);
        assert_eq!(src.count().unwrap(), 4);

        let unfiltered = apply_predicates(&src, &ty, &PredicateSet::new()).unwrap();
        assert_eq!(unfiltered.count().unwrap(), 4);
    }

    #[test]
    fn test_executor_dispatches_as_supertype() {
        let base = ElementType::root("Number", vec![Field::new("n", FieldType::Int)]);
        let even = ElementType::derive("Even", &base, vec![]);
        let src = source(&even, &[2, 4, 6]);
        let predicates = PredicateSet::from(vec![n_gt(2)]);
        let executor = SourceExecutor::new(&base, &predicates);

        assert!(executor.any(&src).unwrap());
        assert_eq!(executor.count(&src).unwrap(), 2);
        assert_eq!(executor.take(&src, 1).unwrap().len(), 1);
        assert_eq!(executor.to_list(&src).unwrap().len(), 2);
        let first = executor.first_or_default(&src).unwrap().unwrap();
        assert_eq!(first.element_type(), &even);
    }

    #[test]
    fn test_executor_fails_on_unrelated_type() {
        let base = ElementType::root("Number", vec![Field::new("n", FieldType::Int)]);
        let other = ElementType::root("Word", vec![Field::new("n", FieldType::Int)]);
        let src = source(&other, &[1]);
        let predicates = PredicateSet::from(vec![n_gt(0)]);
        let executor = SourceExecutor::new(&base, &predicates);

        assert!(matches!(executor.count(&src), Err(Error::TypeDispatch(_))));

        let unfiltered = PredicateSet::new();
        let executor = SourceExecutor::new(&base, &unfiltered);
        assert!(matches!(executor.any(&src), Err(Error::TypeDispatch(_))));
    }
}
