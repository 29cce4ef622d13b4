//! In-memory queryable over materialized records.

use crate::error::Result;
use crate::query::eval::evaluate_predicate;
use crate::query::expr::Lambda;
use crate::storage::{ensure_dispatchable, Queryable};
use crate::types::{ElementType, Record};
use std::sync::Arc;

/// Records held in memory, filtered lazily by composed predicates.
#[derive(Debug, Clone)]
pub struct MemorySource {
    element_type: ElementType,
    records: Arc<Vec<Record>>,
    predicates: Vec<Lambda>,
}

impl MemorySource {
    pub fn new(element_type: ElementType, records: Vec<Record>) -> Self {
        Self {
            element_type,
            records: Arc::new(records),
            predicates: Vec::new(),
        }
    }

    pub fn empty(element_type: ElementType) -> Self {
        Self::new(element_type, Vec::new())
    }

    fn matches(&self, record: &Record) -> Result<bool> {
        for predicate in &self.predicates {
            if !evaluate_predicate(predicate, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn collect(&self, limit: Option<usize>) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for record in self.records.iter() {
            if limit.is_some_and(|n| out.len() >= n) {
                break;
            }
            if self.matches(record)? {
                out.push(record.clone());
            }
        }
        Ok(out)
    }
}

impl Queryable for MemorySource {
    fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    fn filter(&self, as_type: &ElementType, predicate: &Lambda) -> Result<Arc<dyn Queryable>> {
        ensure_dispatchable(as_type, &self.element_type)?;
        let mut filtered = self.clone();
        filtered.predicates.push(predicate.clone());
        Ok(Arc::new(filtered))
    }

    fn any(&self) -> Result<bool> {
        for record in self.records.iter() {
            if self.matches(record)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn count(&self) -> Result<usize> {
        let mut count = 0;
        for record in self.records.iter() {
            if self.matches(record)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn first_or_default(&self) -> Result<Option<Record>> {
        Ok(self.collect(Some(1))?.into_iter().next())
    }

    fn take(&self, n: usize) -> Result<Vec<Record>> {
        self.collect(Some(n))
    }

    fn to_list(&self) -> Result<Vec<Record>> {
        self.collect(None)
    }
}
