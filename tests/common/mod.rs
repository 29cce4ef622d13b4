//! Common test utilities for federation tests
#![allow(dead_code)]

use fedquery_core::error::Result;
use fedquery_core::query::{Expr, Lambda};
use fedquery_core::storage::{MemorySource, MultiSourceQueryable, Queryable};
use fedquery_core::types::{ElementType, Field, FieldType, Record};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn number_type() -> ElementType {
    ElementType::root("Number", vec![Field::new("n", FieldType::Int)])
}

/// `Data <- Page <- BlogPage`, `Data <- Media`
pub struct Lattice {
    pub data: ElementType,
    pub page: ElementType,
    pub media: ElementType,
    pub blog: ElementType,
}

pub fn lattice() -> Lattice {
    let data = ElementType::root(
        "Data",
        vec![Field::new("n", FieldType::Int), Field::new("title", FieldType::Text)],
    );
    let page = ElementType::derive("Page", &data, vec![Field::new("path", FieldType::Text)]);
    let media = ElementType::derive("Media", &data, vec![Field::new("size", FieldType::Int)]);
    let blog = ElementType::derive("BlogPage", &page, vec![]);
    Lattice {
        data,
        page,
        media,
        blog,
    }
}

pub fn records(element_type: &ElementType, values: &[i64]) -> Vec<Record> {
    values
        .iter()
        .map(|v| Record::new(element_type.clone()).with("n", *v))
        .collect()
}

pub fn memory_of(element_type: &ElementType, values: &[i64]) -> Arc<dyn Queryable> {
    Arc::new(MemorySource::new(element_type.clone(), records(element_type, values)))
}

pub fn memory(values: &[i64]) -> Arc<dyn Queryable> {
    memory_of(&number_type(), values)
}

pub fn multi(sources: Vec<Arc<dyn Queryable>>) -> Expr {
    Expr::multi_source(Arc::new(MultiSourceQueryable::new(sources).unwrap()))
}

pub fn n_gt(v: i64) -> Lambda {
    Lambda::new("x", Expr::param("x").field("n").gt(Expr::lit(v)))
}

pub fn values(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.get("n").and_then(|v| v.as_int()))
        .collect()
}

/// Counts terminal operations reaching the wrapped source and its filtered views.
#[derive(Debug)]
pub struct CountingSource {
    inner: Arc<dyn Queryable>,
    calls: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn wrap(inner: Arc<dyn Queryable>) -> (Arc<dyn Queryable>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(CountingSource {
            inner,
            calls: calls.clone(),
        });
        (source, calls)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Queryable for CountingSource {
    fn element_type(&self) -> &ElementType {
        self.inner.element_type()
    }

    fn filter(&self, as_type: &ElementType, predicate: &Lambda) -> Result<Arc<dyn Queryable>> {
        Ok(Arc::new(CountingSource {
            inner: self.inner.filter(as_type, predicate)?,
            calls: self.calls.clone(),
        }))
    }

    fn any(&self) -> Result<bool> {
        self.hit();
        self.inner.any()
    }

    fn count(&self) -> Result<usize> {
        self.hit();
        self.inner.count()
    }

    fn first_or_default(&self) -> Result<Option<Record>> {
        self.hit();
        self.inner.first_or_default()
    }

    fn take(&self, n: usize) -> Result<Vec<Record>> {
        self.hit();
        self.inner.take(n)
    }

    fn to_list(&self) -> Result<Vec<Record>> {
        self.hit();
        self.inner.to_list()
    }
}

pub fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
