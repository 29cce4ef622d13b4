//! Rewriting behavior visible from outside the crate: closure fields,
//! data-access resolution and provider id generation.

mod common;

use common::*;
use fedquery_core::error::Error;
use fedquery_core::query::{eval, Closure, Constant, Expr, Lambda, Method, QueryEngineBuilder};
use fedquery_core::query::{QueryOutput, RewriteOptions};
use fedquery_core::storage::{DuckDbBackend, Queryable, SourceRegistry};
use fedquery_core::types::{ElementType, Field, FieldType, Record, Value};
use std::sync::Arc;

fn article() -> ElementType {
    ElementType::root(
        "RewriteArticle",
        vec![
            Field::new("n", FieldType::Int),
            Field::new("title", FieldType::Text),
        ],
    )
}

fn duck_articles(titles: &[Option<&str>]) -> Arc<dyn Queryable> {
    let backend = DuckDbBackend::new_in_memory().unwrap();
    let ty = article();
    backend.create_table("articles", &ty).unwrap();
    let source = backend.source("articles", ty.clone());
    let records: Vec<Record> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            let record = Record::new(ty.clone()).with("n", i as i64);
            match title {
                Some(t) => record.with("title", *t),
                None => record,
            }
        })
        .collect();
    source.insert(&records).unwrap();
    Arc::new(source)
}

fn contains_method(expr: &Expr, method: &Method) -> bool {
    match expr {
        Expr::Call(call) => {
            &call.method == method
                || call.instance.as_deref().map_or(false, |i| contains_method(i, method))
                || call.args.iter().any(|a| contains_method(a, method))
        }
        Expr::Quote(lambda) | Expr::Lambda(lambda) => contains_method(&lambda.body, method),
        Expr::Binary { left, right, .. } => {
            contains_method(left, method) || contains_method(right, method)
        }
        Expr::Unary { operand, .. } => contains_method(operand, method),
        Expr::Member { target, .. } => contains_method(target, method),
        _ => false,
    }
}

#[test]
fn test_new_uuid_runs_inside_duckdb() {
    let source = duck_articles(&[Some("a"), None, Some("c")]);
    let predicate = Lambda::new(
        "x",
        Expr::param("x").field("title").not_eq(Expr::new_uuid()),
    );
    let query = multi(vec![source]).where_by(predicate).count();

    let engine = QueryEngineBuilder::new().build();
    let rewritten = engine.rewrite(query.clone()).unwrap();
    assert!(contains_method(&rewritten.expr, &Method::ProviderNewId));
    assert!(!contains_method(&rewritten.expr, &Method::NewUuid));
    assert_eq!(
        rewritten.resolved.unwrap().context().unwrap().provider(),
        "duckdb"
    );

    let output = engine.execute(query).unwrap();
    assert_eq!(output, QueryOutput::Value(Value::Int(3)));
}

#[test]
fn test_new_uuid_inside_text_function_runs_inside_duckdb() {
    let source = duck_articles(&[Some("a"), Some("b")]);
    let lowered = Expr::call(Method::Function("lower".into()), vec![Expr::new_uuid()]);
    let query = multi(vec![source])
        .where_by(Lambda::new("x", Expr::param("x").field("title").eq(lowered)))
        .any();

    let engine = QueryEngineBuilder::new().build();
    let rewritten = engine.rewrite(query.clone()).unwrap();
    assert!(contains_method(&rewritten.expr, &Method::ProviderNewId));
    assert_eq!(engine.execute(query).unwrap(), QueryOutput::Value(Value::Bool(false)));
}

#[test]
fn test_first_resolution_wins() {
    let first = memory(&[1, 2]);
    let in_db = duck_articles(&[Some("a")]);
    let predicate = Lambda::new(
        "x",
        Expr::param("x").field("title").not_eq(Expr::new_uuid()),
    );
    let query = multi(vec![first.clone()])
        .count()
        .eq(multi(vec![in_db.clone()]).where_by(predicate).count());

    let rewritten = QueryEngineBuilder::new().build().rewrite(query).unwrap();
    let resolved = rewritten.resolved.unwrap();
    assert!(Arc::ptr_eq(&resolved, &first));
    assert!(!Arc::ptr_eq(&resolved, &in_db));
    assert!(contains_method(&rewritten.expr, &Method::NewUuid));
    assert!(!contains_method(&rewritten.expr, &Method::ProviderNewId));
}

#[test]
fn test_new_uuid_kept_when_provider_functions_disabled() {
    let source = duck_articles(&[Some("a")]);
    let predicate = Lambda::new(
        "x",
        Expr::param("x").field("title").not_eq(Expr::new_uuid()),
    );
    let query = multi(vec![source]).where_by(predicate).count();

    let engine = QueryEngineBuilder::new()
        .with_options(RewriteOptions {
            provider_functions: false,
            ..RewriteOptions::default()
        })
        .build();
    let rewritten = engine.rewrite(query.clone()).unwrap();
    assert!(contains_method(&rewritten.expr, &Method::NewUuid));
    assert_eq!(engine.execute(query).unwrap(), QueryOutput::Value(Value::Int(1)));
}

#[test]
fn test_captured_multi_source_is_persisted() {
    let closure = Arc::new(
        Closure::new().with(
            "pages",
            Constant::MultiSource(Arc::new(
                fedquery_core::storage::MultiSourceQueryable::new(vec![
                    memory(&[1, 2]),
                    memory(&[3]),
                ])
                .unwrap(),
            )),
        ),
    );
    let query = Expr::closure(closure.clone()).field("pages").count();

    let engine = QueryEngineBuilder::new().build();
    let rewritten = engine.rewrite(query.clone()).unwrap();
    assert_eq!(rewritten.expr, query);
    match closure.get("pages") {
        Some(Constant::Queryable(q)) => assert_eq!(q.count().unwrap(), 3),
        other => panic!("field not persisted: {:?}", other),
    }
    assert_eq!(
        eval::execute(&rewritten.expr).unwrap(),
        Constant::Value(Value::Int(3))
    );
}

#[test]
fn test_get_data_resolves_through_registry() {
    let ty = number_type();
    let mut registry = SourceRegistry::new();
    registry.register("small", memory(&[1, 2])).unwrap();
    registry.register("large", memory(&[10, 20, 30])).unwrap();

    let engine = QueryEngineBuilder::new()
        .with_provider(Arc::new(registry))
        .build();

    let all = Expr::get_data(&ty).count_by(n_gt(1));
    assert_eq!(engine.execute(all).unwrap(), QueryOutput::Value(Value::Int(4)));

    let named = Expr::call(Method::GetData(ty.clone()), vec![Expr::lit("large")]).first();
    match engine.execute(named).unwrap() {
        QueryOutput::Element(Some(record)) => assert_eq!(record.get("n"), Some(&Value::Int(10))),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_data_facade_methods_are_rejected() {
    let query = Expr::call(Method::Facade("Save".into()), vec![]);
    match QueryEngineBuilder::new().build().rewrite(query) {
        Err(Error::UnsupportedOperation(message)) => assert!(message.contains("Save")),
        other => panic!("unexpected {:?}", other.map(|r| r.expr)),
    }
}
