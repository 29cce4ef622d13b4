use crate::cli::commands::QueryCommand;
use crate::config::ServiceConfig;
use crate::error::Error;
use crate::query::{BinaryOp, Expr, Lambda, QueryEngineBuilder, QueryOutput};
use crate::storage::{MultiSourceQueryable, SourceProvider};
use crate::types::{ElementType, FieldType, Value};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Terminal operator run by a query command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Any,
    Count,
    First,
    FirstOrDefault,
    List,
}

const OPERATORS: [(&str, BinaryOp); 7] = [
    ("==", BinaryOp::Eq),
    ("!=", BinaryOp::NotEq),
    (">=", BinaryOp::GtEq),
    ("<=", BinaryOp::LtEq),
    ("=", BinaryOp::Eq),
    (">", BinaryOp::Gt),
    ("<", BinaryOp::Lt),
];

fn parse_literal(field_type: FieldType, literal: &str) -> crate::error::Result<Value> {
    if literal.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    let invalid = |reason: String| {
        Error::InvalidData(format!(
            "'{}' is not a valid {:?} literal: {}",
            literal, field_type, reason
        ))
    };
    match field_type {
        FieldType::Text => {
            let unquoted = ['\'', '"']
                .iter()
                .find_map(|q| {
                    literal
                        .strip_prefix(*q)
                        .and_then(|rest| rest.strip_suffix(*q))
                })
                .unwrap_or(literal);
            Ok(Value::from(unquoted))
        }
        FieldType::Int => literal.parse::<i64>().map(Value::Int).map_err(|e| invalid(e.to_string())),
        FieldType::Float => literal.parse::<f64>().map(Value::Float).map_err(|e| invalid(e.to_string())),
        FieldType::Bool => literal.parse::<bool>().map(Value::Bool).map_err(|e| invalid(e.to_string())),
    }
}

/// Parse `field OP literal` into a predicate over `element_type`.
pub fn parse_filter(element_type: &ElementType, filter: &str) -> crate::error::Result<Lambda> {
    let malformed = || {
        Error::InvalidData(format!(
            "Filter '{}' is not of the form `field OP literal`",
            filter
        ))
    };
    let start = filter
        .find(|c: char| matches!(c, '!' | '<' | '>' | '='))
        .ok_or_else(malformed)?;
    let rest = &filter[start..];
    let (symbol, op) = OPERATORS
        .iter()
        .find(|(symbol, _)| rest.starts_with(symbol))
        .ok_or_else(malformed)?;

    let name = filter[..start].trim();
    if name.is_empty() {
        return Err(malformed());
    }
    let field = element_type.field(name).ok_or_else(|| {
        Error::InvalidData(format!(
            "Element type '{}' has no field '{}'",
            element_type, name
        ))
    })?;
    let value = parse_literal(field.field_type, rest[symbol.len()..].trim())?;

    Ok(Lambda::new(
        "x",
        Expr::Binary {
            op: *op,
            left: Box::new(Expr::param("x").field(&field.name)),
            right: Box::new(Expr::lit(value)),
        },
    ))
}

/// Build the query tree for a command over `sources`.
///
/// Every filter becomes a `Where` call, except that for operators other than
/// `list` the last of two or more filters is passed to the operator itself.
pub fn build_query(
    kind: QueryKind,
    sources: Arc<MultiSourceQueryable>,
    element_type: &ElementType,
    cmd: &QueryCommand,
) -> crate::error::Result<Expr> {
    let mut predicates = cmd
        .filters
        .iter()
        .map(|filter| parse_filter(element_type, filter))
        .collect::<crate::error::Result<Vec<_>>>()?;
    let own = if kind != QueryKind::List && predicates.len() >= 2 {
        predicates.pop()
    } else {
        None
    };

    let mut expr = Expr::multi_source(sources);
    for predicate in predicates {
        expr = expr.where_by(predicate);
    }
    if let Some(n) = cmd.take {
        expr = expr.take(n);
    }

    Ok(match (kind, own) {
        (QueryKind::List, _) => expr,
        (QueryKind::Any, Some(p)) => expr.any_by(p),
        (QueryKind::Any, None) => expr.any(),
        (QueryKind::Count, Some(p)) => expr.count_by(p),
        (QueryKind::Count, None) => expr.count(),
        (QueryKind::First, Some(p)) => expr.first_by(p),
        (QueryKind::First, None) => expr.first(),
        (QueryKind::FirstOrDefault, Some(p)) => expr.first_or_default_by(p),
        (QueryKind::FirstOrDefault, None) => expr.first_or_default(),
    })
}

/// Run a query command and return its output.
pub fn run_query(config: &ServiceConfig, kind: QueryKind, cmd: &QueryCommand) -> Result<QueryOutput> {
    let (types, registry) = config.build_registry()?;
    let element_type = types
        .get(&cmd.element_type)
        .with_context(|| format!("Unknown element type '{}'", cmd.element_type))?;
    let names: Vec<Value> = cmd.sources.iter().map(|s| Value::from(s.as_str())).collect();
    let sources = registry.get_data(&element_type, &names)?;

    let engine = QueryEngineBuilder::new()
        .with_options(config.rewrite_options())
        .with_provider(Arc::new(registry))
        .build();
    let expr = build_query(kind, Arc::new(sources), &element_type, cmd)?;
    info!(query = %expr, "Running query");
    Ok(engine.execute(expr)?)
}

pub fn handle_query(config: &ServiceConfig, kind: QueryKind, cmd: &QueryCommand) -> Result<()> {
    let output = run_query(config, kind, cmd)?;
    println!("{}", serde_json::to_string_pretty(&output.to_json())?);
    Ok(())
}

pub fn handle_sources(config: &ServiceConfig) -> Result<()> {
    let (_, registry) = config.build_registry()?;
    let listed: Vec<serde_json::Value> = registry
        .list()
        .into_iter()
        .map(|(name, element_type)| {
            serde_json::json!({
                "name": name,
                "element_type": element_type.name(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listed)?);
    Ok(())
}
