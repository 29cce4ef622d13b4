//! In-memory evaluation of expressions.
//!
//! Two entry points:
//! - `evaluate_predicate` runs a lambda against one record; in-memory sources
//!   and residual filters of database sources use it.
//! - `execute` runs a rewritten query tree whose queryable constants are all
//!   concrete, dispatching operators to the `Queryable` they apply to.

use crate::error::{Error, Result};
use crate::query::expr::{BinaryOp, Call, Constant, Expr, Lambda, Method, UnaryOp};
use crate::storage::{MemorySource, Queryable};
use crate::types::{Record, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Binding of the lambda parameter currently in scope.
struct Scope<'a> {
    binding: Option<(&'a str, &'a Record)>,
}

impl<'a> Scope<'a> {
    fn empty() -> Self {
        Self { binding: None }
    }

    fn bind(param: &'a str, record: &'a Record) -> Self {
        Self {
            binding: Some((param, record)),
        }
    }

    fn record(&self, name: &str) -> Result<&'a Record> {
        match self.binding {
            Some((param, record)) if param == name => Ok(record),
            _ => Err(Error::InvalidData(format!("Unbound parameter '{}'", name))),
        }
    }
}

/// Evaluate `predicate` with its parameter bound to `record`. Null counts as false.
pub fn evaluate_predicate(predicate: &Lambda, record: &Record) -> Result<bool> {
    let scope = Scope::bind(&predicate.param, record);
    match eval_value(&predicate.body, &scope)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(Error::InvalidData(format!(
            "Predicate '{}' evaluated to {} instead of bool",
            predicate,
            other.type_name()
        ))),
    }
}

/// Evaluate a scalar expression with no parameter in scope.
pub fn evaluate_scalar(expr: &Expr) -> Result<Value> {
    eval_value(expr, &Scope::empty())
}

fn field_of(record: &Record, field: &str) -> Result<Value> {
    record.get(field).cloned().ok_or_else(|| {
        Error::TypeDispatch(format!(
            "Element type '{}' has no field '{}'",
            record.element_type(),
            field
        ))
    })
}

fn eval_member(target: &Expr, field: &str, scope: &Scope<'_>) -> Result<Value> {
    match target {
        Expr::Parameter(name) => field_of(scope.record(name)?, field),
        Expr::Constant(Constant::Record(Some(record))) => field_of(record, field),
        Expr::Constant(Constant::Record(None)) => Err(Error::InvalidData(format!(
            "Field '{}' accessed on a missing element",
            field
        ))),
        Expr::Constant(Constant::Closure(closure)) => match closure.get(field) {
            Some(Constant::Value(value)) => Ok(value),
            Some(other) => Err(Error::InvalidData(format!(
                "Captured field '{}' is not a scalar: {:?}",
                field, other
            ))),
            None => Err(Error::InvalidData(format!(
                "Closure has no captured field '{}'",
                field
            ))),
        },
        other => Err(Error::UnsupportedOperation(format!(
            "Member access on '{}' cannot be evaluated",
            other
        ))),
    }
}

fn truthy(value: &Value, expr: &Expr) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(Error::InvalidData(format!(
            "'{}' evaluated to {} instead of bool",
            expr,
            other.type_name()
        ))),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => left.compare(right) == Some(Ordering::Equal),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Bool(false));
    }
    let ordering = left.compare(right).ok_or_else(|| {
        Error::InvalidData(format!(
            "Cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))
    })?;
    let result = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        _ => unreachable!("not a comparison operator"),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    let overflow = || Error::InvalidData(format!("Integer overflow in '{}'", op.symbol()));
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => Ok(Value::Text(a + &b)),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(Error::InvalidData("Division by zero".to_string()))
                }
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                _ => unreachable!("not an arithmetic operator"),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (a, b) => {
            let (x, y) = match (&a, &b) {
                (Value::Int(x), Value::Float(y)) => (*x as f64, *y),
                (Value::Float(x), Value::Int(y)) => (*x, *y as f64),
                (Value::Float(x), Value::Float(y)) => (*x, *y),
                _ => {
                    return Err(Error::InvalidData(format!(
                        "Operator '{}' is not defined for {} and {}",
                        op.symbol(),
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => unreachable!("not an arithmetic operator"),
            };
            Ok(Value::Float(result))
        }
    }
}

fn eval_function(name: &str, args: Vec<Value>) -> Result<Value> {
    let text_arg = |i: usize| match args.get(i) {
        Some(Value::Text(s)) => Ok(Some(s.as_str())),
        Some(Value::Null) => Ok(None),
        _ => Err(Error::InvalidData(format!(
            "Function '{}' expects a text argument at position {}",
            name, i
        ))),
    };
    let value = match name {
        "lower" => text_arg(0)?.map(|s| Value::Text(s.to_lowercase())),
        "upper" => text_arg(0)?.map(|s| Value::Text(s.to_uppercase())),
        "len" => text_arg(0)?.map(|s| Value::Int(s.chars().count() as i64)),
        "contains" => match (text_arg(0)?, text_arg(1)?) {
            (Some(s), Some(p)) => Some(Value::Bool(s.contains(p))),
            _ => None,
        },
        "starts_with" => match (text_arg(0)?, text_arg(1)?) {
            (Some(s), Some(p)) => Some(Value::Bool(s.starts_with(p))),
            _ => None,
        },
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "Unknown function '{}'",
                other
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn eval_call(call: &Call, scope: &Scope<'_>) -> Result<Value> {
    match &call.method {
        Method::NewUuid => Ok(Value::Text(uuid::Uuid::new_v4().to_string())),
        Method::ProviderNewId => match call.instance.as_deref() {
            Some(Expr::Constant(Constant::Context(context))) => context.new_id(),
            _ => Err(Error::InvalidData(
                "Provider id generation requires a provider context".to_string(),
            )),
        },
        Method::Function(name) => {
            let args = call
                .args
                .iter()
                .map(|arg| eval_value(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            eval_function(name, args)
        }
        other => Err(Error::UnsupportedOperation(format!(
            "'{}' cannot be evaluated as a scalar",
            other.name()
        ))),
    }
}

fn eval_value(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expr::Constant(Constant::Value(value)) => Ok(value.clone()),
        Expr::Constant(other) => Err(Error::InvalidData(format!(
            "Constant {:?} is not a scalar",
            other
        ))),
        Expr::Parameter(name) => Err(Error::InvalidData(format!(
            "Parameter '{}' used as a scalar",
            name
        ))),
        Expr::Member { target, field } => eval_member(target, field, scope),
        Expr::Unary { op, operand } => match (op, eval_value(operand, scope)?) {
            (_, Value::Null) => Ok(Value::Null),
            (UnaryOp::Not, value) => Ok(Value::Bool(!truthy(&value, operand)?)),
            (UnaryOp::Negate, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Error::InvalidData("Integer overflow in negation".to_string())),
            (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Negate, other) => Err(Error::InvalidData(format!(
                "Cannot negate {}",
                other.type_name()
            ))),
        },
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                if !truthy(&eval_value(left, scope)?, left)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&eval_value(right, scope)?, right)?))
            }
            BinaryOp::Or => {
                if truthy(&eval_value(left, scope)?, left)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&eval_value(right, scope)?, right)?))
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                let equal = values_equal(&eval_value(left, scope)?, &eval_value(right, scope)?);
                Ok(Value::Bool(equal == (*op == BinaryOp::Eq)))
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                compare(*op, &eval_value(left, scope)?, &eval_value(right, scope)?)
            }
            _ => arithmetic(*op, eval_value(left, scope)?, eval_value(right, scope)?),
        },
        Expr::Quote(lambda) | Expr::Lambda(lambda) => Err(Error::InvalidData(format!(
            "Lambda '{}' used as a scalar",
            lambda
        ))),
        Expr::Call(call) => eval_call(call, scope),
    }
}

fn is_query_operator(method: &Method) -> bool {
    matches!(
        method,
        Method::Where
            | Method::Any
            | Method::Count
            | Method::First
            | Method::FirstOrDefault
            | Method::Take
    )
}

/// Execute a rewritten query tree.
///
/// Operators are applied to the concrete queryable their first argument
/// evaluates to. A multi-source constant left in the tree is an error: the
/// federation rewrite must run first.
pub fn execute(expr: &Expr) -> Result<Constant> {
    match expr {
        Expr::Constant(Constant::MultiSource(_)) => Err(Error::UnsupportedOperation(
            "Multi-source queryable must be rewritten before execution".to_string(),
        )),
        Expr::Constant(constant) => Ok(constant.clone()),
        Expr::Member { target, field } => match target.as_ref() {
            Expr::Constant(Constant::Closure(closure)) => match closure.get(field) {
                Some(Constant::MultiSource(_)) => Err(Error::UnsupportedOperation(format!(
                    "Captured multi-source queryable '{}' must be rewritten before execution",
                    field
                ))),
                Some(constant) => Ok(constant),
                None => Err(Error::InvalidData(format!(
                    "Closure has no captured field '{}'",
                    field
                ))),
            },
            _ => Ok(Constant::Value(evaluate_scalar(expr)?)),
        },
        Expr::Call(call) if is_query_operator(&call.method) => execute_operator(call),
        _ => Ok(Constant::Value(evaluate_scalar(expr)?)),
    }
}

fn source_of(expr: Option<&Expr>) -> Result<Arc<dyn Queryable>> {
    let expr = expr.ok_or_else(|| {
        Error::InvalidData("Query operator called without a source".to_string())
    })?;
    match execute(expr)? {
        Constant::Queryable(queryable) => Ok(queryable),
        other => Err(Error::InvalidData(format!(
            "Query operator applied to non-queryable {:?}",
            other
        ))),
    }
}

fn quoted_predicate(expr: &Expr) -> Result<&Lambda> {
    match expr {
        Expr::Quote(lambda) => Ok(lambda),
        other => Err(Error::UnsupportedOperation(format!(
            "Predicate '{}' must be a quoted lambda",
            other
        ))),
    }
}

fn execute_operator(call: &Call) -> Result<Constant> {
    if !call.is_static() {
        return Err(Error::UnsupportedOperation(format!(
            "Instance call to '{}' is not supported",
            call.method.name()
        )));
    }
    let source = source_of(call.args.first())?;
    let element_type = source.element_type().clone();

    if call.method == Method::Take {
        let count = match call.args.get(1).map(evaluate_scalar).transpose()? {
            Some(Value::Int(n)) => n.max(0) as usize,
            _ => {
                return Err(Error::InvalidData(
                    "Take requires an integer count".to_string(),
                ))
            }
        };
        let taken = source.take(count)?;
        return Ok(Constant::Queryable(Arc::new(MemorySource::new(
            element_type,
            taken,
        ))));
    }

    let predicate = call.args.get(1).map(quoted_predicate).transpose()?;
    let filtered = match predicate {
        Some(predicate) => source.filter(&element_type, predicate)?,
        None => source,
    };

    match call.method {
        Method::Where => match predicate {
            Some(_) => Ok(Constant::Queryable(filtered)),
            None => Err(Error::InvalidData("Where requires a predicate".to_string())),
        },
        Method::Any => Ok(Constant::Value(Value::Bool(filtered.any()?))),
        Method::Count => Ok(Constant::Value(Value::Int(filtered.count()? as i64))),
        Method::FirstOrDefault => Ok(Constant::Record(filtered.first_or_default()?)),
        Method::First => match filtered.first_or_default()? {
            Some(record) => Ok(Constant::Record(Some(record))),
            None => Err(Error::EmptySequence(
                predicate.map(|p| p.to_string()).unwrap_or_default(),
            )),
        },
        _ => Err(Error::Internal(format!(
            "'{}' is not a query operator",
            call.method.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::Closure;
    use crate::types::{ElementType, Field, FieldType};

    fn item_type() -> ElementType {
        ElementType::root(
            "Item",
            vec![
                Field::new("id", FieldType::Int),
                Field::new("name", FieldType::Text),
                Field::new("price", FieldType::Float),
            ],
        )
    }

    fn item(id: i64, name: &str) -> Record {
        Record::new(item_type())
            .with("id", id)
            .with("name", name)
            .with("price", id as f64 * 1.5)
    }

    fn x() -> Expr {
        Expr::param("x")
    }

    #[test]
    fn test_predicate_comparisons() {
        let record = item(3, "bolt");
        let check = |body: Expr| evaluate_predicate(&Lambda::new("x", body), &record).unwrap();

        assert!(check(x().field("id").gt(Expr::lit(2))));
        assert!(check(x().field("id").eq(Expr::lit(3.0))));
        assert!(check(x().field("price").gt_eq(Expr::lit(4))));
        assert!(!check(x().field("name").eq(Expr::lit("nut"))));
        assert!(check(x().field("name").not_eq(Expr::null())));
        assert!(check(
            x().field("id").lt(Expr::lit(10)).and(x().field("name").eq(Expr::lit("bolt")))
        ));
        assert!(check(x().field("id").eq(Expr::lit(0)).not()));
    }

    #[test]
    fn test_null_fields_are_false() {
        let record = Record::new(item_type()).with("id", 1);
        let lambda = Lambda::new("x", x().field("price").gt(Expr::lit(0)));
        assert!(!evaluate_predicate(&lambda, &record).unwrap());
        let lambda = Lambda::new("x", x().field("name").eq(Expr::null()));
        assert!(evaluate_predicate(&lambda, &record).unwrap());
    }

    #[test]
    fn test_unknown_field_is_dispatch_error() {
        let lambda = Lambda::new("x", x().field("weight").gt(Expr::lit(0)));
        assert!(matches!(
            evaluate_predicate(&lambda, &item(1, "a")),
            Err(Error::TypeDispatch(_))
        ));
    }

    #[test]
    fn test_non_bool_predicate_is_error() {
        let lambda = Lambda::new("x", x().field("id").add(Expr::lit(1)));
        assert!(evaluate_predicate(&lambda, &item(1, "a")).is_err());
    }

    #[test]
    fn test_closure_and_functions() {
        let closure = Arc::new(Closure::new().with("min", Constant::Value(Value::Int(2))));
        let lambda = Lambda::new(
            "x",
            x().field("id")
                .gt_eq(Expr::closure(closure).field("min"))
                .and(Expr::call(
                    Method::Function("starts_with".into()),
                    vec![
                        Expr::call(Method::Function("lower".into()), vec![x().field("name")]),
                        Expr::lit("bo"),
                    ],
                )),
        );
        assert!(evaluate_predicate(&lambda, &item(2, "Bolt")).unwrap());
        assert!(!evaluate_predicate(&lambda, &item(1, "Bolt")).unwrap());
    }

    #[test]
    fn test_scalar_arithmetic() {
        assert_eq!(
            evaluate_scalar(&Expr::lit(2).add(Expr::lit(3))).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            evaluate_scalar(&Expr::lit("a").add(Expr::lit("b"))).unwrap(),
            Value::Text("ab".into())
        );
        let div = Expr::Binary {
            op: BinaryOp::Div,
            left: Box::new(Expr::lit(1)),
            right: Box::new(Expr::lit(0)),
        };
        assert!(evaluate_scalar(&div).is_err());
        assert!(matches!(
            evaluate_scalar(&Expr::new_uuid()).unwrap(),
            Value::Text(s) if s.len() == 36
        ));
    }

    #[test]
    fn test_execute_operators_on_concrete_source() {
        let source: Arc<dyn Queryable> = Arc::new(MemorySource::new(
            item_type(),
            vec![item(1, "a"), item(2, "b"), item(3, "c")],
        ));
        let id_gt = |v: i64| Lambda::new("x", x().field("id").gt(Expr::lit(v)));

        let count = execute(&Expr::queryable(source.clone()).count_by(id_gt(1))).unwrap();
        assert_eq!(count, Constant::Value(Value::Int(2)));

        let first = execute(&Expr::queryable(source.clone()).where_by(id_gt(1)).first()).unwrap();
        match first {
            Constant::Record(Some(record)) => assert_eq!(record.get("id"), Some(&Value::Int(2))),
            other => panic!("unexpected {:?}", other),
        }

        let taken = execute(&Expr::queryable(source.clone()).take(2).count()).unwrap();
        assert_eq!(taken, Constant::Value(Value::Int(2)));

        let err = execute(&Expr::queryable(source).first_by(id_gt(5))).unwrap_err();
        assert!(matches!(err, Error::EmptySequence(msg) if msg.contains("x.id > 5")));
    }

    #[test]
    fn test_execute_requires_quoted_predicate() {
        let source: Arc<dyn Queryable> = Arc::new(MemorySource::empty(item_type()));
        let expr = Expr::call(
            Method::Any,
            vec![
                Expr::queryable(source),
                Expr::Lambda(Lambda::new("x", Expr::lit(true))),
            ],
        );
        assert!(matches!(
            execute(&expr),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
