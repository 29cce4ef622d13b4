//! Predicate pushdown: translation of predicates into SQL `WHERE` fragments.
//!
//! Translation is partial. Anything the translator cannot express with the
//! exact semantics of the in-memory evaluator yields `None`, and the caller
//! keeps that predicate as a residual filter evaluated in memory.
//!
//! The in-memory evaluator is two-valued: a null in a boolean position counts
//! as false, `==` treats two nulls as equal, ordering comparisons involving
//! null are false. Fragments are built to match, using `IS [NOT] DISTINCT FROM`
//! for equality and `COALESCE(.., FALSE)` around anything that may be null.

use crate::query::expr::{BinaryOp, Call, Constant, Expr, Lambda, Method, UnaryOp};
use crate::types::{ElementType, FieldType, Value};

/// Quote an identifier for DuckDB.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a literal, if it has an exact SQL spelling.
pub fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::Bool(true) => Some("TRUE".to_string()),
        Value::Bool(false) => Some("FALSE".to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(format!("CAST({:?} AS DOUBLE)", f)),
        Value::Float(_) => None,
        Value::Text(s) => Some(format!("'{}'", s.replace('\'', "''"))),
    }
}

fn kind_of(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Typed(FieldType::Bool),
        Value::Int(_) => Kind::Typed(FieldType::Int),
        Value::Float(_) => Kind::Typed(FieldType::Float),
        Value::Text(_) => Kind::Typed(FieldType::Text),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Null,
    Typed(FieldType),
}

impl Kind {
    fn is_numeric(self) -> bool {
        matches!(self, Kind::Typed(FieldType::Int) | Kind::Typed(FieldType::Float))
    }

    fn is(self, field_type: FieldType) -> bool {
        self == Kind::Typed(field_type)
    }

    /// Whether the evaluator compares these kinds without a type error.
    fn comparable(self, other: Kind) -> bool {
        match (self, other) {
            (Kind::Null, _) | (_, Kind::Null) => true,
            (a, b) => a == b || (a.is_numeric() && b.is_numeric()),
        }
    }

    fn arithmetic(self, other: Kind) -> Option<Kind> {
        match (self, other) {
            (Kind::Null, k) | (k, Kind::Null) if k.is_numeric() || k == Kind::Null => Some(k),
            (Kind::Typed(FieldType::Int), Kind::Typed(FieldType::Int)) => Some(self),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Kind::Typed(FieldType::Float)),
            _ => None,
        }
    }
}

/// Translates predicates over one element type.
pub struct SqlTranslator<'a> {
    element_type: &'a ElementType,
    provider: &'a str,
}

impl<'a> SqlTranslator<'a> {
    /// `provider` names the database; provider id calls bound to another
    /// provider are not translated.
    pub fn new(element_type: &'a ElementType, provider: &'a str) -> Self {
        Self {
            element_type,
            provider,
        }
    }

    /// The `WHERE` fragment equivalent to `predicate`, or `None` when it must
    /// be evaluated in memory.
    pub fn translate(&self, predicate: &Lambda) -> Option<String> {
        self.condition(&predicate.body, &predicate.param)
    }

    /// A never-null boolean fragment.
    fn condition(&self, expr: &Expr, param: &str) -> Option<String> {
        match expr {
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let keyword = if *op == BinaryOp::And { "AND" } else { "OR" };
                    Some(format!(
                        "({} {} {})",
                        self.condition(left, param)?,
                        keyword,
                        self.condition(right, param)?
                    ))
                }
                BinaryOp::Eq | BinaryOp::NotEq => {
                    let (l, lk) = self.value(left, param)?;
                    let (r, rk) = self.value(right, param)?;
                    if !lk.comparable(rk) {
                        return None;
                    }
                    let keyword = if *op == BinaryOp::Eq {
                        "IS NOT DISTINCT FROM"
                    } else {
                        "IS DISTINCT FROM"
                    };
                    Some(format!("({} {} {})", l, keyword, r))
                }
                BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                    let (l, lk) = self.value(left, param)?;
                    let (r, rk) = self.value(right, param)?;
                    if !lk.comparable(rk) {
                        return None;
                    }
                    let symbol = match op {
                        BinaryOp::Lt => "<",
                        BinaryOp::LtEq => "<=",
                        BinaryOp::Gt => ">",
                        _ => ">=",
                    };
                    Some(format!("COALESCE(({} {} {}), FALSE)", l, symbol, r))
                }
                _ => None,
            },
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => match operand.as_ref() {
                // Not(null) stays null, and null is false
                Expr::Member { .. } | Expr::Call(_) | Expr::Constant(_) => {
                    let (sql, kind) = self.value(operand, param)?;
                    if !(kind.is(FieldType::Bool) || kind == Kind::Null) {
                        return None;
                    }
                    Some(format!("COALESCE((NOT {}), FALSE)", sql))
                }
                other => Some(format!("(NOT {})", self.condition(other, param)?)),
            },
            _ => {
                let (sql, kind) = self.value(expr, param)?;
                if !(kind.is(FieldType::Bool) || kind == Kind::Null) {
                    return None;
                }
                Some(format!("COALESCE({}, FALSE)", sql))
            }
        }
    }

    /// A value fragment and its kind.
    fn value(&self, expr: &Expr, param: &str) -> Option<(String, Kind)> {
        match expr {
            Expr::Constant(Constant::Value(value)) => Some((literal(value)?, kind_of(value))),
            Expr::Member { target, field } => match target.as_ref() {
                Expr::Parameter(name) if name == param => {
                    let field = self.element_type.field(field)?;
                    Some((quote_ident(&field.name), Kind::Typed(field.field_type)))
                }
                Expr::Constant(Constant::Closure(closure)) => match closure.get(field)? {
                    Constant::Value(value) => Some((literal(&value)?, kind_of(&value))),
                    _ => None,
                },
                _ => None,
            },
            Expr::Unary {
                op: UnaryOp::Negate,
                operand,
            } => {
                let (sql, kind) = self.value(operand, param)?;
                if !(kind.is_numeric() || kind == Kind::Null) {
                    return None;
                }
                Some((format!("(-{})", sql), kind))
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                    let (l, lk) = self.value(left, param)?;
                    let (r, rk) = self.value(right, param)?;
                    if *op == BinaryOp::Add && lk.is(FieldType::Text) && rk.is(FieldType::Text) {
                        return Some((format!("({} || {})", l, r), lk));
                    }
                    let kind = lk.arithmetic(rk)?;
                    let symbol = match op {
                        BinaryOp::Add => "+",
                        BinaryOp::Sub => "-",
                        _ => "*",
                    };
                    Some((format!("({} {} {})", l, symbol, r), kind))
                }
                // Division and modulo differ on zero divisors and integer rounding
                BinaryOp::Div | BinaryOp::Mod => None,
                _ => Some((
                    self.condition(expr, param)?,
                    Kind::Typed(FieldType::Bool),
                )),
            },
            Expr::Unary { .. } => Some((self.condition(expr, param)?, Kind::Typed(FieldType::Bool))),
            Expr::Call(call) => self.call(call, param),
            _ => None,
        }
    }

    fn call(&self, call: &Call, param: &str) -> Option<(String, Kind)> {
        match &call.method {
            Method::ProviderNewId => match call.instance.as_deref() {
                Some(Expr::Constant(Constant::Context(context)))
                    if context.provider() == self.provider =>
                {
                    Some((context.new_id_sql().to_string(), Kind::Typed(FieldType::Text)))
                }
                _ => None,
            },
            Method::Function(name) if call.is_static() => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.value(arg, param))
                    .collect::<Option<Vec<_>>>()?;
                if !args
                    .iter()
                    .all(|(_, kind)| kind.is(FieldType::Text) || *kind == Kind::Null)
                {
                    return None;
                }
                let (function, kind) = match (name.as_str(), args.len()) {
                    ("lower", 1) => ("lower", FieldType::Text),
                    ("upper", 1) => ("upper", FieldType::Text),
                    ("len", 1) => ("length", FieldType::Int),
                    ("contains", 2) => ("contains", FieldType::Bool),
                    ("starts_with", 2) => ("starts_with", FieldType::Bool),
                    _ => return None,
                };
                let rendered: Vec<String> = args.into_iter().map(|(sql, _)| sql).collect();
                Some((
                    format!("{}({})", function, rendered.join(", ")),
                    Kind::Typed(kind),
                ))
            }
            _ => None,
        }
    }
}
