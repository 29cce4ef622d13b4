//! Query expression trees.
//!
//! A query is a tree of static operator calls (`Where`, `Any`, `Count`, ...)
//! over constants that embed queryables, with predicates passed as quoted
//! lambdas. The rewriter replaces subtrees of this tree; the evaluator
//! executes whatever remains.

use crate::error::Result;
use crate::storage::{MultiSourceQueryable, ProviderContext, Queryable, SourceProvider};
use crate::types::{ElementType, Record, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AndAlso",
            BinaryOp::Or => "OrElse",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Call targets understood by the rewriter and the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Where,
    Any,
    Count,
    First,
    FirstOrDefault,
    Take,
    /// Data-access entry point returning all data of an element type.
    GetData(ElementType),
    /// Any other data-facade method; not supported inside queries.
    Facade(String),
    /// Runtime unique-id generation.
    NewUuid,
    /// Unique-id generation evaluated by the provider bound as the call instance.
    ProviderNewId,
    /// Scalar function evaluated in memory (`lower`, `upper`, `len`, `contains`, `starts_with`).
    Function(String),
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Method::Where => "Where",
            Method::Any => "Any",
            Method::Count => "Count",
            Method::First => "First",
            Method::FirstOrDefault => "FirstOrDefault",
            Method::Take => "Take",
            Method::GetData(_) => "GetData",
            Method::Facade(name) => name,
            Method::NewUuid => "NewUuid",
            Method::ProviderNewId => "NewId",
            Method::Function(name) => name,
        }
    }
}

/// Captured variables of a query closure.
///
/// Fields may be overwritten in place by the rewriter when it resolves a
/// captured multi-source queryable.
#[derive(Debug, Default)]
pub struct Closure {
    fields: RwLock<BTreeMap<String, Constant>>,
}

impl Closure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: Constant) -> Self {
        self.fields.write().insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<Constant> {
        self.fields.read().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Constant) {
        self.fields.write().insert(name.to_string(), value);
    }
}

/// Values embedded in a tree.
#[derive(Clone)]
pub enum Constant {
    Value(Value),
    Record(Option<Record>),
    Queryable(Arc<dyn Queryable>),
    MultiSource(Arc<MultiSourceQueryable>),
    Closure(Arc<Closure>),
    Context(Arc<dyn ProviderContext>),
    /// A data connection; `GetData` called on it resolves through its provider.
    Connection(Arc<dyn SourceProvider>),
}

fn same_object<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Value(a), Constant::Value(b)) => a == b,
            (Constant::Record(a), Constant::Record(b)) => a == b,
            (Constant::Queryable(a), Constant::Queryable(b)) => same_object(a, b),
            (Constant::MultiSource(a), Constant::MultiSource(b)) => same_object(a, b),
            (Constant::Closure(a), Constant::Closure(b)) => same_object(a, b),
            (Constant::Context(a), Constant::Context(b)) => same_object(a, b),
            (Constant::Connection(a), Constant::Connection(b)) => same_object(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Value(v) => write!(f, "Value({})", v),
            Constant::Record(r) => write!(f, "Record({:?})", r),
            Constant::Queryable(q) => write!(f, "Queryable<{}>({:?})", q.element_type(), q),
            Constant::MultiSource(ms) => {
                write!(f, "MultiSource<{}>[{}]", ms.element_type(), ms.len())
            }
            Constant::Closure(c) => write!(f, "Closure({:?})", c),
            Constant::Context(c) => write!(f, "Context({})", c.provider()),
            Constant::Connection(_) => write!(f, "Connection"),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Value(v) => write!(f, "{}", v),
            Constant::Record(Some(r)) => write!(f, "{}", r.to_json()),
            Constant::Record(None) => write!(f, "null"),
            Constant::Queryable(q) => write!(f, "Queryable<{}>", q.element_type()),
            Constant::MultiSource(ms) => write!(f, "MultiSource<{}>", ms.element_type()),
            Constant::Closure(_) => write!(f, "<closure>"),
            Constant::Context(c) => write!(f, "<{}>", c.provider()),
            Constant::Connection(_) => write!(f, "<connection>"),
        }
    }
}

/// A single-parameter lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub param: String,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(param: &str, body: Expr) -> Self {
        Self {
            param: param.to_string(),
            body: Box::new(body),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.param, self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    /// Receiver for instance calls; `None` for static calls.
    pub instance: Option<Box<Expr>>,
    pub args: Vec<Expr>,
}

impl Call {
    pub fn is_static(&self) -> bool {
        self.instance.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    Parameter(String),
    Member { target: Box<Expr>, field: String },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    /// A lambda passed as an expression tree, the only form predicates are matched in.
    Quote(Lambda),
    /// A lambda passed as an opaque delegate.
    Lambda(Lambda),
    Call(Call),
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Constant(Constant::Value(value.into()))
    }

    pub fn null() -> Self {
        Expr::Constant(Constant::Value(Value::Null))
    }

    pub fn param(name: &str) -> Self {
        Expr::Parameter(name.to_string())
    }

    pub fn queryable(q: Arc<dyn Queryable>) -> Self {
        Expr::Constant(Constant::Queryable(q))
    }

    pub fn multi_source(ms: Arc<MultiSourceQueryable>) -> Self {
        Expr::Constant(Constant::MultiSource(ms))
    }

    pub fn closure(closure: Arc<Closure>) -> Self {
        Expr::Constant(Constant::Closure(closure))
    }

    pub fn call(method: Method, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            method,
            instance: None,
            args,
        })
    }

    pub fn instance_call(method: Method, instance: Expr, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            method,
            instance: Some(Box::new(instance)),
            args,
        })
    }

    pub fn get_data(element_type: &ElementType) -> Self {
        Expr::call(Method::GetData(element_type.clone()), vec![])
    }

    pub fn connection(provider: Arc<dyn SourceProvider>) -> Self {
        Expr::Constant(Constant::Connection(provider))
    }

    /// `GetData` called on this expression as a data connection.
    pub fn get_data_on(self, element_type: &ElementType) -> Self {
        Expr::instance_call(Method::GetData(element_type.clone()), self, vec![])
    }

    pub fn new_uuid() -> Self {
        Expr::call(Method::NewUuid, vec![])
    }

    pub fn field(self, name: &str) -> Self {
        Expr::Member {
            target: Box::new(self),
            field: name.to_string(),
        }
    }

    fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Self {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    pub fn add(self, right: Expr) -> Self {
        self.binary(BinaryOp::Add, right)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn where_by(self, predicate: Lambda) -> Self {
        Expr::call(Method::Where, vec![self, Expr::Quote(predicate)])
    }

    pub fn any(self) -> Self {
        Expr::call(Method::Any, vec![self])
    }

    pub fn any_by(self, predicate: Lambda) -> Self {
        Expr::call(Method::Any, vec![self, Expr::Quote(predicate)])
    }

    pub fn count(self) -> Self {
        Expr::call(Method::Count, vec![self])
    }

    pub fn count_by(self, predicate: Lambda) -> Self {
        Expr::call(Method::Count, vec![self, Expr::Quote(predicate)])
    }

    pub fn first(self) -> Self {
        Expr::call(Method::First, vec![self])
    }

    pub fn first_by(self, predicate: Lambda) -> Self {
        Expr::call(Method::First, vec![self, Expr::Quote(predicate)])
    }

    pub fn first_or_default(self) -> Self {
        Expr::call(Method::FirstOrDefault, vec![self])
    }

    pub fn first_or_default_by(self, predicate: Lambda) -> Self {
        Expr::call(Method::FirstOrDefault, vec![self, Expr::Quote(predicate)])
    }

    pub fn take(self, count: i64) -> Self {
        Expr::call(Method::Take, vec![self, Expr::lit(count)])
    }

    /// Rebuild this node with every direct child passed through `f`.
    pub fn map_children<F>(self, mut f: F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        Ok(match self {
            Expr::Constant(_) | Expr::Parameter(_) => self,
            Expr::Member { target, field } => Expr::Member {
                target: Box::new(f(*target)?),
                field,
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(f(*operand)?),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
            },
            Expr::Quote(lambda) => Expr::Quote(Lambda {
                param: lambda.param,
                body: Box::new(f(*lambda.body)?),
            }),
            Expr::Lambda(lambda) => Expr::Lambda(Lambda {
                param: lambda.param,
                body: Box::new(f(*lambda.body)?),
            }),
            Expr::Call(call) => {
                let instance = match call.instance {
                    Some(instance) => Some(Box::new(f(*instance)?)),
                    None => None,
                };
                let args = call.args.into_iter().map(&mut f).collect::<Result<Vec<_>>>()?;
                Expr::Call(Call {
                    method: call.method,
                    instance,
                    args,
                })
            }
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(c) => write!(f, "{}", c),
            Expr::Parameter(name) => f.write_str(name),
            Expr::Member { target, field } => write!(f, "{}.{}", target, field),
            Expr::Unary { op: UnaryOp::Not, operand } => write!(f, "Not({})", operand),
            Expr::Unary { op: UnaryOp::Negate, operand } => write!(f, "-{}", operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Quote(lambda) | Expr::Lambda(lambda) => write!(f, "{}", lambda),
            Expr::Call(call) => {
                let mut args = call.args.iter();
                match &call.instance {
                    Some(instance) => write!(f, "{}.{}(", instance, call.method.name())?,
                    None => match args.next() {
                        Some(first) => write!(f, "{}.{}(", first, call.method.name())?,
                        None => write!(f, "{}(", call.method.name())?,
                    },
                }
                for (i, arg) in args.enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}
