//! Recognition of federatable call shapes.
//!
//! Only a small, fixed set of shapes over a multi-source queryable (one with
//! more than one source) is recognized:
//!
//! ```text
//! ms.Where(p)
//! ms.{Any|Count|First|FirstOrDefault}([p])
//! ms.Where(p1).{Where|Any|Count|First|FirstOrDefault}([p2])
//! ms.Take(n)
//! ms.Where(p).Take(n)
//! ```
//!
//! Predicates must be quoted lambdas and `n` a non-negative integer literal.
//! Everything else is left to the default traversal.

use crate::query::expr::{Call, Constant, Expr, Lambda, Method};
use crate::storage::{MultiSourceQueryable, Queryable};
use crate::types::Value;
use std::fmt;
use std::sync::Arc;

/// Terminal operation of a matched shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOp {
    Where,
    Any,
    Count,
    First,
    FirstOrDefault,
    Take(usize),
}

impl fmt::Display for TerminalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalOp::Where => f.write_str("Where"),
            TerminalOp::Any => f.write_str("Any"),
            TerminalOp::Count => f.write_str("Count"),
            TerminalOp::First => f.write_str("First"),
            TerminalOp::FirstOrDefault => f.write_str("FirstOrDefault"),
            TerminalOp::Take(n) => write!(f, "Take({})", n),
        }
    }
}

/// Filters collected from a matched call chain, applied one after another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSet(Vec<Lambda>);

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, predicate: Lambda) {
        self.0.push(predicate);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lambda> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Lambda>> for PredicateSet {
    fn from(predicates: Vec<Lambda>) -> Self {
        Self(predicates)
    }
}

impl Extend<Lambda> for PredicateSet {
    fn extend<T: IntoIterator<Item = Lambda>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl fmt::Display for PredicateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, predicate) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ANDALSO ")?;
            }
            write!(f, "{}", predicate)?;
        }
        Ok(())
    }
}

/// A recognized shape: what to run, over which sources, with which filters.
#[derive(Debug, Clone)]
pub struct FederatedCall {
    pub op: TerminalOp,
    pub sources: Vec<Arc<dyn Queryable>>,
    pub predicates: PredicateSet,
}

fn multi_source(expr: &Expr) -> Option<&MultiSourceQueryable> {
    match expr {
        Expr::Constant(Constant::MultiSource(ms)) if ms.is_federated() => Some(ms),
        _ => None,
    }
}

fn quoted(expr: &Expr) -> Option<&Lambda> {
    match expr {
        Expr::Quote(lambda) => Some(lambda),
        _ => None,
    }
}

/// `ms` or `ms.Where(p)`: the sources and the optional inner predicate.
fn source_chain(expr: &Expr) -> Option<(&MultiSourceQueryable, Option<&Lambda>)> {
    if let Some(ms) = multi_source(expr) {
        return Some((ms, None));
    }
    match expr {
        Expr::Call(inner)
            if inner.is_static() && inner.method == Method::Where && inner.args.len() == 2 =>
        {
            let ms = multi_source(&inner.args[0])?;
            let predicate = quoted(&inner.args[1])?;
            Some((ms, Some(predicate)))
        }
        _ => None,
    }
}

fn take_count(expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Constant(Constant::Value(Value::Int(n))) if *n >= 0 => usize::try_from(*n).ok(),
        _ => None,
    }
}

/// Recognize a federatable call. `None` means the call is not one of the
/// supported shapes and must be traversed normally.
pub fn match_call(call: &Call) -> Option<FederatedCall> {
    if !call.is_static() {
        return None;
    }

    let op = match call.method {
        Method::Where => TerminalOp::Where,
        Method::Any => TerminalOp::Any,
        Method::Count => TerminalOp::Count,
        Method::First => TerminalOp::First,
        Method::FirstOrDefault => TerminalOp::FirstOrDefault,
        Method::Take => {
            if call.args.len() != 2 {
                return None;
            }
            TerminalOp::Take(take_count(&call.args[1])?)
        }
        _ => return None,
    };

    let (ms, inner) = source_chain(call.args.first()?)?;

    let outer = match (op, call.args.len()) {
        (TerminalOp::Take(_), _) => None,
        (_, 1) => None,
        (_, 2) => Some(quoted(&call.args[1])?),
        _ => return None,
    };
    // Where needs its own predicate; the bare `ms.Where()` shape does not exist
    if op == TerminalOp::Where && outer.is_none() {
        return None;
    }

    let mut predicates = PredicateSet::new();
    predicates.extend(inner.cloned());
    predicates.extend(outer.cloned());

    Some(FederatedCall {
        op,
        sources: ms.sources().to_vec(),
        predicates,
    })
}
