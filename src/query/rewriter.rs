//! Federation rewrite of query expression trees.
//!
//! The rewriter walks a tree top-down. Call nodes matching one of the
//! federatable shapes over a multi-source queryable are executed right away
//! and replaced by a constant holding their result. Remaining multi-source
//! queryables are resolved to a single concrete queryable: the only source
//! when there is one, otherwise everything loaded into memory.
//!
//! The first queryable resolved during a pass is captured. It decides the
//! provider context used to rewrite `NewUuid()` into the provider's own id
//! function, and is reported back to the caller with the rewritten tree.

use crate::error::{Error, Result};
use crate::query::expr::{Call, Closure, Constant, Expr, Method};
use crate::query::federator::Federator;
use crate::query::matcher::{match_call, FederatedCall, PredicateSet};
use crate::query::reconcile::reconcile;
use crate::storage::{MemorySource, MultiSourceQueryable, ProviderContext, Queryable, SourceProvider};
use crate::types::ElementType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Behavior switches of a rewrite pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    /// Materialize every multi-source queryable, single-source ones included.
    pub pull_all_to_memory: bool,
    /// Write resolved queryables back into captured closure fields.
    pub persist_captured_fields: bool,
    /// Rewrite `NewUuid()` to the provider-side id function when possible.
    pub provider_functions: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            pull_all_to_memory: false,
            persist_captured_fields: true,
            provider_functions: true,
        }
    }
}

/// Queryable captured by a rewrite pass.
#[derive(Debug, Clone, Default)]
pub enum RewriteState {
    #[default]
    Idle,
    Resolved(Arc<dyn Queryable>),
}

impl RewriteState {
    /// First capture wins.
    fn capture(&mut self, queryable: &Arc<dyn Queryable>) {
        if let RewriteState::Idle = self {
            debug!(element_type = %queryable.element_type(), "Captured resolved queryable");
            *self = RewriteState::Resolved(queryable.clone());
        }
    }

    pub fn queryable(&self) -> Option<&Arc<dyn Queryable>> {
        match self {
            RewriteState::Idle => None,
            RewriteState::Resolved(queryable) => Some(queryable),
        }
    }
}

/// Output of a rewrite pass.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub expr: Expr,
    /// The first queryable resolved during the pass.
    pub resolved: Option<Arc<dyn Queryable>>,
}

/// One rewrite pass over one tree.
pub struct FederationRewriter {
    options: RewriteOptions,
    provider: Option<Arc<dyn SourceProvider>>,
    state: RewriteState,
}

impl FederationRewriter {
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            provider: None,
            state: RewriteState::Idle,
        }
    }

    /// Source provider backing `GetData` entry points.
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn rewrite(mut self, expr: Expr) -> Result<Rewritten> {
        let expr = self.visit(expr)?;
        Ok(Rewritten {
            expr,
            resolved: self.state.queryable().cloned(),
        })
    }

    fn visit(&mut self, expr: Expr) -> Result<Expr> {
        match expr {
            Expr::Call(call) => self.visit_call(call),
            Expr::Constant(Constant::MultiSource(ms)) => Ok(Expr::queryable(self.resolve(&ms)?)),
            Expr::Member { target, field } => match *target {
                Expr::Constant(Constant::Closure(closure)) => self.visit_captured(closure, field),
                target => Ok(Expr::Member {
                    target: Box::new(self.visit(target)?),
                    field,
                }),
            },
            other => other.map_children(|child| self.visit(child)),
        }
    }

    fn visit_call(&mut self, call: Call) -> Result<Expr> {
        if let Some(connection) = call.instance.as_deref().and_then(connection_of) {
            return match &call.method {
                Method::GetData(element_type) => {
                    self.visit_get_data(Some(connection), element_type, &call.args)
                }
                other => Err(Error::UnsupportedOperation(format!(
                    "Data connection method '{}' is not supported inside queries",
                    other.name()
                ))),
            };
        }

        match &call.method {
            Method::GetData(element_type) => {
                if let Some(instance) = &call.instance {
                    return Err(Error::UnsupportedOperation(format!(
                        "GetData<{}> called on '{}', which is not a data connection",
                        element_type, instance
                    )));
                }
                return self.visit_get_data(self.provider.clone(), element_type, &call.args);
            }
            Method::Facade(name) => {
                return Err(Error::UnsupportedOperation(format!(
                    "Data facade method '{}' is not supported inside queries",
                    name
                )))
            }
            Method::NewUuid if call.is_static() => {
                if let Some(context) = self.provider_context() {
                    debug!(provider = context.provider(), "Rewriting NewUuid to provider id function");
                    return Ok(Expr::instance_call(
                        Method::ProviderNewId,
                        Expr::Constant(Constant::Context(context)),
                        vec![],
                    ));
                }
            }
            _ => {}
        }

        if let Some(federated) = match_call(&call) {
            return self.federate(&federated);
        }
        Expr::Call(call).map_children(|child| self.visit(child))
    }

    fn visit_get_data(
        &mut self,
        provider: Option<Arc<dyn SourceProvider>>,
        element_type: &ElementType,
        args: &[Expr],
    ) -> Result<Expr> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Expr::Constant(Constant::Value(value)) => values.push(value.clone()),
                other => {
                    return Err(Error::UnsupportedOperation(format!(
                        "GetData<{}> overload with argument '{}' is not supported",
                        element_type, other
                    )))
                }
            }
        }
        let provider = provider.ok_or_else(|| {
            Error::Config(format!(
                "No source provider configured to resolve GetData<{}>",
                element_type
            ))
        })?;
        let ms = provider.get_data(element_type, &values)?;
        Ok(Expr::queryable(self.resolve(&ms)?))
    }

    fn visit_captured(&mut self, closure: Arc<Closure>, field: String) -> Result<Expr> {
        if let Some(Constant::MultiSource(ms)) = closure.get(&field) {
            let resolved = self.resolve(&ms)?;
            if !self.options.persist_captured_fields {
                return Ok(Expr::queryable(resolved));
            }
            debug!(field = %field, "Persisting resolved queryable into captured field");
            closure.set(&field, Constant::Queryable(resolved));
        }
        Ok(Expr::closure(closure).field(&field))
    }

    fn federate(&mut self, call: &FederatedCall) -> Result<Expr> {
        info!(op = %call.op, sources = call.sources.len(), "Federating multi-source call");
        let result = Federator::federate(call)?;
        match result.queryable() {
            Some(queryable) => self.state.capture(&queryable),
            None => {
                if let RewriteState::Idle = self.state {
                    let empty: Arc<dyn Queryable> =
                        Arc::new(MemorySource::empty(reconcile(&call.sources)?));
                    self.state.capture(&empty);
                }
            }
        }
        Ok(Expr::Constant(result.into_constant()))
    }

    fn resolve(&mut self, ms: &MultiSourceQueryable) -> Result<Arc<dyn Queryable>> {
        let resolved: Arc<dyn Queryable> = match ms.sources() {
            [single] if !self.options.pull_all_to_memory => single.clone(),
            sources => Federator::new(sources)?.load_to_memory(&PredicateSet::new())?,
        };
        debug!(
            sources = ms.len(),
            element_type = %resolved.element_type(),
            "Resolved multi-source queryable"
        );
        self.state.capture(&resolved);
        Ok(resolved)
    }

    fn provider_context(&self) -> Option<Arc<dyn ProviderContext>> {
        if !self.options.provider_functions {
            return None;
        }
        self.state.queryable().and_then(|queryable| queryable.context())
    }
}

/// The data connection a call receiver refers to: a connection constant or a
/// captured closure field holding one.
fn connection_of(receiver: &Expr) -> Option<Arc<dyn SourceProvider>> {
    match receiver {
        Expr::Constant(Constant::Connection(connection)) => Some(connection.clone()),
        Expr::Member { target, field } => match target.as_ref() {
            Expr::Constant(Constant::Closure(closure)) => match closure.get(field) {
                Some(Constant::Connection(connection)) => Some(connection),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}
