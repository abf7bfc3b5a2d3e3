// instance.rs — One compiled expression plus the variable references it owns
//
// An instance is the unit the node caches: compiled once from the source
// text, then bound and evaluated per request. References are partitioned
// into externals (context and attribute) and parameters so each bind step
// touches only its own set.
//
// Preconditions: the parameter table is the one of the owning node's
//                current configuration.
// Postconditions: `refs[slot]` is the reference for `VarSlot(slot)`.
// Failure modes: compile-time `ConfigError`, per-request `BindError`.
// Side effects: stateful built-ins advance the instance's `EvalState`.

use thiserror::Error;

use crate::compile::{self, CompiledExpr};
use crate::diag::Diagnostic;
use crate::eval::{self, EvalState, Scope};
use crate::globals::{InvocationContext, RenderOptions};
use crate::id::{ContextId, VarSlot};
use crate::value::{Value, Vec3};
use crate::vars::{BindError, DuplicateName, ParamTable, Resolver, VariableReference};

/// A configuration problem that invalidates the node until its next rebuild.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateName),
    #[error("invalid expression ({})", first_message(.diagnostics))]
    Compile { diagnostics: Vec<Diagnostic> },
}

fn first_message(diagnostics: &[Diagnostic]) -> &str {
    diagnostics
        .first()
        .map_or("no diagnostics", |d| d.message.as_str())
}

#[derive(Debug)]
pub struct ExpressionInstance {
    compiled: CompiledExpr,
    refs: Vec<VariableReference>,
    externals: Vec<usize>,
    params: Vec<usize>,
    bound_context: Option<ContextId>,
    state: EvalState,
    owner: Option<usize>,
}

impl ExpressionInstance {
    /// Compile `source`, resolving every free variable once. `owner` pins the
    /// instance to one worker; binds from any other worker are refused.
    pub fn compile(
        source: &str,
        params: &ParamTable,
        options: &RenderOptions,
        owner: Option<usize>,
    ) -> Result<Self, ConfigError> {
        let mut resolver = Resolver::new(params, options);
        let compiled = compile::compile(source, &mut resolver)
            .map_err(|diagnostics| ConfigError::Compile { diagnostics })?;
        let refs = resolver.into_refs();

        let (externals, params): (Vec<usize>, Vec<usize>) =
            (0..refs.len()).partition(|&i| refs[i].is_external());

        Ok(ExpressionInstance {
            compiled,
            refs,
            externals,
            params,
            bound_context: None,
            state: EvalState::default(),
            owner,
        })
    }

    pub fn is_constant(&self) -> bool {
        self.compiled.is_constant()
    }

    pub fn is_thread_safe(&self) -> bool {
        self.compiled.is_thread_safe()
    }

    pub fn uses_variable(&self, name: &str) -> bool {
        self.compiled.uses_variable(name)
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn bound_context(&self) -> Option<ContextId> {
        self.bound_context
    }

    /// Any context or attribute reference was resolved.
    pub fn has_externals(&self) -> bool {
        !self.externals.is_empty()
    }

    pub fn references(&self) -> &[VariableReference] {
        &self.refs
    }

    /// Bind context and attribute references to `ctx`. A second call with
    /// the same context id is a no-op; the first failing reference aborts
    /// and leaves the instance unbound.
    pub fn bind_externals(&mut self, ctx: &dyn InvocationContext) -> Result<(), BindError> {
        if let Some(owner) = self.owner {
            let requested = ctx.thread_index();
            if requested != owner {
                return Err(BindError::ForeignThread { owner, requested });
            }
        }
        let id = ctx.id();
        if self.bound_context == Some(id) {
            return Ok(());
        }
        self.bound_context = None;
        for &i in &self.externals {
            self.refs[i].bind(ctx)?;
        }
        self.bound_context = Some(id);
        Ok(())
    }

    /// Snapshot parameter values from this request's arrays.
    pub fn bind_params(&mut self, floats: &[f32], vectors: &[Vec3]) -> Result<(), BindError> {
        if self.bound_context.is_none() {
            return Err(BindError::ParamsBeforeExternals);
        }
        for &i in &self.params {
            if let VariableReference::Param(p) = &mut self.refs[i] {
                p.bind_params(floats, vectors);
            }
        }
        Ok(())
    }

    /// Evaluate against the bound context.
    pub fn evaluate(&mut self, ctx: &dyn InvocationContext) -> Vec3 {
        let mut scope = BoundScope {
            refs: &self.refs,
            ctx,
        };
        eval::evaluate(&self.compiled, &mut scope, &mut self.state).to_vec3()
    }

    /// Evaluate with no binding at all; every free variable reads zero.
    /// Used once at rebuild for constant expressions.
    pub fn evaluate_unbound(&mut self) -> Vec3 {
        eval::evaluate(&self.compiled, &mut Unbound, &mut self.state).to_vec3()
    }

    /// Evaluate without touching the instance: parameters are read straight
    /// from the request's arrays and external references read zero. Only
    /// sound for thread-safe instances, which never touch `EvalState`.
    pub fn evaluate_detached(&self, floats: &[f32], vectors: &[Vec3]) -> Vec3 {
        let mut scope = DetachedScope {
            refs: &self.refs,
            floats,
            vectors,
        };
        let mut state = EvalState::default();
        eval::evaluate(&self.compiled, &mut scope, &mut state).to_vec3()
    }
}

// ── Scopes ──────────────────────────────────────────────────────────────────

struct BoundScope<'a> {
    refs: &'a [VariableReference],
    ctx: &'a dyn InvocationContext,
}

impl Scope for BoundScope<'_> {
    fn variable(&mut self, slot: VarSlot) -> Value {
        self.refs
            .get(slot.index())
            .map_or(Value::ZERO, |r| r.evaluate(self.ctx))
    }
}

struct DetachedScope<'a> {
    refs: &'a [VariableReference],
    floats: &'a [f32],
    vectors: &'a [Vec3],
}

impl Scope for DetachedScope<'_> {
    fn variable(&mut self, slot: VarSlot) -> Value {
        match self.refs.get(slot.index()) {
            Some(VariableReference::Param(p)) => p.read(self.floats, self.vectors),
            Some(r) => Value::zero_of(r.var_type()),
            None => Value::ZERO,
        }
    }
}

struct Unbound;

impl Scope for Unbound {
    fn variable(&mut self, _slot: VarSlot) -> Value {
        Value::ZERO
    }
}
