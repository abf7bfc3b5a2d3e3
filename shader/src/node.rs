// node.rs — Node parameters, classification and the instance cache
//
// A rebuild turns the node's parameters into a `NodeConfig`:
//
//   parameter table ──► compile ──► constant?  ──► cached value, no instances
//                                   │
//                                   └─ variable ──► not thread safe  → SharedGuarded
//                                                   context-dependent → PerThread
//                                                   otherwise         → SharedUnguarded
//
// A config is never re-classified in place: every update builds a new one
// and drops the old config together with all of its instances.
//
// Preconditions: `options.threads` is the size of the host's worker pool.
// Postconditions: the per-thread table, when used, is fully allocated before
//                 the config is handed to any evaluator.
// Failure modes: duplicate names and compile errors yield an invalid config.
// Side effects: logs through `tracing`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use chumsky::span::Span as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::dispatch::{self, ShadeError};
use crate::globals::{InvocationContext, RenderOptions};
use crate::instance::{ConfigError, ExpressionInstance};
use crate::value::Vec3;
use crate::vars::{ParamKind, ParamTable};

// ── Parameters ──────────────────────────────────────────────────────────────

/// The node's user-facing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeParams {
    pub expression: String,
    pub fparam_name: Vec<String>,
    pub fparam_value: Vec<f32>,
    pub vparam_name: Vec<String>,
    pub vparam_value: Vec<Vec3>,
    /// Parameter paths driven by an upstream computation, e.g.
    /// `fparam_value[0]` or `vparam_value[1].y`.
    pub links: Vec<String>,
    pub stop_on_error: bool,
    pub error_value: Vec3,
}

impl Default for NodeParams {
    fn default() -> Self {
        NodeParams {
            expression: String::new(),
            fparam_name: Vec::new(),
            fparam_value: Vec::new(),
            vparam_name: Vec::new(),
            vparam_value: Vec::new(),
            links: Vec::new(),
            stop_on_error: false,
            error_value: Vec3::new(1.0, 0.0, 0.0),
        }
    }
}

impl NodeParams {
    pub fn with_expression(expression: impl Into<String>) -> Self {
        NodeParams {
            expression: expression.into(),
            ..Default::default()
        }
    }

    pub fn is_linked(&self, path: &str) -> bool {
        self.links.iter().any(|l| l == path)
    }

    /// Whether the value at `index` of the `kind` array is computed upstream.
    fn drives_upstream(&self, kind: ParamKind, index: usize) -> bool {
        match kind {
            ParamKind::Float => self.is_linked(&format!("fparam_value[{index}]")),
            ParamKind::Vector => {
                let base = format!("vparam_value[{index}]");
                self.is_linked(&base)
                    || ["x", "y", "z"]
                        .iter()
                        .any(|c| self.is_linked(&format!("{base}.{c}")))
            }
        }
    }
}

// ── Classification ──────────────────────────────────────────────────────────

/// How a variable expression's instances are shared between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One instance behind a lock; every request serializes on it.
    SharedGuarded,
    /// One instance read by every worker without locking.
    SharedUnguarded,
    /// One instance per worker, created on that worker's first request.
    PerThread,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Invalid,
    Constant(Vec3),
    Variable(Strategy),
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::SharedGuarded => "shared-guarded",
            Strategy::SharedUnguarded => "shared-unguarded",
            Strategy::PerThread => "per-thread",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Invalid => f.write_str("invalid"),
            Classification::Constant(v) => write!(f, "constant {v}"),
            Classification::Variable(s) => write!(f, "variable ({s})"),
        }
    }
}

pub(crate) enum InstanceCache {
    None,
    Guarded(Mutex<ExpressionInstance>),
    Shared(ExpressionInstance),
    /// Slot `i` is only ever locked by worker `i`, so its lock is uncontended.
    PerThread(Box<[Mutex<Option<ExpressionInstance>>]>),
}

// ── NodeConfig ──────────────────────────────────────────────────────────────

pub struct NodeConfig {
    node: String,
    source: String,
    params: ParamTable,
    options: RenderOptions,
    classification: Classification,
    thread_safe: bool,
    context_dependent: bool,
    variables: Vec<String>,
    cache: InstanceCache,
    stop_on_error: bool,
    error_value: Vec3,
    diagnostics: Vec<Diagnostic>,
    lazy_instances: AtomicUsize,
}

impl NodeConfig {
    /// Rebuild from scratch. Never fails: problems produce an invalid
    /// config whose evaluations return the error value.
    pub fn build(node: &str, params: &NodeParams, options: &RenderOptions) -> NodeConfig {
        let mut config = NodeConfig {
            node: node.to_string(),
            source: params.expression.clone(),
            params: ParamTable::default(),
            options: options.clone(),
            classification: Classification::Invalid,
            thread_safe: false,
            context_dependent: false,
            variables: Vec::new(),
            cache: InstanceCache::None,
            stop_on_error: params.stop_on_error,
            error_value: params.error_value,
            diagnostics: Vec::new(),
            lazy_instances: AtomicUsize::new(0),
        };

        match config.classify(params) {
            Ok(()) => {}
            Err(ConfigError::Duplicate(dup)) => {
                warn!(node, name = %dup.name, "variable name already in use");
                config.diagnostics.push(
                    Diagnostic::detached(DiagLevel::Error, dup.to_string())
                        .with_code(codes::E0301)
                        .with_hint("parameter names must be unique across fparam_name and vparam_name"),
                );
            }
            Err(err @ ConfigError::Compile { .. }) => {
                warn!(node, "{err}");
                if let ConfigError::Compile { diagnostics } = err {
                    config.diagnostics.extend(diagnostics);
                }
            }
        }
        config
    }

    fn classify(&mut self, params: &NodeParams) -> Result<(), ConfigError> {
        self.params = ParamTable::build(&params.fparam_name, &params.vparam_name)?;
        let mut instance =
            ExpressionInstance::compile(&self.source, &self.params, &self.options, None)?;
        self.variables = instance
            .references()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        self.thread_safe = instance.is_thread_safe();

        if instance.is_constant() {
            self.classification = Classification::Constant(instance.evaluate_unbound());
            return Ok(());
        }

        self.check_counts(params);
        self.context_dependent = instance.has_externals()
            || self.params.iter().any(|(name, kind, index)| {
                params.drives_upstream(kind, index) && instance.uses_variable(name)
            });

        let strategy = if !self.thread_safe {
            warn!(node = %self.node, "expression is not thread safe");
            self.diagnostics.push(
                Diagnostic::detached(DiagLevel::Warning, "expression is not thread safe")
                    .with_code(codes::W0402),
            );
            self.cache = InstanceCache::Guarded(Mutex::new(instance));
            Strategy::SharedGuarded
        } else if !self.context_dependent {
            self.cache = InstanceCache::Shared(instance);
            Strategy::SharedUnguarded
        } else {
            let workers = self.options.worker_count();
            self.cache = InstanceCache::PerThread((0..workers).map(|_| Mutex::new(None)).collect());
            Strategy::PerThread
        };
        match strategy {
            Strategy::PerThread => debug!(node = %self.node, "create expression object per thread"),
            _ => debug!(node = %self.node, "use same expression object for all threads"),
        }
        self.classification = Classification::Variable(strategy);
        Ok(())
    }

    fn check_counts(&mut self, params: &NodeParams) {
        let mismatch = |names: usize, values: usize, what: &str, zero: &str| {
            if names > values {
                Some(format!(
                    "more {what} param variable names than values, missing values read as {zero}"
                ))
            } else if names < values {
                Some(format!(
                    "more {what} param variable values than names, extra values are ignored"
                ))
            } else {
                None
            }
        };
        let messages = [
            mismatch(params.fparam_name.len(), params.fparam_value.len(), "float", "0"),
            mismatch(params.vparam_name.len(), params.vparam_value.len(), "vector", "(0, 0, 0)"),
        ];
        for message in messages.into_iter().flatten() {
            warn!(node = %self.node, "{message}");
            self.diagnostics
                .push(Diagnostic::detached(DiagLevel::Warning, message).with_code(codes::W0401));
        }
    }

    /// Compile a fresh instance owned by `worker`.
    pub(crate) fn instantiate(&self, worker: usize) -> Result<ExpressionInstance, ConfigError> {
        let instance =
            ExpressionInstance::compile(&self.source, &self.params, &self.options, Some(worker))?;
        self.lazy_instances.fetch_add(1, Ordering::Relaxed);
        Ok(instance)
    }

    pub(crate) fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    pub fn name(&self) -> &str {
        &self.node
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn strategy(&self) -> Option<Strategy> {
        match self.classification {
            Classification::Variable(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.classification != Classification::Invalid
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.classification, Classification::Constant(_))
    }

    pub fn constant_value(&self) -> Option<Vec3> {
        match self.classification {
            Classification::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub fn is_context_dependent(&self) -> bool {
        self.context_dependent
    }

    /// Free variables in slot order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    pub fn error_value(&self) -> Vec3 {
        self.error_value
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Instances created by evaluation requests since this rebuild.
    pub fn lazy_instances(&self) -> usize {
        self.lazy_instances.load(Ordering::Relaxed)
    }

    /// Instances currently held by the cache.
    pub fn live_instances(&self) -> usize {
        match &self.cache {
            InstanceCache::None => 0,
            InstanceCache::Guarded(_) | InstanceCache::Shared(_) => 1,
            InstanceCache::PerThread(slots) => slots.iter().filter(|s| s.lock().is_some()).count(),
        }
    }

    /// Size of the per-thread table, zero for the other strategies.
    pub fn worker_slots(&self) -> usize {
        match &self.cache {
            InstanceCache::PerThread(slots) => slots.len(),
            _ => 0,
        }
    }

    pub fn summary(&self) -> NodeSummary<'_> {
        NodeSummary { config: self }
    }

    /// Drop every instance and leave the config invalid.
    fn release(&mut self) {
        self.cache = InstanceCache::None;
        self.classification = Classification::Invalid;
        *self.lazy_instances.get_mut() = 0;
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("node", &self.node)
            .field("source", &self.source)
            .field("classification", &self.classification)
            .field("thread_safe", &self.thread_safe)
            .field("context_dependent", &self.context_dependent)
            .field("variables", &self.variables)
            .field("live_instances", &self.live_instances())
            .finish()
    }
}

/// Human-readable report of a node's classification.
pub struct NodeSummary<'a> {
    config: &'a NodeConfig,
}

impl fmt::Display for NodeSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.config;
        writeln!(f, "node: {}", c.node)?;
        writeln!(f, "classification: {}", c.classification)?;
        if c.is_valid() && !c.is_constant() {
            writeln!(f, "thread safe: {}", c.thread_safe)?;
            writeln!(f, "context dependent: {}", c.context_dependent)?;
        }
        if !c.variables.is_empty() {
            writeln!(f, "variables: {}", c.variables.join(", "))?;
        }
        for d in &c.diagnostics {
            writeln!(f, "{d}")?;
            if let Some(text) = d.snippet(&c.source) {
                writeln!(f, "  at {}..{}: {text}", d.span.start(), d.span.end())?;
            }
        }
        Ok(())
    }
}

// ── ShaderNode ──────────────────────────────────────────────────────────────

/// A shader node as the host sees it: rebuilt on parameter change,
/// evaluated per shading sample.
#[derive(Debug)]
pub struct ShaderNode {
    params: NodeParams,
    config: NodeConfig,
}

impl ShaderNode {
    pub fn new(name: &str, params: NodeParams, options: &RenderOptions) -> Self {
        let config = NodeConfig::build(name, &params, options);
        ShaderNode { params, config }
    }

    /// Replace the parameters and rebuild. Taking `&mut self` means no
    /// evaluation can overlap the rebuild.
    pub fn update(&mut self, params: NodeParams, options: &RenderOptions) {
        // old instances and the guard go before the new compile
        self.config.release();
        let name = self.config.name().to_string();
        self.config = NodeConfig::build(&name, &params, options);
        self.params = params;
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    /// Evaluate with caller-supplied parameter arrays.
    pub fn evaluate(
        &self,
        ctx: &dyn InvocationContext,
        floats: &[f32],
        vectors: &[Vec3],
    ) -> Result<Vec3, ShadeError> {
        dispatch::evaluate(&self.config, ctx, floats, vectors)
    }

    /// Evaluate with the node's own parameter values.
    pub fn shade(&self, ctx: &dyn InvocationContext) -> Result<Vec3, ShadeError> {
        self.evaluate(ctx, &self.params.fparam_value, &self.params.vparam_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::{GlobalField, GlobalValue, ShaderGlobals};

    fn params(expression: &str, floats: &[&str], vectors: &[&str]) -> NodeParams {
        NodeParams {
            expression: expression.to_string(),
            fparam_name: floats.iter().map(|s| s.to_string()).collect(),
            fparam_value: vec![1.0; floats.len()],
            vparam_name: vectors.iter().map(|s| s.to_string()).collect(),
            vparam_value: vec![Vec3::splat(1.0); vectors.len()],
            ..Default::default()
        }
    }

    fn build(p: &NodeParams) -> NodeConfig {
        NodeConfig::build("test", p, &RenderOptions::with_threads(4))
    }

    #[test]
    fn default_error_value_is_red() {
        assert_eq!(NodeParams::default().error_value, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn constant_classification() {
        let c = build(&params("1.0 + 2.0", &[], &[]));
        assert_eq!(c.classification(), Classification::Constant(Vec3::splat(3.0)));
        assert_eq!(c.live_instances(), 0);
    }

    #[test]
    fn duplicate_name_invalidates() {
        let c = build(&params("1", &["k"], &["k"]));
        assert_eq!(c.classification(), Classification::Invalid);
        assert_eq!(c.diagnostics()[0].code, Some(codes::E0301));
    }

    #[test]
    fn unknown_variable_invalidates() {
        let c = build(&params("$foo", &[], &[]));
        assert!(!c.is_valid());
        assert_eq!(c.diagnostics()[0].code, Some(codes::E0201));
    }

    #[test]
    fn fixed_params_share_one_instance() {
        let c = build(&params("$a * 2", &["a"], &[]));
        assert_eq!(c.strategy(), Some(Strategy::SharedUnguarded));
        assert!(!c.is_context_dependent());
        assert_eq!(c.live_instances(), 1);
    }

    #[test]
    fn context_variable_goes_per_thread() {
        let c = build(&params("$sg::u", &[], &[]));
        assert_eq!(c.strategy(), Some(Strategy::PerThread));
        assert_eq!(c.worker_slots(), 4);
        assert_eq!(c.live_instances(), 0);
    }

    #[test]
    fn release_drops_instances() {
        let mut node = ShaderNode::new("n", params("$sg::v", &[], &[]), &RenderOptions::default());
        let ctx = ShaderGlobals::new(1, 0).with(GlobalField::V, GlobalValue::Float(0.5));
        assert_eq!(node.shade(&ctx).unwrap(), Vec3::splat(0.5));
        assert_eq!(node.config().live_instances(), 1);

        node.config.release();
        assert_eq!(node.config().live_instances(), 0);
        assert_eq!(node.config().lazy_instances(), 0);
        assert!(!node.config().is_valid());
        assert_eq!(node.config().name(), "n");
    }

    #[test]
    fn linked_vector_component_is_context_dependent() {
        let mut p = params("$c", &[], &["c"]);
        p.links.push("vparam_value[0].y".into());
        let c = build(&p);
        assert!(c.is_context_dependent());
        assert_eq!(c.strategy(), Some(Strategy::PerThread));
    }

    #[test]
    fn link_on_unused_param_is_ignored() {
        let mut p = params("$a", &["a", "b"], &[]);
        p.links.push("fparam_value[1]".into());
        let c = build(&p);
        assert!(!c.is_context_dependent());
    }

    #[test]
    fn thread_unsafe_forces_guard() {
        let c = build(&params("$sg::u * rand()", &[], &[]));
        assert_eq!(c.strategy(), Some(Strategy::SharedGuarded));
        assert!(c.is_context_dependent());
        assert!(c
            .diagnostics()
            .iter()
            .any(|d| d.code == Some(codes::W0402)));
    }

    #[test]
    fn count_mismatch_warns() {
        let mut p = params("$a", &["a"], &[]);
        p.fparam_value.clear();
        let c = build(&p);
        assert!(c.is_valid());
        assert_eq!(c.diagnostics()[0].code, Some(codes::W0401));
    }

    #[test]
    fn update_rebuilds() {
        let mut node = ShaderNode::new("n", params("1", &[], &[]), &RenderOptions::default());
        assert!(node.config().is_constant());
        node.update(params("$sg::v", &[], &[]), &RenderOptions::default());
        assert_eq!(node.config().strategy(), Some(Strategy::PerThread));
        assert_eq!(node.config().worker_slots(), 1);
        assert_eq!(node.config().name(), "n");
    }

    #[test]
    fn params_parse_from_json() {
        let p: NodeParams = serde_json::from_str(
            r#"{ "expression": "$k", "fparam_name": ["k"], "fparam_value": [0.5] }"#,
        )
        .unwrap();
        assert_eq!(p.fparam_value, vec![0.5]);
        assert_eq!(p.error_value, Vec3::new(1.0, 0.0, 0.0));
        assert!(!p.stop_on_error);
    }
}
