// dispatch.rs — Per-request evaluation entry point
//
// Picks the instance the node's strategy calls for, binds it to the
// request, evaluates, and folds every failure into the node's error value.
// With `stop_on_error` set a failure is also reported as a hard error.
//
// Preconditions: `config` is not being rebuilt (the host orders rebuilds
//                before evaluations).
// Postconditions: any lock taken here is released before returning.
// Failure modes: invalid config, bind failure, instance creation failure.
// Side effects: may create the calling worker's instance; logs on hard errors.

use thiserror::Error;
use tracing::error;

use crate::globals::InvocationContext;
use crate::instance::{ConfigError, ExpressionInstance};
use crate::node::{InstanceCache, NodeConfig};
use crate::value::Vec3;
use crate::vars::BindError;

/// Why a request fell back to the error value.
#[derive(Debug, Clone, Error)]
pub enum FailureReason {
    #[error("invalid expression")]
    InvalidExpression,
    #[error("could not bind external parameters: {0}")]
    Bind(#[from] BindError),
    #[error("could not create expression object: {0}")]
    Instantiate(#[from] ConfigError),
    #[error("worker {worker} outside the {workers}-slot instance table")]
    WorkerOutOfRange { worker: usize, workers: usize },
    #[error("expression is null or invalid")]
    MissingInstance,
}

/// A request-terminating failure, raised only when the node has
/// `stop_on_error` set.
#[derive(Debug, Clone, Error)]
#[error("node '{node}': {reason}")]
pub struct ShadeError {
    pub node: String,
    pub reason: FailureReason,
    /// The value the request would have produced without `stop_on_error`.
    pub fallback: Vec3,
}

/// Evaluate `config` for one shading request.
pub fn evaluate(
    config: &NodeConfig,
    ctx: &dyn InvocationContext,
    floats: &[f32],
    vectors: &[Vec3],
) -> Result<Vec3, ShadeError> {
    if !config.is_valid() {
        return fail(config, FailureReason::InvalidExpression);
    }
    if let Some(value) = config.constant_value() {
        return Ok(value);
    }

    let outcome = match config.cache() {
        InstanceCache::Guarded(guard) => {
            let mut instance = guard.lock();
            run(&mut instance, ctx, floats, vectors)
        }
        InstanceCache::Shared(instance) => Ok(instance.evaluate_detached(floats, vectors)),
        InstanceCache::PerThread(slots) => {
            let worker = ctx.thread_index();
            match slots.get(worker) {
                Some(slot) => {
                    let mut slot = slot.lock();
                    per_thread(config, &mut slot, worker, ctx, floats, vectors)
                }
                None => Err(FailureReason::WorkerOutOfRange {
                    worker,
                    workers: slots.len(),
                }),
            }
        }
        InstanceCache::None => Err(FailureReason::MissingInstance),
    };

    // The guard, if any, was dropped with the match arm above.
    match outcome {
        Ok(value) => Ok(value),
        Err(reason) => fail(config, reason),
    }
}

fn per_thread(
    config: &NodeConfig,
    slot: &mut Option<ExpressionInstance>,
    worker: usize,
    ctx: &dyn InvocationContext,
    floats: &[f32],
    vectors: &[Vec3],
) -> Result<Vec3, FailureReason> {
    if slot.is_none() {
        *slot = Some(config.instantiate(worker)?);
    }
    match slot.as_mut() {
        Some(instance) => run(instance, ctx, floats, vectors),
        None => Err(FailureReason::MissingInstance),
    }
}

fn run(
    instance: &mut ExpressionInstance,
    ctx: &dyn InvocationContext,
    floats: &[f32],
    vectors: &[Vec3],
) -> Result<Vec3, FailureReason> {
    instance.bind_externals(ctx)?;
    instance.bind_params(floats, vectors)?;
    Ok(instance.evaluate(ctx))
}

fn fail(config: &NodeConfig, reason: FailureReason) -> Result<Vec3, ShadeError> {
    let fallback = config.error_value();
    if config.stop_on_error() {
        error!(node = %config.name(), "{reason}");
        return Err(ShadeError {
            node: config.name().to_string(),
            reason,
            fallback,
        });
    }
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::{GlobalField, GlobalValue, RenderOptions, ShaderGlobals};
    use crate::node::NodeParams;

    fn config(expression: &str, stop_on_error: bool) -> NodeConfig {
        let params = NodeParams {
            stop_on_error,
            ..NodeParams::with_expression(expression)
        };
        NodeConfig::build("n", &params, &RenderOptions::with_threads(2))
    }

    fn sg(id: u64, worker: usize) -> ShaderGlobals {
        ShaderGlobals::new(id, worker).with(GlobalField::U, GlobalValue::Float(0.5))
    }

    #[test]
    fn invalid_returns_fallback() {
        let c = config("1 +", false);
        assert_eq!(evaluate(&c, &sg(1, 0), &[], &[]).unwrap(), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn invalid_with_stop_on_error_is_hard() {
        let c = config("1 +", true);
        let err = evaluate(&c, &sg(1, 0), &[], &[]).unwrap_err();
        assert!(matches!(err.reason, FailureReason::InvalidExpression));
        assert_eq!(err.fallback, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(err.to_string(), "node 'n': invalid expression");
    }

    #[test]
    fn constant_touches_no_instance() {
        let c = config("2", false);
        assert_eq!(evaluate(&c, &sg(1, 0), &[], &[]).unwrap(), Vec3::splat(2.0));
        assert_eq!(c.lazy_instances(), 0);
        assert_eq!(c.live_instances(), 0);
    }

    #[test]
    fn per_thread_created_once_per_worker() {
        let c = config("$sg::u", false);
        for id in 0..4 {
            assert_eq!(evaluate(&c, &sg(id, 1), &[], &[]).unwrap(), Vec3::splat(0.5));
        }
        assert_eq!(c.lazy_instances(), 1);
        assert_eq!(c.live_instances(), 1);
    }

    #[test]
    fn worker_outside_table() {
        let c = config("$sg::u", true);
        let err = evaluate(&c, &sg(1, 5), &[], &[]).unwrap_err();
        assert!(matches!(
            err.reason,
            FailureReason::WorkerOutOfRange { worker: 5, workers: 2 }
        ));
    }

    #[test]
    fn bind_failure_is_per_request() {
        let c = config("$sg::u", true);
        let missing = ShaderGlobals::new(1, 0);
        let err = evaluate(&c, &missing, &[], &[]).unwrap_err();
        assert!(matches!(err.reason, FailureReason::Bind(BindError::GlobalUnavailable { .. })));
        // the node stays usable
        assert!(c.is_valid());
        assert_eq!(evaluate(&c, &sg(2, 0), &[], &[]).unwrap(), Vec3::splat(0.5));
    }

    #[test]
    fn guarded_releases_lock_after_failure() {
        let c = config("$sg::u + rand() * 0", false);
        let missing = ShaderGlobals::new(1, 0);
        assert_eq!(
            evaluate(&c, &missing, &[], &[]).unwrap(),
            Vec3::new(1.0, 0.0, 0.0)
        );
        // a held lock would deadlock here
        assert_eq!(evaluate(&c, &sg(2, 0), &[], &[]).unwrap(), Vec3::splat(0.5));
    }
}
