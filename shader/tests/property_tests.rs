// Property-based tests for node classification and evaluation invariants.
//
// Three categories:
// 1. Constants: literal-only expressions are constant and context-free
// 2. Invalid configs: duplicate parameter names always yield the error value
// 3. Strategies agree: shared and per-thread evaluation produce identical
//    results for the same parameter values
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use seexpr::globals::{GlobalField, GlobalValue};
use seexpr::node::Strategy as Sharing;
use seexpr::{Classification, NodeParams, RenderOptions, ShaderGlobals, ShaderNode, Vec3};

// ── Generators ──────────────────────────────────────────────────────────────

/// Arithmetic over small literals and the given leaf atoms.
fn arb_expr(atoms: Vec<&'static str>) -> impl Strategy<Value = String> {
    let literal = (-20i32..20).prop_map(|n| format!("{}", n as f32 / 4.0));
    let leaf = if atoms.is_empty() {
        literal.boxed()
    } else {
        prop_oneof![literal, proptest::sample::select(atoms).prop_map(String::from)].boxed()
    };
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} + {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} - {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} * {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} / {b})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, a, b)| format!("({c} > 0 ? {a} : {b})")),
            inner.clone().prop_map(|a| format!("abs({a})")),
            inner.prop_map(|a| format!("[{a}, 1, -{a}]")),
        ]
    })
}

fn arb_context() -> impl Strategy<Value = ShaderGlobals> {
    (1u64..1000, 0usize..4, -1.0f32..1.0).prop_map(|(id, worker, u)| {
        ShaderGlobals::new(id, worker).with(GlobalField::U, GlobalValue::Float(u))
    })
}

fn options() -> RenderOptions {
    RenderOptions::with_threads(4)
}

// ── Category 1: constants ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn literal_expressions_are_constant(
        source in arb_expr(vec![]),
        a in arb_context(),
        b in arb_context(),
    ) {
        let node = ShaderNode::new("p", NodeParams::with_expression(source.clone()), &options());
        let Classification::Constant(value) = node.config().classification() else {
            return Err(TestCaseError::fail(format!("{source} not constant")));
        };
        prop_assert_eq!(node.shade(&a).unwrap(), value);
        prop_assert_eq!(node.shade(&b).unwrap(), value);
        prop_assert_eq!(node.config().lazy_instances(), 0);
    }

    #[test]
    fn context_reads_are_never_constant(source in arb_expr(vec!["$sg::u"])) {
        prop_assume!(source.contains("$sg::u"));
        let node = ShaderNode::new("p", NodeParams::with_expression(source), &options());
        prop_assert_eq!(node.config().strategy(), Some(Sharing::PerThread));
    }
}

// ── Category 2: invalid configurations ──────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn duplicate_names_always_fall_back(
        source in arb_expr(vec!["$a", "$b"]),
        dup in prop_oneof![Just("a"), Just("b"), Just("c")],
        in_vectors in any::<bool>(),
        ctx in arb_context(),
        error in (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0),
    ) {
        let mut fnames = vec!["a".to_string(), "b".to_string()];
        let mut vnames = vec!["c".to_string()];
        if in_vectors {
            vnames.push(dup.to_string());
        } else {
            fnames.push(dup.to_string());
        }
        let params = NodeParams {
            fparam_value: vec![1.0; fnames.len()],
            vparam_value: vec![Vec3::splat(1.0); vnames.len()],
            fparam_name: fnames,
            vparam_name: vnames,
            error_value: Vec3::new(error.0, error.1, error.2),
            ..NodeParams::with_expression(source)
        };
        let node = ShaderNode::new("p", params, &options());
        prop_assert_eq!(node.config().classification(), Classification::Invalid);
        prop_assert_eq!(node.shade(&ctx).unwrap(), Vec3::new(error.0, error.1, error.2));
    }
}

// ── Category 3: strategies agree ────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn shared_and_per_thread_agree(
        body in arb_expr(vec!["$a", "$b"]),
        a in -4.0f32..4.0,
        b in -4.0f32..4.0,
        requests in proptest::collection::vec(arb_context(), 1..8),
    ) {
        let source = format!("$a + {body}");
        let base = NodeParams {
            fparam_name: vec!["a".into(), "b".into()],
            fparam_value: vec![a, b],
            ..NodeParams::with_expression(source)
        };
        let linked = NodeParams {
            links: vec!["fparam_value[0]".into()],
            ..base.clone()
        };
        let shared = ShaderNode::new("shared", base, &options());
        let per_thread = ShaderNode::new("linked", linked, &options());
        prop_assert_eq!(shared.config().strategy(), Some(Sharing::SharedUnguarded));
        prop_assert_eq!(per_thread.config().strategy(), Some(Sharing::PerThread));

        for ctx in &requests {
            prop_assert_eq!(shared.shade(ctx).unwrap(), per_thread.shade(ctx).unwrap());
        }
        prop_assert!(per_thread.config().lazy_instances() <= 4);
        prop_assert_eq!(shared.config().lazy_instances(), 0);
    }
}
