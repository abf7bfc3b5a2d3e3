// Snapshot tests: lock the text of node summaries, diagnostics and shading
// errors. These strings end up in host logs, so changes should be deliberate.
//
// Snapshots are inline; run `cargo insta review` after intentional changes.

use seexpr::globals::{GlobalField, GlobalValue};
use seexpr::{NodeConfig, NodeParams, RenderOptions, ShaderGlobals, ShaderNode, Vec3};

fn build(name: &str, params: NodeParams) -> NodeConfig {
    NodeConfig::build(name, &params, &RenderOptions::with_threads(2))
}

fn strict(expression: &str) -> NodeParams {
    NodeParams {
        stop_on_error: true,
        ..NodeParams::with_expression(expression)
    }
}

// ── Summaries ───────────────────────────────────────────────────────────────

#[test]
fn constant_summary() {
    let c = build("k", NodeParams::with_expression("1.0 + 2.0"));
    insta::assert_snapshot!(c.summary().to_string(), @r"
node: k
classification: constant (3, 3, 3)
");
}

#[test]
fn per_thread_summary() {
    let params = NodeParams {
        fparam_name: vec!["gain".into()],
        fparam_value: vec![2.0],
        links: vec!["fparam_value[0]".into()],
        ..NodeParams::with_expression("$sg::u * $gain")
    };
    let c = build("shade", params);
    insta::assert_snapshot!(c.summary().to_string(), @r"
node: shade
classification: variable (per-thread)
thread safe: true
context dependent: true
variables: u, gain
");
}

#[test]
fn guarded_summary() {
    let c = build("noisy", NodeParams::with_expression("rand()"));
    insta::assert_snapshot!(c.summary().to_string(), @r"
node: noisy
classification: variable (shared-guarded)
thread safe: false
context dependent: false
warning[W0402]: expression is not thread safe
");
}

#[test]
fn count_mismatch_summary() {
    let params = NodeParams {
        fparam_name: vec!["a".into(), "b".into()],
        fparam_value: vec![1.0],
        ..NodeParams::with_expression("$a + $b")
    };
    let c = build("short", params);
    insta::assert_snapshot!(c.summary().to_string(), @r"
node: short
classification: variable (shared-unguarded)
thread safe: true
context dependent: false
variables: a, b
warning[W0401]: more float param variable names than values, missing values read as 0
");
}

// ── Invalid configurations ──────────────────────────────────────────────────

#[test]
fn unknown_variable_summary() {
    let c = build("bad", NodeParams::with_expression("$foo * 2"));
    insta::assert_snapshot!(c.summary().to_string(), @r"
node: bad
classification: invalid
error[E0201]: unknown variable 'foo'
  at 0..4: $foo
");
}

#[test]
fn duplicate_name_diagnostic() {
    let params = NodeParams {
        fparam_name: vec!["k".into()],
        vparam_name: vec!["k".into()],
        ..NodeParams::with_expression("$k")
    };
    let c = build("dup", params);
    insta::assert_snapshot!(c.diagnostics()[0].to_string(), @r"
error[E0301]: variable name already in use 'k'
  hint: parameter names must be unique across fparam_name and vparam_name
");
}

#[test]
fn call_diagnostics() {
    let c = build("calls", NodeParams::with_expression("noise($sg::P) + sqrt(1, 2)"));
    let text: Vec<String> = c.diagnostics().iter().map(|d| d.to_string()).collect();
    insta::assert_snapshot!(text.join("\n"), @r"
error[E0203]: unknown function 'noise'
error[E0204]: 'sqrt' takes 1 argument(s), found 2
");
}

// ── Shading errors ──────────────────────────────────────────────────────────

#[test]
fn invalid_expression_error() {
    let node = ShaderNode::new("bad", strict("$foo"), &RenderOptions::with_threads(1));
    let err = node.shade(&ShaderGlobals::new(1, 0)).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"node 'bad': invalid expression");
}

#[test]
fn bind_error() {
    let node = ShaderNode::new("lit", strict("$sg::Li"), &RenderOptions::with_threads(1));
    let ctx = ShaderGlobals::new(1, 0).with(GlobalField::U, GlobalValue::Float(0.5));
    let err = node.shade(&ctx).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"node 'lit': could not bind external parameters: could not bind shader global 'Li'"
    );
    assert_eq!(err.fallback, Vec3::new(1.0, 0.0, 0.0));
}

#[test]
fn missing_attribute_error() {
    let node = ShaderNode::new("attr", strict("$user::Cd"), &RenderOptions::with_threads(1));
    let err = node.shade(&ShaderGlobals::new(1, 0)).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"node 'attr': could not bind external parameters: could not bind user attribute 'Cd'"
    );
}

#[test]
fn worker_outside_table_error() {
    let node = ShaderNode::new("pt", strict("$sg::u"), &RenderOptions::with_threads(2));
    let ctx = ShaderGlobals::new(1, 7).with(GlobalField::U, GlobalValue::Float(0.5));
    let err = node.shade(&ctx).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"node 'pt': worker 7 outside the 2-slot instance table");
}
