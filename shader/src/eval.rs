// eval.rs — Tree-walking evaluator for compiled expressions
//
// Free variables are read through a `Scope`, so the same compiled tree runs
// against bound variable references (guarded and per-thread instances) or
// against a detached parameter snapshot (the shared unguarded path).
//
// Preconditions: `expr` came from `compile::compile`.
// Postconditions: never panics; division by zero, out-of-range component
//                 access and NaN or infinite intermediates yield zero.
// Side effects: advances `EvalState` when the tree calls `rand`/`cycle`.

use crate::ast::{BinaryOp, UnaryOp};
use crate::compile::{CompiledExpr, Node};
use crate::id::VarSlot;
use crate::value::Value;

/// Source of free-variable values during one evaluation.
pub trait Scope {
    fn variable(&mut self, slot: VarSlot) -> Value;
}

/// Mutable state owned by one expression instance. Only the stateful
/// built-ins touch it, which is what makes them thread-unsafe.
#[derive(Debug, Clone)]
pub struct EvalState {
    rng: u64,
    tick: u64,
}

impl Default for EvalState {
    fn default() -> Self {
        EvalState {
            rng: 0x9E37_79B9_7F4A_7C15,
            tick: 0,
        }
    }
}

impl EvalState {
    /// Uniform sample in [0, 1) from an xorshift64 generator.
    pub fn next_random(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_tick(&mut self) -> u64 {
        let t = self.tick;
        self.tick = self.tick.wrapping_add(1);
        t
    }
}

pub fn evaluate<S: Scope + ?Sized>(expr: &CompiledExpr, scope: &mut S, state: &mut EvalState) -> Value {
    let mut frame = Frame {
        scope,
        state,
        locals: vec![Value::ZERO; expr.local_count],
    };
    for (slot, node) in &expr.assignments {
        let v = frame.eval(node);
        frame.locals[slot.index()] = v;
    }
    frame.eval(&expr.result)
}

struct Frame<'a, S: Scope + ?Sized> {
    scope: &'a mut S,
    state: &'a mut EvalState,
    locals: Vec<Value>,
}

impl<S: Scope + ?Sized> Frame<'_, S> {
    fn eval(&mut self, node: &Node) -> Value {
        match node {
            Node::Const(v) => v.clone(),
            Node::Var(slot) => self.scope.variable(*slot),
            Node::Local(slot) => self.locals.get(slot.index()).cloned().unwrap_or(Value::ZERO),
            Node::Vector(items) => {
                let [a, b, c] = &**items;
                Value::Vector([
                    self.eval(a).as_float(),
                    self.eval(b).as_float(),
                    self.eval(c).as_float(),
                ])
            }
            Node::Unary(op, operand) => {
                let v = self.eval(operand);
                match op {
                    UnaryOp::Neg => v.map(|x| -x),
                    UnaryOp::Not => bool_value(!v.truthy()),
                }
            }
            Node::Binary(BinaryOp::And, lhs, rhs) => {
                bool_value(self.eval(lhs).truthy() && self.eval(rhs).truthy())
            }
            Node::Binary(BinaryOp::Or, lhs, rhs) => {
                bool_value(self.eval(lhs).truthy() || self.eval(rhs).truthy())
            }
            Node::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                binary(*op, &l, &r)
            }
            Node::Ternary(cond, then, other) => {
                if self.eval(cond).truthy() {
                    self.eval(then)
                } else {
                    self.eval(other)
                }
            }
            Node::Index(base, index) => {
                let v = self.eval(base).as_vector();
                let i = self.eval(index).as_float().floor();
                if (0.0..3.0).contains(&i) {
                    Value::Float(v[i as usize])
                } else {
                    Value::ZERO
                }
            }
            Node::Call(func, args) => {
                let values: Vec<Value> = args.iter().map(|a| self.eval(a)).collect();
                func.call(&values, self.state)
            }
        }
    }
}

fn bool_value(b: bool) -> Value {
    Value::Float(if b { 1.0 } else { 0.0 })
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::Add => l.zip(r, |a, b| a + b),
        BinaryOp::Sub => l.zip(r, |a, b| a - b),
        BinaryOp::Mul => l.zip(r, |a, b| a * b),
        BinaryOp::Div => l.zip(r, |a, b| if b == 0.0 { 0.0 } else { a / b }),
        BinaryOp::Rem => l.zip(r, |a, b| if b == 0.0 { 0.0 } else { a % b }),
        BinaryOp::Pow => l.zip(r, f64::powf),
        BinaryOp::Eq => bool_value(equal(l, r)),
        BinaryOp::Ne => bool_value(!equal(l, r)),
        BinaryOp::Lt => bool_value(l.as_float() < r.as_float()),
        BinaryOp::Le => bool_value(l.as_float() <= r.as_float()),
        BinaryOp::Gt => bool_value(l.as_float() > r.as_float()),
        BinaryOp::Ge => bool_value(l.as_float() >= r.as_float()),
        // short-circuited in `Frame::eval`
        BinaryOp::And => bool_value(l.truthy() && r.truthy()),
        BinaryOp::Or => bool_value(l.truthy() || r.truthy()),
    }
}

fn equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => a == b,
        _ if l.is_vector() || r.is_vector() => l.as_vector() == r.as_vector(),
        _ => l.as_float() == r.as_float(),
    }
}
