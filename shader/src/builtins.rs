// builtins.rs — Built-in function table
//
// Every callable name the compiler accepts, with its arity and the two
// properties the node's classification depends on: purity (a call to an
// impure function keeps an expression from being constant) and thread
// safety (a call to a thread-unsafe function forces the guarded strategy).
//
// Lookup is a `match` on the name: no global table, nothing to initialize.

use crate::eval::EvalState;
use crate::value::Value;

/// A resolved built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    // ── Component-wise math ──
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sqrt,
    Exp,
    Log,
    Pow,
    Floor,
    Ceil,
    Round,
    Fract,
    Min,
    Max,
    Clamp,
    Mix,
    Smoothstep,
    Step,

    // ── Vector ──
    Length,
    Dot,
    Cross,
    Norm,
    Vec,
    Comp,

    // ── Stateful ──
    /// `rand()` in [0, 1), `rand(min, max)`; advances the instance's generator.
    Rand,
    /// `cycle(n)`: 0, 1, .., n-1, 0, .. across successive evaluations.
    Cycle,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        let f = match name {
            "abs" => Builtin::Abs,
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "asin" => Builtin::Asin,
            "acos" => Builtin::Acos,
            "atan" => Builtin::Atan,
            "atan2" => Builtin::Atan2,
            "sqrt" => Builtin::Sqrt,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "pow" => Builtin::Pow,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "round" => Builtin::Round,
            "fract" => Builtin::Fract,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "clamp" => Builtin::Clamp,
            "mix" => Builtin::Mix,
            "smoothstep" => Builtin::Smoothstep,
            "step" => Builtin::Step,
            "length" => Builtin::Length,
            "dot" => Builtin::Dot,
            "cross" => Builtin::Cross,
            "norm" => Builtin::Norm,
            "vec" => Builtin::Vec,
            "comp" => Builtin::Comp,
            "rand" => Builtin::Rand,
            "cycle" => Builtin::Cycle,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Builtin::Abs
            | Builtin::Sin
            | Builtin::Cos
            | Builtin::Tan
            | Builtin::Asin
            | Builtin::Acos
            | Builtin::Atan
            | Builtin::Sqrt
            | Builtin::Exp
            | Builtin::Log
            | Builtin::Floor
            | Builtin::Ceil
            | Builtin::Round
            | Builtin::Fract
            | Builtin::Length
            | Builtin::Norm
            | Builtin::Cycle => (1, 1),
            Builtin::Atan2
            | Builtin::Pow
            | Builtin::Min
            | Builtin::Max
            | Builtin::Step
            | Builtin::Dot
            | Builtin::Cross
            | Builtin::Comp => (2, 2),
            Builtin::Clamp | Builtin::Mix | Builtin::Smoothstep => (3, 3),
            Builtin::Vec => (1, 3),
            Builtin::Rand => (0, 2),
        }
    }

    pub fn accepts(self, argc: usize) -> bool {
        let (min, max) = self.arity();
        // `vec` takes one (broadcast) or three components, never two.
        (min..=max).contains(&argc) && !(self == Builtin::Vec && argc == 2)
    }

    /// Same arguments always give the same result and nothing is mutated.
    pub fn is_pure(self) -> bool {
        !matches!(self, Builtin::Rand | Builtin::Cycle)
    }

    /// Safe to call on one instance from several threads at once.
    pub fn is_thread_safe(self) -> bool {
        self.is_pure()
    }

    /// Invoke the function. Argument counts were checked at compile time;
    /// a missing argument reads as zero. Non-finite results read as zero.
    pub fn call(self, args: &[Value], state: &mut EvalState) -> Value {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::ZERO);
        let out = match self {
            Builtin::Abs => arg(0).map(f64::abs),
            Builtin::Sin => arg(0).map(f64::sin),
            Builtin::Cos => arg(0).map(f64::cos),
            Builtin::Tan => arg(0).map(f64::tan),
            Builtin::Asin => arg(0).map(|v| v.clamp(-1.0, 1.0).asin()),
            Builtin::Acos => arg(0).map(|v| v.clamp(-1.0, 1.0).acos()),
            Builtin::Atan => arg(0).map(f64::atan),
            Builtin::Atan2 => arg(0).zip(&arg(1), f64::atan2),
            Builtin::Sqrt => arg(0).map(|v| if v > 0.0 { v.sqrt() } else { 0.0 }),
            Builtin::Exp => arg(0).map(f64::exp),
            Builtin::Log => arg(0).map(|v| if v > 0.0 { v.ln() } else { 0.0 }),
            Builtin::Pow => arg(0).zip(&arg(1), f64::powf),
            Builtin::Floor => arg(0).map(f64::floor),
            Builtin::Ceil => arg(0).map(f64::ceil),
            Builtin::Round => arg(0).map(f64::round),
            Builtin::Fract => arg(0).map(|v| v - v.floor()),
            Builtin::Min => arg(0).zip(&arg(1), f64::min),
            Builtin::Max => arg(0).zip(&arg(1), f64::max),
            Builtin::Clamp => {
                let lo = arg(1);
                let hi = arg(2);
                arg(0).zip(&lo, f64::max).zip(&hi, f64::min)
            }
            Builtin::Mix => {
                let a = arg(0);
                let b = arg(1);
                let t = arg(2);
                let delta = b.zip(&a, |b, a| b - a);
                a.zip(&delta.zip(&t, |d, t| d * t), |a, dt| a + dt)
            }
            Builtin::Smoothstep => {
                let lo = arg(0).as_float();
                let hi = arg(1).as_float();
                arg(2).map(|x| smoothstep(lo, hi, x))
            }
            Builtin::Step => arg(0).zip(&arg(1), |edge, x| if x < edge { 0.0 } else { 1.0 }),
            Builtin::Length => Value::Float(length(arg(0).as_vector())),
            Builtin::Dot => {
                let a = arg(0).as_vector();
                let b = arg(1).as_vector();
                Value::Float(a[0] * b[0] + a[1] * b[1] + a[2] * b[2])
            }
            Builtin::Cross => {
                let a = arg(0).as_vector();
                let b = arg(1).as_vector();
                Value::Vector([
                    a[1] * b[2] - a[2] * b[1],
                    a[2] * b[0] - a[0] * b[2],
                    a[0] * b[1] - a[1] * b[0],
                ])
            }
            Builtin::Norm => {
                let v = arg(0).as_vector();
                let len = length(v);
                if len > 0.0 {
                    Value::Vector([v[0] / len, v[1] / len, v[2] / len])
                } else {
                    Value::Vector([0.0; 3])
                }
            }
            Builtin::Vec => {
                if args.len() == 3 {
                    Value::Vector([arg(0).as_float(), arg(1).as_float(), arg(2).as_float()])
                } else {
                    Value::Vector([arg(0).as_float(); 3])
                }
            }
            Builtin::Comp => {
                let v = arg(0).as_vector();
                let i = arg(1).as_float().floor();
                if (0.0..3.0).contains(&i) {
                    Value::Float(v[i as usize])
                } else {
                    Value::ZERO
                }
            }
            Builtin::Rand => {
                let r = state.next_random();
                if args.len() >= 2 {
                    let lo = arg(0).as_float();
                    let hi = arg(1).as_float();
                    Value::Float(lo + (hi - lo) * r)
                } else {
                    Value::Float(r)
                }
            }
            Builtin::Cycle => {
                let n = arg(0).as_float().floor();
                if n >= 1.0 {
                    Value::Float(state.next_tick() as f64 % n)
                } else {
                    Value::ZERO
                }
            }
        };
        out.finite()
    }
}

fn length(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn smoothstep(lo: f64, hi: f64, x: f64) -> f64 {
    if hi <= lo {
        return if x < lo { 0.0 } else { 1.0 };
    }
    let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: Builtin, args: &[Value]) -> Value {
        f.call(args, &mut EvalState::default())
    }

    #[test]
    fn lookup_known_and_unknown() {
        assert_eq!(Builtin::from_name("clamp"), Some(Builtin::Clamp));
        assert_eq!(Builtin::from_name("printf"), None);
    }

    #[test]
    fn vec_rejects_two_arguments() {
        assert!(Builtin::Vec.accepts(1));
        assert!(!Builtin::Vec.accepts(2));
        assert!(Builtin::Vec.accepts(3));
    }

    #[test]
    fn stateful_functions_are_impure_and_thread_unsafe() {
        for f in [Builtin::Rand, Builtin::Cycle] {
            assert!(!f.is_pure());
            assert!(!f.is_thread_safe());
        }
        assert!(Builtin::Sin.is_pure());
        assert!(Builtin::Sin.is_thread_safe());
    }

    #[test]
    fn clamp_is_component_wise() {
        let v = call(
            Builtin::Clamp,
            &[Value::Vector([-1.0, 0.5, 2.0]), Value::Float(0.0), Value::Float(1.0)],
        );
        assert_eq!(v, Value::Vector([0.0, 0.5, 1.0]));
    }

    #[test]
    fn mix_interpolates() {
        let v = call(
            Builtin::Mix,
            &[Value::Float(2.0), Value::Float(4.0), Value::Float(0.25)],
        );
        assert_eq!(v, Value::Float(2.5));
    }

    #[test]
    fn cross_of_axes() {
        let v = call(
            Builtin::Cross,
            &[Value::Vector([1.0, 0.0, 0.0]), Value::Vector([0.0, 1.0, 0.0])],
        );
        assert_eq!(v, Value::Vector([0.0, 0.0, 1.0]));
    }

    #[test]
    fn norm_of_zero_is_zero() {
        assert_eq!(call(Builtin::Norm, &[Value::Float(0.0)]), Value::Vector([0.0; 3]));
    }

    #[test]
    fn comp_out_of_range_is_zero() {
        let v = Value::Vector([1.0, 2.0, 3.0]);
        assert_eq!(call(Builtin::Comp, &[v.clone(), Value::Float(2.0)]), Value::Float(3.0));
        assert_eq!(call(Builtin::Comp, &[v, Value::Float(3.0)]), Value::ZERO);
    }

    #[test]
    fn cycle_advances_per_call() {
        let mut state = EvalState::default();
        let seq: Vec<f64> = (0..5)
            .map(|_| Builtin::Cycle.call(&[Value::Float(3.0)], &mut state).as_float())
            .collect();
        assert_eq!(seq, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn failing_math_reads_as_zero() {
        assert_eq!(call(Builtin::Pow, &[Value::Float(-1.0), Value::Float(0.5)]), Value::ZERO);
        assert_eq!(call(Builtin::Exp, &[Value::Float(1000.0)]), Value::ZERO);
        assert_eq!(call(Builtin::Fract, &[Value::Float(f64::INFINITY)]), Value::ZERO);
        let big = Value::Vector([1e200, 1e200, 1.0]);
        assert_eq!(call(Builtin::Dot, &[big.clone(), big.clone()]), Value::ZERO);
        assert_eq!(call(Builtin::Length, &[big]), Value::ZERO);
    }

    #[test]
    fn rand_stays_in_range() {
        let mut state = EvalState::default();
        for _ in 0..100 {
            let r = Builtin::Rand
                .call(&[Value::Float(2.0), Value::Float(3.0)], &mut state)
                .as_float();
            assert!((2.0..3.0).contains(&r));
        }
    }
}
