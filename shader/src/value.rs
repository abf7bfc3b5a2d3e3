// value.rs — Numeric value types shared by the compiler, evaluator and node
//
// `Vec3` is the host-facing 3-component result (single precision, like the
// renderer's vector type). `Value` is the evaluator's dynamically typed
// runtime value; arithmetic runs in double precision and is narrowed to
// `Vec3` only at the node boundary.
//
// Preconditions: none.
// Postconditions: operations never panic; failing numeric operations yield zero.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Vec3 ────────────────────────────────────────────────────────────────────

/// Three-component single-precision vector. Serialized as `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    pub const fn splat(v: f32) -> Self {
        Vec3 { x: v, y: v, z: v }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(v: [f32; 3]) -> Self {
        Vec3::new(v[0], v[1], v[2])
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(v: Vec3) -> Self {
        v.to_array()
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ── Value ───────────────────────────────────────────────────────────────────

/// Declared type of a free variable, as reported to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Float,
    Vector,
    String,
}

/// Runtime value produced by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Vector([f64; 3]),
    Str(String),
}

impl Value {
    pub const ZERO: Value = Value::Float(0.0);

    /// Zero value of the given declared type.
    pub fn zero_of(ty: VarType) -> Value {
        match ty {
            VarType::Float => Value::Float(0.0),
            VarType::Vector => Value::Vector([0.0; 3]),
            VarType::String => Value::Str(String::new()),
        }
    }

    pub fn from_vec3(v: Vec3) -> Value {
        Value::Vector([f64::from(v.x), f64::from(v.y), f64::from(v.z)])
    }

    /// Scalar view: vectors read their first component, strings read zero.
    pub fn as_float(&self) -> f64 {
        match self {
            Value::Float(v) => *v,
            Value::Vector(v) => v[0],
            Value::Str(_) => 0.0,
        }
    }

    /// Vector view: scalars broadcast to all three components.
    pub fn as_vector(&self) -> [f64; 3] {
        match self {
            Value::Float(v) => [*v; 3],
            Value::Vector(v) => *v,
            Value::Str(_) => [0.0; 3],
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Value::Vector(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            other => other.as_float() != 0.0,
        }
    }

    /// Apply `f` to every component, keeping the shape. Components that come
    /// out NaN or infinite read as zero.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        let f = |v| finite_or_zero(f(v));
        match self {
            Value::Float(v) => Value::Float(f(*v)),
            Value::Vector(v) => Value::Vector([f(v[0]), f(v[1]), f(v[2])]),
            Value::Str(_) => Value::ZERO,
        }
    }

    /// Combine two values component-wise. A vector on either side promotes
    /// the result to a vector; strings count as zero. Non-finite components
    /// read as zero, as in `map`.
    pub fn zip(&self, other: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
        let f = |a, b| finite_or_zero(f(a, b));
        if self.is_vector() || other.is_vector() {
            let a = self.as_vector();
            let b = other.as_vector();
            Value::Vector([f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2])])
        } else {
            Value::Float(f(self.as_float(), other.as_float()))
        }
    }

    /// Same value with NaN or infinite components replaced by zero.
    pub fn finite(self) -> Value {
        match self {
            Value::Float(v) => Value::Float(finite_or_zero(v)),
            Value::Vector(v) => Value::Vector(v.map(finite_or_zero)),
            s @ Value::Str(_) => s,
        }
    }

    /// Narrow to the host's 3-component result, replacing components that
    /// are non-finite in single precision with zero.
    pub fn to_vec3(&self) -> Vec3 {
        let v = self.as_vector().map(|c| {
            let c = c as f32;
            if c.is_finite() { c } else { 0.0 }
        });
        Vec3::from(v)
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Vector(v) => write!(f, "[{}, {}, {}]", v[0], v[1], v[2]),
            Value::Str(s) => write!(f, "\"{s}\""),
        }
    }
}
