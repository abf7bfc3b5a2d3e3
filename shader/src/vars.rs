// vars.rs — Free-variable references: resolution, binding, evaluation
//
// Every `$name` in an expression resolves to one `VariableReference`:
//
//   `sg::<field>`                  ContextVar    (shader-global field)
//   `user::` / `user_v::<attr>`    AttributeVar  (vector)
//   `user_f::<attr>`               AttributeVar  (float)
//   `user_s::<attr>`               AttributeVar  (string)
//   anything else                  ParamVar      (node parameter, must exist)
//
// A reference's name and variant never change after resolution. Binding
// only refreshes what it reads: context and attribute references validate
// against the invocation context, parameter references snapshot their value
// from the per-invocation arrays.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::compile::VarResolver;
use crate::globals::{
    AttributeKind, AttributeValue, GlobalField, InvocationContext, OptionGlobals, RenderOptions,
};
use crate::value::{Value, VarType, Vec3};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Why one evaluation request could not bind its variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("could not bind shader global '{name}'")]
    GlobalUnavailable { name: &'static str },
    #[error("could not bind user attribute '{name}'")]
    AttributeMissing { name: String },
    #[error("parameters bound before externals")]
    ParamsBeforeExternals,
    #[error("instance owned by worker {owner} requested from worker {requested}")]
    ForeignThread { owner: usize, requested: usize },
}

/// A name that appears more than once across the parameter name lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable name already in use '{name}'")]
pub struct DuplicateName {
    pub name: String,
}

// ── Parameter table ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Float,
    Vector,
}

/// Node parameter names: float-typed first, then vector-typed. Each name
/// maps to its kind and its index within its own value array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamTable {
    slots: HashMap<String, (ParamKind, usize)>,
}

impl ParamTable {
    pub fn build(float_names: &[String], vector_names: &[String]) -> Result<Self, DuplicateName> {
        let mut slots = HashMap::with_capacity(float_names.len() + vector_names.len());
        let tagged = float_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n, ParamKind::Float, i))
            .chain(
                vector_names
                    .iter()
                    .enumerate()
                    .map(|(i, n)| (n, ParamKind::Vector, i)),
            );
        for (name, kind, index) in tagged {
            if slots.insert(name.clone(), (kind, index)).is_some() {
                return Err(DuplicateName { name: name.clone() });
            }
        }
        Ok(ParamTable { slots })
    }

    pub fn lookup(&self, name: &str) -> Option<(ParamKind, usize)> {
        self.slots.get(name).copied()
    }

    /// Every name with its kind and index, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamKind, usize)> + '_ {
        self.slots.iter().map(|(name, &(kind, index))| (name.as_str(), kind, index))
    }
}

// ── References ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum VariableReference {
    Context(ContextVar),
    Attribute(AttributeVar),
    Param(ParamVar),
}

/// A shader-global field. Context-stored fields are read fresh from the
/// invocation context; option-derived ones were computed at resolution.
#[derive(Debug, Clone)]
pub struct ContextVar {
    field: GlobalField,
    options: Option<OptionGlobals>,
}

/// A user attribute looked up by name. The storage kind is discovered at
/// bind time and reused until the next bind.
#[derive(Debug, Clone)]
pub struct AttributeVar {
    name: String,
    ty: VarType,
    kind: Option<AttributeKind>,
}

/// A node parameter, addressed by its index in the float or vector array.
#[derive(Debug, Clone)]
pub struct ParamVar {
    name: String,
    kind: ParamKind,
    index: usize,
    value: Value,
}

impl VariableReference {
    /// Resolve `name` by namespace. `options` is consulted only for
    /// option-derived shader globals.
    pub fn resolve(
        name: &str,
        params: &ParamTable,
        options: &mut OptionsCache<'_>,
    ) -> Result<VariableReference, String> {
        if let Some(field_name) = name.strip_prefix("sg::") {
            let field = GlobalField::from_name(field_name)
                .ok_or_else(|| format!("unsupported shader global '{field_name}'"))?;
            let derived = field.is_option_derived().then(|| options.get());
            return Ok(VariableReference::Context(ContextVar {
                field,
                options: derived,
            }));
        }

        let attribute = |attr: &str, ty| {
            VariableReference::Attribute(AttributeVar {
                name: attr.to_string(),
                ty,
                kind: None,
            })
        };
        if let Some(attr) = name.strip_prefix("user::") {
            return Ok(attribute(attr, VarType::Vector));
        }
        if let Some(attr) = name.strip_prefix("user_v::") {
            return Ok(attribute(attr, VarType::Vector));
        }
        if let Some(attr) = name.strip_prefix("user_f::") {
            return Ok(attribute(attr, VarType::Float));
        }
        if let Some(attr) = name.strip_prefix("user_s::") {
            return Ok(attribute(attr, VarType::String));
        }

        match params.lookup(name) {
            Some((kind, index)) => Ok(VariableReference::Param(ParamVar {
                name: name.to_string(),
                kind,
                index,
                value: Value::zero_of(param_type(kind)),
            })),
            None => Err(format!("unknown variable '{name}'")),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VariableReference::Context(v) => v.field.name(),
            VariableReference::Attribute(v) => &v.name,
            VariableReference::Param(v) => &v.name,
        }
    }

    pub fn var_type(&self) -> VarType {
        match self {
            VariableReference::Context(v) if v.field.is_vector() => VarType::Vector,
            VariableReference::Context(_) => VarType::Float,
            VariableReference::Attribute(v) => v.ty,
            VariableReference::Param(v) => param_type(v.kind),
        }
    }

    /// Context or attribute reference; these tie results to the invocation.
    pub fn is_external(&self) -> bool {
        !matches!(self, VariableReference::Param(_))
    }

    /// Refresh against `ctx`. Parameter references have nothing to bind here.
    pub fn bind(&mut self, ctx: &dyn InvocationContext) -> Result<(), BindError> {
        match self {
            VariableReference::Context(v) => v.bind(ctx),
            VariableReference::Attribute(v) => v.bind(ctx),
            VariableReference::Param(_) => Ok(()),
        }
    }

    /// Current value. Context and attribute references read through `ctx`.
    pub fn evaluate(&self, ctx: &dyn InvocationContext) -> Value {
        match self {
            VariableReference::Context(v) => v.evaluate(ctx),
            VariableReference::Attribute(v) => v.evaluate(ctx),
            VariableReference::Param(v) => v.value.clone(),
        }
    }
}

fn param_type(kind: ParamKind) -> VarType {
    match kind {
        ParamKind::Float => VarType::Float,
        ParamKind::Vector => VarType::Vector,
    }
}

impl ContextVar {
    pub fn field(&self) -> GlobalField {
        self.field
    }

    fn bind(&self, ctx: &dyn InvocationContext) -> Result<(), BindError> {
        if self.field.is_option_derived() || ctx.global(self.field).is_some() {
            Ok(())
        } else {
            Err(BindError::GlobalUnavailable {
                name: self.field.name(),
            })
        }
    }

    fn evaluate(&self, ctx: &dyn InvocationContext) -> Value {
        if let Some(options) = &self.options {
            let time = ctx.global(GlobalField::Time).map(|t| t.to_value().as_float() as f32);
            return options
                .value(self.field, time)
                .map(|v| Value::Float(f64::from(v)))
                .unwrap_or(Value::ZERO);
        }
        match ctx.global(self.field) {
            Some(v) => v.to_value(),
            None if self.field.is_vector() => Value::Vector([0.0; 3]),
            None => Value::ZERO,
        }
    }
}

impl AttributeVar {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &dyn InvocationContext) -> Result<(), BindError> {
        self.kind = AttributeKind::DISCOVERY_ORDER
            .iter()
            .find(|kind| ctx.user_attribute(&self.name, **kind).is_some())
            .copied();
        match self.kind {
            Some(_) => Ok(()),
            None => {
                warn!(attribute = %self.name, "user attribute not found");
                Err(BindError::AttributeMissing {
                    name: self.name.clone(),
                })
            }
        }
    }

    fn evaluate(&self, ctx: &dyn InvocationContext) -> Value {
        let found = self.kind.and_then(|kind| ctx.user_attribute(&self.name, kind));
        let Some(value) = found else {
            warn!(attribute = %self.name, "failed to retrieve user attribute");
            return Value::zero_of(self.ty);
        };
        match (self.ty, value) {
            (VarType::String, AttributeValue::Str(s)) => Value::Str(s),
            (VarType::Float, v) if v.kind() != AttributeKind::Str => {
                Value::Float(v.to_numeric().map_or(0.0, |n| n.as_float()))
            }
            (VarType::Vector, v) if v.kind() != AttributeKind::Str => {
                Value::Vector(v.to_numeric().map_or([0.0; 3], |n| n.as_vector()))
            }
            _ => {
                warn!(attribute = %self.name, "unsupported type for user attribute");
                Value::zero_of(self.ty)
            }
        }
    }
}

impl ParamVar {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value at this parameter's index; out of range reads as zero.
    pub fn read(&self, floats: &[f32], vectors: &[Vec3]) -> Value {
        match self.kind {
            ParamKind::Float => Value::Float(floats.get(self.index).map_or(0.0, |f| f64::from(*f))),
            ParamKind::Vector => {
                Value::from_vec3(vectors.get(self.index).copied().unwrap_or(Vec3::ZERO))
            }
        }
    }

    pub fn bind_params(&mut self, floats: &[f32], vectors: &[Vec3]) {
        self.value = self.read(floats, vectors);
    }
}

// ── Resolver ────────────────────────────────────────────────────────────────

/// Computes option-derived globals the first time an expression needs them.
pub struct OptionsCache<'a> {
    options: &'a RenderOptions,
    computed: Option<OptionGlobals>,
}

impl<'a> OptionsCache<'a> {
    pub fn new(options: &'a RenderOptions) -> Self {
        OptionsCache {
            options,
            computed: None,
        }
    }

    pub fn get(&mut self) -> OptionGlobals {
        *self
            .computed
            .get_or_insert_with(|| OptionGlobals::from_options(self.options))
    }
}

/// Collects one `VariableReference` per resolved name, in the order the
/// compiler asks for them, so `refs[slot]` is the reference for `VarSlot(slot)`.
pub struct Resolver<'a> {
    params: &'a ParamTable,
    options: OptionsCache<'a>,
    refs: Vec<VariableReference>,
}

impl<'a> Resolver<'a> {
    pub fn new(params: &'a ParamTable, options: &'a RenderOptions) -> Self {
        Resolver {
            params,
            options: OptionsCache::new(options),
            refs: Vec::new(),
        }
    }

    pub fn into_refs(self) -> Vec<VariableReference> {
        self.refs
    }
}

impl VarResolver for Resolver<'_> {
    fn resolve_var(&mut self, name: &str) -> Result<VarType, String> {
        match VariableReference::resolve(name, self.params, &mut self.options) {
            Ok(reference) => {
                let ty = reference.var_type();
                self.refs.push(reference);
                Ok(ty)
            }
            Err(message) => {
                warn!(variable = name, "{message}");
                Err(message)
            }
        }
    }
}
