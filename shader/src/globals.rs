// globals.rs — Host invocation context and render options
//
// The catalogue of shader-global fields an expression can read through the
// `sg::` namespace, the `InvocationContext` trait the host implements per
// shading sample, a concrete `ShaderGlobals` context, and the global
// render options consulted when option-derived fields are resolved.
//
// Name lookup is a `match`; there is no mutable global table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::ContextId;
use crate::value::{Value, Vec3};

// ── Field catalogue ─────────────────────────────────────────────────────────

macro_rules! global_fields {
    ($($variant:ident => $name:literal,)*) => {
        /// A shader-global field addressable as `$sg::<name>`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum GlobalField {
            $($variant,)*
        }

        impl GlobalField {
            pub const ALL: &'static [GlobalField] = &[$(GlobalField::$variant,)*];

            pub fn from_name(name: &str) -> Option<GlobalField> {
                match name {
                    $($name => Some(GlobalField::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(GlobalField::$variant => $name,)*
                }
            }
        }
    };
}

global_fields! {
    // vectors
    P => "P",
    Po => "Po",
    N => "N",
    Nf => "Nf",
    Ng => "Ng",
    Ngf => "Ngf",
    Ns => "Ns",
    Ro => "Ro",
    Rd => "Rd",
    DPdx => "dPdx",
    DPdy => "dPdy",
    DPdu => "dPdu",
    DPdv => "dPdv",
    DNdx => "dNdx",
    DNdy => "dNdy",
    DDdx => "dDdx",
    DDdy => "dDdy",
    Ld => "Ld",
    // colors
    Li => "Li",
    Liu => "Liu",
    Lo => "Lo",
    Ci => "Ci",
    Vo => "Vo",
    // floats
    U => "u",
    V => "v",
    Bu => "bu",
    Bv => "bv",
    Sx => "sx",
    Sy => "sy",
    We => "we",
    Dudx => "dudx",
    Dudy => "dudy",
    Dvdx => "dvdx",
    Dvdy => "dvdy",
    Time => "time",
    Area => "area",
    Ldist => "Ldist",
    // ints
    X => "x",
    Y => "y",
    // double
    Rl => "Rl",
    // bytes
    Sc => "sc",
    Rr => "Rr",
    RrRefl => "Rr_refl",
    RrRefr => "Rr_refr",
    RrDiff => "Rr_diff",
    RrGloss => "Rr_gloss",
    // u16
    Rt => "Rt",
    // derived from render options
    Frame => "frame",
    Fps => "fps",
    SampleFrame => "sample_frame",
    ShutterOpenTime => "shutter_open_time",
    ShutterCloseTime => "shutter_close_time",
    ShutterOpenFrame => "shutter_open_frame",
    ShutterCloseFrame => "shutter_close_frame",
}

/// Number of fields a context stores directly.
pub const CONTEXT_FIELD_COUNT: usize = GlobalField::Rt as usize + 1;

impl GlobalField {
    /// Vector and color fields evaluate to three components.
    pub fn is_vector(self) -> bool {
        self <= GlobalField::Vo
    }

    /// Computed from `RenderOptions` rather than read from the context.
    pub fn is_option_derived(self) -> bool {
        self >= GlobalField::Frame
    }

    /// The context field actually read. `Ns` has no storage of its own and
    /// reads the face-forward normal.
    pub fn storage(self) -> GlobalField {
        match self {
            GlobalField::Ns => GlobalField::Nf,
            other => other,
        }
    }

    fn slot(self) -> Option<usize> {
        let i = self.storage() as usize;
        (i < CONTEXT_FIELD_COUNT).then_some(i)
    }
}

/// A raw field value with the host's storage type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobalValue {
    Vector(Vec3),
    Color(Vec3),
    Float(f32),
    Int(i32),
    Double(f64),
    Byte(u8),
    UInt16(u16),
}

impl GlobalValue {
    pub fn to_value(self) -> Value {
        match self {
            GlobalValue::Vector(v) | GlobalValue::Color(v) => Value::from_vec3(v),
            GlobalValue::Float(f) => Value::Float(f64::from(f)),
            GlobalValue::Int(i) => Value::Float(f64::from(i)),
            GlobalValue::Double(d) => Value::Float(d),
            GlobalValue::Byte(b) => Value::Float(f64::from(b)),
            GlobalValue::UInt16(u) => Value::Float(f64::from(u)),
        }
    }
}

// ── Attributes ──────────────────────────────────────────────────────────────

/// Storage kind of a user attribute, in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Rgba,
    Rgb,
    Vector,
    Point,
    Point2,
    Float,
    Int,
    UInt,
    Byte,
    Bool,
    Str,
}

impl AttributeKind {
    /// The order lookups are attempted in when the kind is not yet known.
    pub const DISCOVERY_ORDER: [AttributeKind; 11] = [
        AttributeKind::Rgba,
        AttributeKind::Rgb,
        AttributeKind::Vector,
        AttributeKind::Point,
        AttributeKind::Point2,
        AttributeKind::Float,
        AttributeKind::Int,
        AttributeKind::UInt,
        AttributeKind::Byte,
        AttributeKind::Bool,
        AttributeKind::Str,
    ];
}

/// Serialized externally tagged by kind, e.g. `{ "float": 0.5 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeValue {
    Rgba([f32; 4]),
    Rgb(Vec3),
    Vector(Vec3),
    Point(Vec3),
    Point2([f32; 2]),
    Float(f32),
    Int(i32),
    UInt(u32),
    Byte(u8),
    Bool(bool),
    Str(String),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Rgba(_) => AttributeKind::Rgba,
            AttributeValue::Rgb(_) => AttributeKind::Rgb,
            AttributeValue::Vector(_) => AttributeKind::Vector,
            AttributeValue::Point(_) => AttributeKind::Point,
            AttributeValue::Point2(_) => AttributeKind::Point2,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::UInt(_) => AttributeKind::UInt,
            AttributeValue::Byte(_) => AttributeKind::Byte,
            AttributeValue::Bool(_) => AttributeKind::Bool,
            AttributeValue::Str(_) => AttributeKind::Str,
        }
    }

    /// Numeric view; `None` for strings. A point2 reads as `(x, y, 0)` and
    /// rgba drops alpha.
    pub fn to_numeric(&self) -> Option<Value> {
        let v = match self {
            AttributeValue::Rgba(c) => Value::Vector([c[0], c[1], c[2]].map(f64::from)),
            AttributeValue::Rgb(v) | AttributeValue::Vector(v) | AttributeValue::Point(v) => {
                Value::from_vec3(*v)
            }
            AttributeValue::Point2(p) => Value::Vector([f64::from(p[0]), f64::from(p[1]), 0.0]),
            AttributeValue::Float(f) => Value::Float(f64::from(*f)),
            AttributeValue::Int(i) => Value::Float(f64::from(*i)),
            AttributeValue::UInt(u) => Value::Float(f64::from(*u)),
            AttributeValue::Byte(b) => Value::Float(f64::from(*b)),
            AttributeValue::Bool(b) => Value::Float(if *b { 1.0 } else { 0.0 }),
            AttributeValue::Str(_) => return None,
        };
        Some(v)
    }
}

// ── Invocation context ──────────────────────────────────────────────────────

/// Per-sample state a host hands to one evaluation request.
pub trait InvocationContext {
    /// Identity of this invocation; a bound instance skips rebinding when
    /// asked again with the same id.
    fn id(&self) -> ContextId;

    /// Stable index of the worker thread issuing the request, in
    /// `0..options.threads`.
    fn thread_index(&self) -> usize;

    /// Value of a context-stored field, or `None` when the host does not
    /// provide it in the current state.
    fn global(&self, field: GlobalField) -> Option<GlobalValue>;

    /// Typed attribute lookup: `Some` only when an attribute `name` exists
    /// with exactly `kind`.
    fn user_attribute(&self, name: &str, kind: AttributeKind) -> Option<AttributeValue>;
}

/// A plain, owned invocation context.
#[derive(Debug, Clone)]
pub struct ShaderGlobals {
    id: ContextId,
    thread_index: usize,
    values: [Option<GlobalValue>; CONTEXT_FIELD_COUNT],
    attributes: HashMap<String, AttributeValue>,
}

impl ShaderGlobals {
    pub fn new(id: u64, thread_index: usize) -> Self {
        ShaderGlobals {
            id: ContextId(id),
            thread_index,
            values: [None; CONTEXT_FIELD_COUNT],
            attributes: HashMap::new(),
        }
    }

    /// Set a context-stored field. Option-derived fields and `Ns` are ignored.
    pub fn with(mut self, field: GlobalField, value: GlobalValue) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: GlobalField, value: GlobalValue) {
        // aliases read another field's storage and never write it
        if field.storage() != field {
            return;
        }
        if let Some(i) = field.slot() {
            self.values[i] = Some(value);
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

impl InvocationContext for ShaderGlobals {
    fn id(&self) -> ContextId {
        self.id
    }

    fn thread_index(&self) -> usize {
        self.thread_index
    }

    fn global(&self, field: GlobalField) -> Option<GlobalValue> {
        field.slot().and_then(|i| self.values[i])
    }

    fn user_attribute(&self, name: &str, kind: AttributeKind) -> Option<AttributeValue> {
        self.attributes
            .get(name)
            .filter(|v| v.kind() == kind)
            .cloned()
    }
}

// ── Render options ──────────────────────────────────────────────────────────

/// Global render options. Fields the host left unset stay `None` so the
/// documented fallbacks apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Size of the worker pool; per-thread instance tables get this many slots.
    pub threads: usize,
    pub frame: Option<f32>,
    pub fps: Option<f32>,
    pub motion_start_frame: Option<f32>,
    pub motion_end_frame: Option<f32>,
    pub relative_motion_frame: Option<bool>,
    pub camera: Option<CameraShutter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraShutter {
    pub shutter_start: f32,
    pub shutter_end: f32,
}

impl RenderOptions {
    pub fn with_threads(threads: usize) -> Self {
        RenderOptions {
            threads,
            ..Default::default()
        }
    }

    /// Worker count, never less than one.
    pub fn worker_count(&self) -> usize {
        self.threads.max(1)
    }
}

/// Option-derived field values, computed once per compiled instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionGlobals {
    pub frame: f32,
    pub fps: f32,
    pub motion_start: f32,
    pub motion_end: f32,
    pub shutter_open_time: f32,
    pub shutter_close_time: f32,
    pub shutter_open_frame: f32,
    pub shutter_close_frame: f32,
}

impl OptionGlobals {
    pub fn from_options(options: &RenderOptions) -> Self {
        let frame = options.frame.unwrap_or_else(|| {
            debug!("frame not set, defaults to 0");
            0.0
        });
        let fps = options.fps.unwrap_or_else(|| {
            debug!("fps not set, defaults to 24");
            24.0
        });

        let relative = options.relative_motion_frame.unwrap_or(false);
        let offset = if relative { frame } else { 0.0 };
        let motion_start = match options.motion_start_frame {
            Some(start) => start + offset,
            None => frame,
        };
        let motion_end = match options.motion_end_frame {
            Some(end) => end + offset,
            None => motion_start,
        };

        let (shutter_open_time, shutter_close_time) = match options.camera {
            Some(cam) => (cam.shutter_start, cam.shutter_end),
            None => (0.0, 0.0),
        };
        let motion_length = motion_end - motion_start;
        let (shutter_open_frame, shutter_close_frame) =
            if options.camera.is_some() && motion_length > 0.0 {
                (
                    motion_start + shutter_open_time * motion_length,
                    motion_start + shutter_close_time * motion_length,
                )
            } else {
                (motion_start, motion_start)
            };

        OptionGlobals {
            frame,
            fps,
            motion_start,
            motion_end,
            shutter_open_time,
            shutter_close_time,
            shutter_open_frame,
            shutter_close_frame,
        }
    }

    /// Value of an option-derived field. `time` is the sample's shutter
    /// time in [0, 1], when the context provides one.
    pub fn value(&self, field: GlobalField, time: Option<f32>) -> Option<f32> {
        let v = match field {
            GlobalField::Frame => self.frame,
            GlobalField::Fps => self.fps,
            GlobalField::SampleFrame => match time {
                Some(t) => self.motion_start + t * (self.motion_end - self.motion_start),
                None => self.motion_start,
            },
            GlobalField::ShutterOpenTime => self.shutter_open_time,
            GlobalField::ShutterCloseTime => self.shutter_close_time,
            GlobalField::ShutterOpenFrame => self.shutter_open_frame,
            GlobalField::ShutterCloseFrame => self.shutter_close_frame,
            _ => return None,
        };
        Some(v)
    }
}
