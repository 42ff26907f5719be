//! Host value model.
//!
//! Everything that crosses the host boundary is a [`Value`]. Arrays, buffers and
//! typed arrays are shared, interior-mutable storage so the host (and the
//! application driving it) can mutate them after a call returns, which is what
//! makes freezing recorded arguments necessary.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Identifier of a live host object, assigned by the host adapter.
pub type ObjectId = u64;

/// Process-wide unique resource identifier.
///
/// Doubles as the location-independent handle stored in replayable calls: a
/// replay world reconstructs the resource under the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interface class of a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    Canvas,
    Image,
    Video,
    ImageData,
    CanvasRenderingContext2D,
    CanvasGradient,
    CanvasPattern,
    WebGLRenderingContext,
    WebGLBuffer,
    WebGLTexture,
    WebGLFramebuffer,
    WebGLRenderbuffer,
    WebGLProgram,
    WebGLShader,
    WebGLUniformLocation,
    WebGLActiveInfo,
    WebGLContextAttributes,
    WebGLExtension,
    Other,
}

impl ObjectClass {
    /// DOM interface name, as used in `[object Name]` strings.
    pub fn name(self) -> &'static str {
        match self {
            Self::Canvas => "HTMLCanvasElement",
            Self::Image => "HTMLImageElement",
            Self::Video => "HTMLVideoElement",
            Self::ImageData => "ImageData",
            Self::CanvasRenderingContext2D => "CanvasRenderingContext2D",
            Self::CanvasGradient => "CanvasGradient",
            Self::CanvasPattern => "CanvasPattern",
            Self::WebGLRenderingContext => "WebGLRenderingContext",
            Self::WebGLBuffer => "WebGLBuffer",
            Self::WebGLTexture => "WebGLTexture",
            Self::WebGLFramebuffer => "WebGLFramebuffer",
            Self::WebGLRenderbuffer => "WebGLRenderbuffer",
            Self::WebGLProgram => "WebGLProgram",
            Self::WebGLShader => "WebGLShader",
            Self::WebGLUniformLocation => "WebGLUniformLocation",
            Self::WebGLActiveInfo => "WebGLActiveInfo",
            Self::WebGLContextAttributes => "WebGLContextAttributes",
            Self::WebGLExtension => "WebGLExtension",
            Self::Other => "Object",
        }
    }

    /// Whether objects of this class expose methods or properties worth
    /// intercepting. GL object handles are opaque and are handed out as-is.
    pub fn is_interceptable(self) -> bool {
        matches!(
            self,
            Self::CanvasRenderingContext2D
                | Self::WebGLRenderingContext
                | Self::CanvasGradient
                | Self::CanvasPattern
        )
    }
}

/// A live, opaque host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostObject {
    pub id: ObjectId,
    pub class: ObjectClass,
}

impl HostObject {
    pub fn new(id: ObjectId, class: ObjectClass) -> Self {
        Self { id, class }
    }
}

/// Element type of a [`TypedArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }

    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Converts a number the way a store into this array type would.
    pub fn coerce(self, value: f64) -> f64 {
        let int = |v: f64| if v.is_finite() { v.trunc() } else { 0.0 };
        match self {
            Self::Int8 => int(value) as i64 as i8 as f64,
            Self::Uint8 => int(value) as i64 as u8 as f64,
            Self::Uint8Clamped => {
                if value.is_nan() {
                    0.0
                } else {
                    value.clamp(0.0, 255.0).round_ties_even()
                }
            }
            Self::Int16 => int(value) as i64 as i16 as f64,
            Self::Uint16 => int(value) as i64 as u16 as f64,
            Self::Int32 => int(value) as i64 as i32 as f64,
            Self::Uint32 => int(value) as i64 as u32 as f64,
            Self::Float32 => value as f32 as f64,
            Self::Float64 => value,
        }
    }
}

/// A strongly typed numeric array with shared storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedArray {
    kind: TypedArrayKind,
    elements: Rc<RefCell<Vec<f64>>>,
}

impl TypedArray {
    pub fn new(kind: TypedArrayKind, values: impl IntoIterator<Item = f64>) -> Self {
        let elements = values.into_iter().map(|v| kind.coerce(v)).collect();
        Self {
            kind,
            elements: Rc::new(RefCell::new(elements)),
        }
    }

    pub fn zeroed(kind: TypedArrayKind, len: usize) -> Self {
        Self::new(kind, std::iter::repeat_n(0.0, len))
    }

    pub fn kind(&self) -> TypedArrayKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.elements.borrow().get(index).copied()
    }

    pub fn set(&self, index: usize, value: f64) {
        if let Some(slot) = self.elements.borrow_mut().get_mut(index) {
            *slot = self.kind.coerce(value);
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.elements.borrow().clone()
    }

    /// Same-type copy with its own storage.
    pub fn copy(&self) -> Self {
        Self::new(self.kind, self.to_vec())
    }

    pub fn shares_storage(&self, other: &TypedArray) -> bool {
        Rc::ptr_eq(&self.elements, &other.elements)
    }
}

impl PartialEq for TypedArray {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && *self.elements.borrow() == *other.elements.borrow()
    }
}

/// Shared storage of a plain array value.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared storage of an `ArrayBuffer`.
pub type BufferRef = Rc<RefCell<Vec<u8>>>;

/// A value passed to or returned from the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    ArrayBuffer(BufferRef),
    Typed(TypedArray),
    Object(HostObject),
    /// Handle of a tracked resource: its proxy in the capture world, and its
    /// location-independent reference in replayable form.
    Resource(ResourceId),
}

impl Value {
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values.into_iter().collect())))
    }

    pub fn typed(kind: TypedArrayKind, values: impl IntoIterator<Item = f64>) -> Self {
        Value::Typed(TypedArray::new(kind, values))
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        Value::ArrayBuffer(Rc::new(RefCell::new(bytes)))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// ECMAScript truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_number()
            .filter(|n| n.is_finite() && *n >= 0.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_number()
            .filter(|n| n.is_finite())
            .map(|n| n as i32)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<HostObject> {
        match self {
            Value::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<ResourceId> {
        match self {
            Value::Resource(id) => Some(*id),
            _ => None,
        }
    }

    /// Indexed element of an array-like value, `undefined` otherwise.
    pub fn element(&self, index: usize) -> Value {
        match self {
            Value::Array(items) => items.borrow().get(index).cloned().unwrap_or_default(),
            Value::Typed(t) => t.get(index).map(Value::Number).unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// Numeric contents of an array-like value.
    pub fn numbers(&self) -> Option<Vec<f64>> {
        match self {
            Value::Array(items) => Some(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.as_number().unwrap_or(f64::NAN))
                    .collect(),
            ),
            Value::Typed(t) => Some(t.to_vec()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::ArrayBuffer(a), Value::ArrayBuffer(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Typed(a), Value::Typed(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.id == b.id,
            (Value::Resource(a), Value::Resource(b)) => a == b,
            _ => false,
        }
    }
}

fn format_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        f.write_str("0")
    } else {
        write!(f, "{n}")
    }
}

/// ECMAScript `String(value)` conversion.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => format_number(f, *n),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Typed(t) => {
                for (i, n) in t.to_vec().into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    format_number(f, n)?;
                }
                Ok(())
            }
            Value::ArrayBuffer(_) => f.write_str("[object ArrayBuffer]"),
            Value::Object(o) => write!(f, "[object {}]", o.class.name()),
            Value::Resource(_) => f.write_str("[object Object]"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<HostObject> for Value {
    fn from(o: HostObject) -> Self {
        Value::Object(o)
    }
}

impl From<Option<HostObject>> for Value {
    fn from(o: Option<HostObject>) -> Self {
        o.map_or(Value::Null, Value::Object)
    }
}

impl From<ResourceId> for Value {
    fn from(id: ResourceId) -> Self {
        Value::Resource(id)
    }
}
