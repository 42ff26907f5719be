//! Shared types for the canvas inspector.
//!
//! The value model exchanged with the host, WebGL enum constants, call-stack
//! frames and the opaque id strings exposed to the host.

pub mod constants;
pub mod ids;
pub mod stack;
pub mod value;

pub use ids::{IdError, ParsedId, ResourceRef, TraceLogId};
pub use stack::{CallFrame, StackTrace};
pub use value::{
    ArrayRef, BufferRef, HostObject, ObjectClass, ObjectId, ResourceId, TypedArray,
    TypedArrayKind, Value,
};

/// Inline argument list; most canvas and WebGL calls take four or fewer.
pub type CallArgs = smallvec::SmallVec<[Value; 4]>;
