//! Host adapter boundary.
//!
//! The engine never touches a real canvas or GL implementation directly. All
//! reflection, invocation and canvas primitives go through [`Host`], which an
//! embedder implements over its runtime. [`crate::headless::HeadlessHost`] is
//! the in-process reference implementation.

use canvas_inspector_shared::{HostObject, ObjectClass, ObjectId, ResourceId, StackTrace, Value};
use thiserror::Error;

/// Failure reported by the host adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("unknown host object {0}")]
    UnknownObject(ObjectId),
    #[error("{} has no method `{method}`", class.name())]
    UnknownMethod { class: ObjectClass, method: String },
    #[error("{} has no property `{property}`", class.name())]
    UnknownProperty {
        class: ObjectClass,
        property: String,
    },
    #[error("invalid argument to `{method}`: {reason}")]
    InvalidArgument { method: String, reason: String },
    #[error("cannot call `{method}` on a non-object receiver")]
    NotAnObject { method: String },
    #[error("resource {0} has no live host object")]
    Unbound(ResourceId),
    #[error("failed to encode image: {0}")]
    Encoding(String),
}

/// Operations the engine needs from its host environment.
pub trait Host {
    /// Calls `method` on `target` with already-unwrapped arguments.
    fn invoke(&mut self, target: &HostObject, method: &str, args: &[Value])
    -> Result<Value, HostError>;

    /// Reads a data property.
    fn get_property(&self, target: &HostObject, name: &str) -> Result<Value, HostError>;

    /// Writes a data property.
    fn set_property(&mut self, target: &HostObject, name: &str, value: Value)
    -> Result<(), HostError>;

    /// Creates an offscreen canvas of the given size.
    fn create_canvas(&mut self, width: u32, height: u32) -> Result<HostObject, HostError>;

    /// The host's node-cloning primitive (`node.cloneNode(true)`).
    fn clone_node(&mut self, node: &HostObject) -> Result<HostObject, HostError>;

    /// Encodes a canvas surface to a `data:` URL.
    fn to_data_url(&mut self, canvas: &HostObject) -> Result<String, HostError>;

    /// Snapshot of the calling script's stack, innermost frame first.
    ///
    /// Hosts without call-stack support keep the default, which records calls
    /// without a stack.
    fn capture_stack_trace(&mut self, _limit: usize) -> Option<StackTrace> {
        None
    }
}
