//! Canvas Inspector Core - call capture and deterministic replay
//!
//! This crate records every call an application makes on its Canvas 2D and
//! WebGL contexts, flattens the resources those calls touch into
//! self-contained trace logs, and replays a log against fresh host objects
//! so each step can be inspected.
//!
//! # Architecture
//!
//! - [`CanvasInspector`] - Facade the host talks to, keyed by opaque id strings
//! - [`Engine`] - Capture world: proxies, interceptors and resource histories
//! - [`TraceLog`] - Flattened calls plus the resources they reference
//! - [`TraceLogPlayer`] - Replay world rebuilt from a trace log
//! - [`Host`] - Adapter over the real canvas runtime; [`HeadlessHost`] runs in-process

pub mod cache;
pub mod call;
pub mod canvas2d;
pub mod capture;
pub mod cloner;
pub mod config;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod headless;
pub mod host;
pub mod inspector;
#[cfg(test)]
mod integration;
pub mod replay;
pub mod resource;
#[cfg(test)]
pub mod test_utils;
pub mod webgl;

// Re-export the facade and its configuration
pub use config::{CaptureConfig, InspectorConfig, TraceLogConfig};
pub use error::InspectorError;
pub use inspector::{CanvasInspector, ResourceInfo, ResourceState, TraceLogCall, TraceLogView};

// Re-export the host boundary
pub use headless::{HeadlessHost, TextureLevel};
pub use host::{Host, HostError};

// Re-export capture and replay types
pub use call::{Call, ReplayableCall};
pub use engine::Engine;
pub use replay::{ResourceTrackingManager, SharedTraceLog, TraceLog, TraceLogPlayer};
pub use resource::{Resource, ResourceKind, ResourceRegistry};

// Re-export shared types for convenience
pub use canvas_inspector_shared::{HostObject, ObjectClass, ResourceId, StackTrace, Value};
