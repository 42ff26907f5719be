//! Per-kind interception tables.
//!
//! Each resource kind declares which method names get custom bookkeeping.
//! Every other method goes through the generic interceptor in
//! [`crate::engine`]. Custom handlers work on a [`WrapFunction`], which runs
//! the real host call lazily so a handler can query state before or after it.

use canvas_inspector_shared::{HostObject, ResourceId, Value};

use super::{Env, IdAllocator, ResourceKind, push_call};
use crate::call::Call;
use crate::canvas2d;
use crate::host::HostError;
use crate::webgl;

/// Resource created by a factory method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factory {
    Buffer,
    Shader,
    Program,
    Texture,
    Framebuffer,
    Renderbuffer,
    UniformLocation,
    Gradient,
    Pattern,
}

impl Factory {
    fn name(self) -> &'static str {
        match self {
            Factory::Buffer => "WebGLBuffer",
            Factory::Shader => "WebGLShader",
            Factory::Program => "WebGLProgram",
            Factory::Texture => "WebGLTexture",
            Factory::Framebuffer => "WebGLFramebuffer",
            Factory::Renderbuffer => "WebGLRenderbuffer",
            Factory::UniformLocation => "WebGLUniformLocation",
            Factory::Gradient => "CanvasGradient",
            Factory::Pattern => "CanvasPattern",
        }
    }

    fn kind(self) -> ResourceKind {
        match self {
            Factory::Buffer => ResourceKind::buffer(),
            Factory::Shader => ResourceKind::Shader,
            Factory::Program => ResourceKind::Program,
            Factory::Texture => ResourceKind::texture(),
            Factory::Framebuffer => ResourceKind::framebuffer(),
            Factory::Renderbuffer => ResourceKind::renderbuffer(),
            Factory::UniformLocation => ResourceKind::Plain,
            Factory::Gradient | Factory::Pattern => ResourceKind::LogEverything,
        }
    }
}

/// How a state-modifying WebGL call is appended to the bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePush {
    Plain,
    TexParameter,
    CopyTexImage,
}

/// Custom bookkeeping attached to one method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept {
    Factory(Factory),
    /// Push into the resource bound to `args[0]`.
    StateModifying(StatePush),
    GetError,
    GetExtension,
    AttachShader,
    FramebufferAttachment,
    /// `bindBuffer`, `bindFramebuffer`, `bindRenderbuffer`.
    BindTarget,
    BindTexture,
    UseProgram,
    VertexAttribPointer,
    /// A 2D call appended through the context's compaction rules.
    Canvas2D(canvas2d::Push),
    /// Every method of a log-everything resource.
    LogEverything,
}

/// Custom intercept registered for `method` on a resource of `kind`.
pub fn intercept_for(kind: &ResourceKind, method: &str) -> Option<Intercept> {
    match kind {
        ResourceKind::WebGLContext(_) => webgl::intercept(method),
        ResourceKind::Canvas2D => canvas2d::intercept(method),
        ResourceKind::LogEverything => Some(Intercept::LogEverything),
        _ => None,
    }
}

/// A pending intercepted call whose real invocation runs on first demand.
pub struct WrapFunction<'c> {
    resource: ResourceId,
    object: HostObject,
    function_name: &'c str,
    args: &'c [Value],
    result: Option<Result<Value, HostError>>,
    call: Option<Call>,
}

impl<'c> WrapFunction<'c> {
    pub fn new(resource: ResourceId, object: HostObject, function_name: &'c str, args: &'c [Value]) -> Self {
        Self {
            resource,
            object,
            function_name,
            args,
            result: None,
            call: None,
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn function_name(&self) -> &'c str {
        self.function_name
    }

    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// Result of the real call, executing it on first use.
    pub fn result(&mut self, env: &mut Env<'_>) -> Result<Value, HostError> {
        if self.result.is_none() {
            let args = env.registry.unwrap_args(self.args);
            self.result = Some(env.host.invoke(&self.object, self.function_name, &args));
        }
        match &self.result {
            Some(result) => result.clone(),
            None => Ok(Value::Undefined),
        }
    }

    /// The recorded call, built around the real result on first use.
    pub fn call(&mut self, env: &mut Env<'_>) -> Result<&mut Call, HostError> {
        let result = self.result(env)?;
        let (resource, function_name, args) = (self.resource, self.function_name, self.args);
        Ok(self.call.get_or_insert_with(|| {
            Call::new(Value::Resource(resource), function_name, args.iter().cloned(), result)
        }))
    }

    /// Frozen copy of the recorded call, for appending to a resource log.
    pub fn frozen_call(&mut self, env: &mut Env<'_>) -> Result<Call, HostError> {
        let call = self.call(env)?;
        call.freeze(env);
        Ok(call.clone())
    }

    /// Replaces the value returned to the application (and recorded).
    pub fn override_result(&mut self, env: &mut Env<'_>, value: Value) -> Result<(), HostError> {
        self.result(env)?;
        if let Some(call) = self.call.as_mut() {
            call.set_result(value.clone());
        }
        self.result = Some(Ok(value));
        Ok(())
    }
}

/// Runs the custom bookkeeping for one intercepted call.
pub fn run(
    intercept: Intercept,
    env: &mut Env<'_>,
    ids: &mut IdAllocator,
    wrap: &mut WrapFunction<'_>,
) -> Result<(), HostError> {
    match intercept {
        Intercept::Factory(factory) => create_resource(factory, env, ids, wrap),
        Intercept::LogEverything => {
            let call = wrap.frozen_call(env)?;
            push_call(env, wrap.resource(), call);
            Ok(())
        }
        Intercept::Canvas2D(push) => canvas2d::handle(push, env, wrap),
        other => webgl::handle(other, env, wrap),
    }
}

/// Wraps the object returned by a factory method in a new resource.
fn create_resource(
    factory: Factory,
    env: &mut Env<'_>,
    ids: &mut IdAllocator,
    wrap: &mut WrapFunction<'_>,
) -> Result<(), HostError> {
    let Some(object) = wrap.result(env)?.as_object() else {
        return Ok(());
    };
    let parent_tracked = env
        .registry
        .get(wrap.resource())
        .is_some_and(|parent| parent.tracked);
    let id = env.registry.create(ids, object, factory.name(), factory.kind());
    let proxy = match env.registry.get_mut(id) {
        Some(resource) => {
            resource.tracked = parent_tracked;
            resource.proxy_object()
        }
        None => Value::Object(object),
    };
    wrap.override_result(env, proxy)?;
    let call = wrap.frozen_call(env)?;
    push_call(env, id, call);
    Ok(())
}
