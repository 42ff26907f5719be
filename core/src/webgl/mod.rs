//! WebGL context bookkeeping.
//!
//! The context resource intercepts resource factories, records state-modifying
//! calls into whichever resource is bound to the call's target, and keeps a
//! per-context set of GL errors that were drained from the real context while
//! snapshotting but not yet reported to the application.

pub mod bound;
pub mod program;
pub mod state;

use canvas_inspector_shared::constants as gl;
use canvas_inspector_shared::{HostObject, ResourceId, Value};

use crate::host::HostError;
use crate::resource::intercept::{Factory, Intercept, StatePush, WrapFunction};
use crate::resource::{Env, GlContextState, ResourceRegistry, push_call};

/// Parameters mirrored into every texture's shadow state.
pub const PIXEL_STORE_PARAMETERS: [u32; 5] = [
    gl::PACK_ALIGNMENT,
    gl::UNPACK_ALIGNMENT,
    gl::UNPACK_COLORSPACE_CONVERSION_WEBGL,
    gl::UNPACK_FLIP_Y_WEBGL,
    gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL,
];

/// Methods that paint into the drawing buffer.
pub const DRAWING_METHODS: [&str; 3] = ["clear", "drawArrays", "drawElements"];

/// A bind target together with the parameter that reports its binding and
/// the method that sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingPoint {
    pub target: u32,
    pub parameter: u32,
    pub method: &'static str,
}

pub const BINDING_POINTS: [BindingPoint; 6] = [
    BindingPoint {
        target: gl::TEXTURE_2D,
        parameter: gl::TEXTURE_BINDING_2D,
        method: "bindTexture",
    },
    BindingPoint {
        target: gl::TEXTURE_CUBE_MAP,
        parameter: gl::TEXTURE_BINDING_CUBE_MAP,
        method: "bindTexture",
    },
    BindingPoint {
        target: gl::ARRAY_BUFFER,
        parameter: gl::ARRAY_BUFFER_BINDING,
        method: "bindBuffer",
    },
    BindingPoint {
        target: gl::ELEMENT_ARRAY_BUFFER,
        parameter: gl::ELEMENT_ARRAY_BUFFER_BINDING,
        method: "bindBuffer",
    },
    BindingPoint {
        target: gl::FRAMEBUFFER,
        parameter: gl::FRAMEBUFFER_BINDING,
        method: "bindFramebuffer",
    },
    BindingPoint {
        target: gl::RENDERBUFFER,
        parameter: gl::RENDERBUFFER_BINDING,
        method: "bindRenderbuffer",
    },
];

/// Binding point for a call target. Cube map faces bind through the cube map.
fn binding_point(target: u32) -> Option<BindingPoint> {
    let target = match target {
        gl::TEXTURE_CUBE_MAP_POSITIVE_X..=gl::TEXTURE_CUBE_MAP_NEGATIVE_Z => gl::TEXTURE_CUBE_MAP,
        other => other,
    };
    BINDING_POINTS.iter().copied().find(|point| point.target == target)
}

/// Custom intercept for a method of a WebGL context.
pub fn intercept(method: &str) -> Option<Intercept> {
    let intercept = match method {
        "createBuffer" => Intercept::Factory(Factory::Buffer),
        "createShader" => Intercept::Factory(Factory::Shader),
        "createProgram" => Intercept::Factory(Factory::Program),
        "createTexture" => Intercept::Factory(Factory::Texture),
        "createFramebuffer" => Intercept::Factory(Factory::Framebuffer),
        "createRenderbuffer" => Intercept::Factory(Factory::Renderbuffer),
        "getUniformLocation" => Intercept::Factory(Factory::UniformLocation),

        "bindAttribLocation" | "compileShader" | "detachShader" | "linkProgram"
        | "shaderSource" | "bufferData" | "bufferSubData" | "compressedTexImage2D"
        | "compressedTexSubImage2D" | "generateMipmap" | "texImage2D" | "texSubImage2D"
        | "renderbufferStorage" => Intercept::StateModifying(StatePush::Plain),
        "copyTexImage2D" | "copyTexSubImage2D" => Intercept::StateModifying(StatePush::CopyTexImage),
        "texParameterf" | "texParameteri" => Intercept::StateModifying(StatePush::TexParameter),

        "getError" => Intercept::GetError,
        "getExtension" => Intercept::GetExtension,
        "attachShader" => Intercept::AttachShader,
        "framebufferRenderbuffer" | "framebufferTexture2D" => Intercept::FramebufferAttachment,
        "bindBuffer" | "bindFramebuffer" | "bindRenderbuffer" => Intercept::BindTarget,
        "bindTexture" => Intercept::BindTexture,
        "useProgram" => Intercept::UseProgram,
        "vertexAttribPointer" => Intercept::VertexAttribPointer,
        _ => return None,
    };
    Some(intercept)
}

/// Runs the WebGL bookkeeping for one intercepted context call.
pub(crate) fn handle(
    intercept: Intercept,
    env: &mut Env<'_>,
    wrap: &mut WrapFunction<'_>,
) -> Result<(), HostError> {
    let gl_id = wrap.resource();
    match intercept {
        Intercept::StateModifying(push) => {
            let Some(resource) = current_binding(env, gl_id, &wrap.arg(0))? else {
                return Ok(());
            };
            let call = wrap.frozen_call(env)?;
            match push {
                StatePush::Plain => push_call(env, resource, call),
                StatePush::TexParameter => bound::push_tex_parameter(env, resource, call),
                StatePush::CopyTexImage => bound::push_copy_tex_image(env, resource, gl_id, call)?,
            }
        }
        Intercept::GetError => {
            let error = wrap.result(env)?.as_u32().unwrap_or(gl::NO_ERROR);
            if error != gl::NO_ERROR {
                clear_error(env.registry, gl_id, error);
            } else {
                let pending = next_error(env.registry, gl_id);
                if pending != gl::NO_ERROR {
                    wrap.override_result(env, pending.into())?;
                }
            }
        }
        Intercept::GetExtension => {
            if let Some(name) = wrap.arg(0).as_str() {
                add_extension(env.registry, gl_id, name);
            }
        }
        Intercept::AttachShader => {
            let Some(program) = current_binding(env, gl_id, &wrap.arg(0))? else {
                return Ok(());
            };
            let call = wrap.frozen_call(env)?;
            push_call(env, program, call);
            let shader = wrap.arg(1);
            if let Some(shader_id) = env.registry.for_value(&shader) {
                let key = format!("__attachShader_{}", program::shader_type(env.registry, shader_id));
                env.registry.register_bound_resource(program, &key, &shader);
            }
        }
        Intercept::FramebufferAttachment => {
            let Some(framebuffer) = current_binding(env, gl_id, &wrap.arg(0))? else {
                return Ok(());
            };
            let call = wrap.frozen_call(env)?;
            push_call(env, framebuffer, call);
            env.registry.register_bound_resource(
                framebuffer,
                "__framebufferAttachmentObjectName",
                &wrap.arg(3),
            );
        }
        Intercept::BindTarget => {
            let key = format!("__bindBuffer_{}", wrap.arg(0));
            env.registry.register_bound_resource(gl_id, &key, &wrap.arg(1));
        }
        Intercept::BindTexture => {
            let active = get_parameter(env, gl_id, gl::ACTIVE_TEXTURE)?;
            let key = format!("__bindTexture_{}_{}", wrap.arg(0), active);
            env.registry.register_bound_resource(gl_id, &key, &wrap.arg(1));
        }
        Intercept::UseProgram => {
            env.registry.register_bound_resource(gl_id, "__useProgram", &wrap.arg(0));
        }
        Intercept::VertexAttribPointer => {
            let buffer = get_parameter(env, gl_id, gl::ARRAY_BUFFER_BINDING)?;
            let key = format!("__vertexAttribPointer_{}", wrap.arg(0));
            env.registry.register_bound_resource(gl_id, &key, &buffer);
        }
        Intercept::Factory(_) | Intercept::Canvas2D(_) | Intercept::LogEverything => {}
    }
    Ok(())
}

/// Live context object of a resource.
pub(crate) fn gl_object(registry: &ResourceRegistry, id: ResourceId) -> Result<HostObject, HostError> {
    registry.wrapped_object(id).ok_or(HostError::Unbound(id))
}

pub(crate) fn get_parameter(
    env: &mut Env<'_>,
    gl_id: ResourceId,
    pname: u32,
) -> Result<Value, HostError> {
    let gl = gl_object(env.registry, gl_id)?;
    env.host.invoke(&gl, "getParameter", &[pname.into()])
}

/// Resource a call with `target` operates on.
///
/// A resource-valued target is the resource itself. A bind target resolves
/// to whatever is currently bound to it, which also records the bind call in
/// that resource's history.
pub(crate) fn current_binding(
    env: &mut Env<'_>,
    gl_id: ResourceId,
    target: &Value,
) -> Result<Option<ResourceId>, HostError> {
    if let Some(resource) = env.registry.for_value(target) {
        return Ok(Some(resource));
    }
    let Some(point) = target.as_u32().and_then(binding_point) else {
        tracing::error!(%target, "Unknown binding target");
        return Ok(None);
    };
    let bound = get_parameter(env, gl_id, point.parameter)?;
    let Some(resource) = env.registry.for_value(&bound) else {
        return Ok(None);
    };
    bound::push_binding(env, resource, gl_id, point.target, point.method);
    Ok(Some(resource))
}

fn gl_state_mut(registry: &mut ResourceRegistry, gl_id: ResourceId) -> Option<&mut GlContextState> {
    registry.get_mut(gl_id).and_then(|r| r.kind.gl_state_mut())
}

/// Drains every error from the live context, plus the pending ones.
pub(crate) fn get_all_errors(env: &mut Env<'_>, gl_id: ResourceId) -> Result<Vec<u32>, HostError> {
    let mut errors = Vec::new();
    if let Some(gl) = env.registry.wrapped_object(gl_id) {
        loop {
            let error = env
                .host
                .invoke(&gl, "getError", &[])?
                .as_u32()
                .unwrap_or(gl::NO_ERROR);
            if error == gl::NO_ERROR {
                break;
            }
            clear_error(env.registry, gl_id, error);
            errors.push(error);
        }
    }
    if let Some(pending) = gl_state_mut(env.registry, gl_id).and_then(|s| s.custom_errors.take()) {
        errors.extend(pending);
    }
    Ok(errors)
}

/// Makes `errors` the pending set again after a state query.
pub(crate) fn restore_errors(env: &mut Env<'_>, gl_id: ResourceId, errors: Vec<u32>) {
    if let Some(gl) = env.registry.wrapped_object(gl_id) {
        let mut raised = false;
        loop {
            match env.host.invoke(&gl, "getError", &[]) {
                Ok(error) if error.as_u32().unwrap_or(gl::NO_ERROR) != gl::NO_ERROR => raised = true,
                Ok(_) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "getError failed while restoring errors");
                    break;
                }
            }
        }
        if raised {
            tracing::warn!(resource = %gl_id, "GL error(s) raised while capturing context state");
        }
    }
    if let Some(state) = gl_state_mut(env.registry, gl_id) {
        state.custom_errors = (!errors.is_empty()).then(|| errors.into_iter().collect());
    }
}

pub(crate) fn clear_error(registry: &mut ResourceRegistry, gl_id: ResourceId, error: u32) {
    if let Some(errors) = gl_state_mut(registry, gl_id).and_then(|s| s.custom_errors.as_mut()) {
        errors.remove(&error);
    }
}

/// Oldest pending error, or `NO_ERROR` once none remain.
pub(crate) fn next_error(registry: &mut ResourceRegistry, gl_id: ResourceId) -> u32 {
    let Some(state) = gl_state_mut(registry, gl_id) else {
        return gl::NO_ERROR;
    };
    if let Some(error) = state.custom_errors.as_mut().and_then(|errors| errors.pop_first()) {
        return error;
    }
    state.custom_errors = None;
    gl::NO_ERROR
}

pub(crate) fn add_extension(registry: &mut ResourceRegistry, gl_id: ResourceId, name: &str) {
    if let Some(state) = gl_state_mut(registry, gl_id) {
        state.extensions.insert(name.to_lowercase());
    }
}
