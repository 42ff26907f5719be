//! Resources that are bound to a context target before use: buffers,
//! textures, framebuffers and renderbuffers.

use std::collections::BTreeMap;

use canvas_inspector_shared::constants as gl;
use canvas_inspector_shared::{ResourceId, Value};

use super::{BINDING_POINTS, PIXEL_STORE_PARAMETERS, get_parameter, gl_object};
use crate::cache::Cache;
use crate::call::Call;
use crate::host::HostError;
use crate::resource::replayable::{ReplayableResource, replay_calls_base, replay_resource};
use crate::resource::{Env, ResourceKind, push_call, push_call_base};

/// Shadow state of a bound resource: the target it was last bound to in its
/// own history, and the parameters its history has set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundState {
    binding: Option<u32>,
    parameters: BTreeMap<u32, Value>,
}

impl BoundState {
    /// Texture state, starting from the GL defaults of the pixel-store parameters.
    pub fn texture() -> Self {
        let parameters = [
            (gl::PACK_ALIGNMENT, Value::Number(4.0)),
            (gl::UNPACK_ALIGNMENT, Value::Number(4.0)),
            (gl::UNPACK_COLORSPACE_CONVERSION_WEBGL, Value::from(gl::BROWSER_DEFAULT_WEBGL)),
            (gl::UNPACK_FLIP_Y_WEBGL, Value::Bool(false)),
            (gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL, Value::Bool(false)),
        ];
        Self {
            binding: None,
            parameters: parameters.into_iter().collect(),
        }
    }

    pub fn binding(&self) -> Option<u32> {
        self.binding
    }

    pub fn parameter(&self, pname: u32) -> Option<&Value> {
        self.parameters.get(&pname)
    }

    /// Stores `value`, returning whether it differed from the stored one.
    fn update(&mut self, pname: u32, value: &Value) -> bool {
        if self.parameters.get(&pname) == Some(value) {
            return false;
        }
        self.parameters.insert(pname, value.clone());
        true
    }
}

fn state_mut<'r>(env: &'r mut Env<'_>, id: ResourceId) -> Option<&'r mut BoundState> {
    env.registry.get_mut(id).and_then(|r| r.kind.bound_state_mut())
}

/// Records `method(target, resource)` unless the history already left the
/// resource bound to `target`.
pub(crate) fn push_binding(
    env: &mut Env<'_>,
    id: ResourceId,
    gl_id: ResourceId,
    target: u32,
    method: &str,
) {
    let Some(state) = state_mut(env, id) else {
        return;
    };
    if state.binding == Some(target) {
        return;
    }
    state.binding = Some(target);
    let call = Call::new(
        Value::Resource(gl_id),
        method,
        [target.into(), Value::Resource(id)],
        Value::Undefined,
    );
    push_call(env, id, call);
}

/// Texture push: emits a `pixelStorei` for every pixel-store parameter whose
/// live value differs from the texture's shadow state, then the call itself.
pub(crate) fn push_texture_call(env: &mut Env<'_>, id: ResourceId, call: Call) {
    if let Some(gl_id) = call.resource(env.registry) {
        if let Err(e) = sync_pixel_store(env, id, gl_id) {
            tracing::warn!(error = %e, texture = %id, "Failed to read pixel-store state");
        }
    }
    push_call_base(env, id, call);
}

fn sync_pixel_store(env: &mut Env<'_>, id: ResourceId, gl_id: ResourceId) -> Result<(), HostError> {
    for pname in PIXEL_STORE_PARAMETERS {
        let value = get_parameter(env, gl_id, pname)?;
        let changed = state_mut(env, id).is_some_and(|state| state.update(pname, &value));
        if changed {
            let call = Call::new(
                Value::Resource(gl_id),
                "pixelStorei",
                [pname.into(), value],
                Value::Undefined,
            );
            push_call_base(env, id, call);
        }
    }
    Ok(())
}

/// `texParameterf`/`texParameteri`: kept only when the parameter changes.
pub(crate) fn push_tex_parameter(env: &mut Env<'_>, id: ResourceId, call: Call) {
    let pname = call.args().get(1).and_then(Value::as_u32);
    let param = call.args().get(2).cloned().unwrap_or_default();
    let Some(pname) = pname else {
        push_call_base(env, id, call);
        return;
    };
    if state_mut(env, id).is_some_and(|state| state.update(pname, &param)) {
        push_call_base(env, id, call);
    }
}

/// `copyTexImage2D`/`copyTexSubImage2D` read from the bound framebuffer, so
/// its binding is recorded first. The framebuffer's own history is left
/// alone.
pub(crate) fn push_copy_tex_image(
    env: &mut Env<'_>,
    id: ResourceId,
    gl_id: ResourceId,
    call: Call,
) -> Result<(), HostError> {
    let bound = get_parameter(env, gl_id, gl::FRAMEBUFFER_BINDING)?;
    match env.registry.for_value(&bound) {
        Some(framebuffer) => {
            let bind = Call::new(
                Value::Resource(gl_id),
                "bindFramebuffer",
                [gl::FRAMEBUFFER.into(), Value::Resource(framebuffer)],
                Value::Undefined,
            );
            push_call(env, id, bind);
        }
        None => {
            // TODO: snapshot the drawing buffer into a scratch framebuffer so this case replays.
            tracing::error!(
                method = call.function_name(),
                "Cannot record a copy from the drawing buffer"
            );
        }
    }
    push_call(env, id, call);
    Ok(())
}

/// Replays the first receiver that is a WebGL context.
fn replay_context_resource(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    data: &ReplayableResource,
) -> Result<Option<ResourceId>, HostError> {
    for call in data.calls() {
        let Some(handle) = call.replayable_resource() else {
            continue;
        };
        let resource = replay_resource(env, source, handle)?;
        if matches!(env.registry.get(resource).map(|r| r.kind()), Some(ResourceKind::WebGLContext(_))) {
            return Ok(Some(resource));
        }
    }
    Ok(None)
}

/// Replays the history with all six context bindings saved and restored.
pub(crate) fn replay_bound(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    let Some(gl_id) = replay_context_resource(env, source, data)? else {
        tracing::error!(resource = %id, "No WebGL context in bound resource history");
        return replay_calls_base(env, source, id, data.calls());
    };
    let gl = gl_object(env.registry, gl_id)?;

    let mut original = Vec::with_capacity(BINDING_POINTS.len());
    for point in BINDING_POINTS {
        original.push(env.host.invoke(&gl, "getParameter", &[point.parameter.into()])?);
    }

    replay_calls_base(env, source, id, data.calls())?;

    for (point, binding) in BINDING_POINTS.iter().zip(original) {
        env.host.invoke(&gl, point.method, &[point.target.into(), binding])?;
    }
    Ok(())
}

/// Texture replay starts from the default pixel store, since the history only
/// records pixel-store changes relative to it. The ambient values are restored
/// afterwards.
pub(crate) fn replay_texture(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    let Some(gl_id) = replay_context_resource(env, source, data)? else {
        return replay_bound(env, source, id, data);
    };
    let gl = gl_object(env.registry, gl_id)?;
    let defaults = BoundState::texture();

    let mut ambient = Vec::with_capacity(PIXEL_STORE_PARAMETERS.len());
    for pname in PIXEL_STORE_PARAMETERS {
        ambient.push(env.host.invoke(&gl, "getParameter", &[pname.into()])?);
        let default = defaults.parameter(pname).cloned().unwrap_or_default();
        env.host.invoke(&gl, "pixelStorei", &[pname.into(), default])?;
    }

    replay_bound(env, source, id, data)?;

    for (pname, value) in PIXEL_STORE_PARAMETERS.into_iter().zip(ambient) {
        env.host.invoke(&gl, "pixelStorei", &[pname.into(), value])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_state_starts_at_gl_defaults() {
        let state = BoundState::texture();
        assert_eq!(state.parameter(gl::UNPACK_ALIGNMENT), Some(&Value::Number(4.0)));
        assert_eq!(state.parameter(gl::UNPACK_FLIP_Y_WEBGL), Some(&Value::Bool(false)));
        assert_eq!(state.binding(), None);
    }

    #[test]
    fn test_update_reports_changes_only() {
        let mut state = BoundState::default();
        assert!(state.update(gl::TEXTURE_MIN_FILTER, &gl::LINEAR.into()));
        assert!(!state.update(gl::TEXTURE_MIN_FILTER, &gl::LINEAR.into()));
        assert!(state.update(gl::TEXTURE_MIN_FILTER, &gl::NEAREST.into()));
    }
}
