//! Full WebGL context state: snapshot at flatten time, restore at replay.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use canvas_inspector_shared::constants as gl;
use canvas_inspector_shared::{HostObject, ResourceId, Value};

use super::{PIXEL_STORE_PARAMETERS, get_all_errors, gl_object, restore_errors};
use crate::cache::Cache;
use crate::host::HostError;
use crate::resource::replayable::{
    ReplayableResource, Snapshot, replay_calls_base, replay_value, value_to_replayable,
};
use crate::resource::Env;

bitflags! {
    /// Server-side capabilities toggled with `enable`/`disable`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u16 {
        const BLEND = 1 << 0;
        const CULL_FACE = 1 << 1;
        const DEPTH_TEST = 1 << 2;
        const DITHER = 1 << 3;
        const POLYGON_OFFSET_FILL = 1 << 4;
        const SAMPLE_ALPHA_TO_COVERAGE = 1 << 5;
        const SAMPLE_COVERAGE = 1 << 6;
        const SCISSOR_TEST = 1 << 7;
        const STENCIL_TEST = 1 << 8;
    }
}

const CAPABILITIES: [(Capabilities, u32); 9] = [
    (Capabilities::BLEND, gl::BLEND),
    (Capabilities::CULL_FACE, gl::CULL_FACE),
    (Capabilities::DEPTH_TEST, gl::DEPTH_TEST),
    (Capabilities::DITHER, gl::DITHER),
    (Capabilities::POLYGON_OFFSET_FILL, gl::POLYGON_OFFSET_FILL),
    (Capabilities::SAMPLE_ALPHA_TO_COVERAGE, gl::SAMPLE_ALPHA_TO_COVERAGE),
    (Capabilities::SAMPLE_COVERAGE, gl::SAMPLE_COVERAGE),
    (Capabilities::SCISSOR_TEST, gl::SCISSOR_TEST),
    (Capabilities::STENCIL_TEST, gl::STENCIL_TEST),
];

/// Parameters read with `getParameter` into the snapshot.
pub const STATE_PARAMETERS: [u32; 49] = [
    gl::ACTIVE_TEXTURE,
    gl::ARRAY_BUFFER_BINDING,
    gl::BLEND_COLOR,
    gl::BLEND_DST_ALPHA,
    gl::BLEND_DST_RGB,
    gl::BLEND_EQUATION_ALPHA,
    gl::BLEND_EQUATION_RGB,
    gl::BLEND_SRC_ALPHA,
    gl::BLEND_SRC_RGB,
    gl::COLOR_CLEAR_VALUE,
    gl::COLOR_WRITEMASK,
    gl::CULL_FACE_MODE,
    gl::CURRENT_PROGRAM,
    gl::DEPTH_CLEAR_VALUE,
    gl::DEPTH_FUNC,
    gl::DEPTH_RANGE,
    gl::DEPTH_WRITEMASK,
    gl::ELEMENT_ARRAY_BUFFER_BINDING,
    gl::FRAMEBUFFER_BINDING,
    gl::FRONT_FACE,
    gl::GENERATE_MIPMAP_HINT,
    gl::LINE_WIDTH,
    gl::PACK_ALIGNMENT,
    gl::POLYGON_OFFSET_FACTOR,
    gl::POLYGON_OFFSET_UNITS,
    gl::RENDERBUFFER_BINDING,
    gl::SAMPLE_COVERAGE_INVERT,
    gl::SAMPLE_COVERAGE_VALUE,
    gl::SCISSOR_BOX,
    gl::STENCIL_BACK_FAIL,
    gl::STENCIL_BACK_FUNC,
    gl::STENCIL_BACK_PASS_DEPTH_FAIL,
    gl::STENCIL_BACK_PASS_DEPTH_PASS,
    gl::STENCIL_BACK_REF,
    gl::STENCIL_BACK_VALUE_MASK,
    gl::STENCIL_BACK_WRITEMASK,
    gl::STENCIL_CLEAR_VALUE,
    gl::STENCIL_FAIL,
    gl::STENCIL_FUNC,
    gl::STENCIL_PASS_DEPTH_FAIL,
    gl::STENCIL_PASS_DEPTH_PASS,
    gl::STENCIL_REF,
    gl::STENCIL_VALUE_MASK,
    gl::STENCIL_WRITEMASK,
    gl::UNPACK_ALIGNMENT,
    gl::UNPACK_COLORSPACE_CONVERSION_WEBGL,
    gl::UNPACK_FLIP_Y_WEBGL,
    gl::UNPACK_PREMULTIPLY_ALPHA_WEBGL,
    gl::VIEWPORT,
];

/// Context ids tried in order when recreating a context for replay.
const CONTEXT_IDS: [&str; 4] = ["webgl", "experimental-webgl", "webkit-3d", "3d"];

/// One vertex attribute array slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexAttribState {
    pub buffer: Value,
    pub enabled: bool,
    pub size: Value,
    pub stride: Value,
    pub ty: Value,
    pub normalized: Value,
    pub current: Value,
    pub pointer: Value,
}

/// Textures bound on one texture unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureUnitState {
    pub texture_2d: Value,
    pub texture_cube_map: Value,
}

/// Everything needed to rebuild a context before replaying its history.
/// Resource-valued entries are replayable handles.
#[derive(Debug, Clone, Default)]
pub struct GlContextSnapshot {
    pub original_canvas: Option<HostObject>,
    pub context_attributes: Value,
    pub extensions: BTreeSet<String>,
    pub capabilities: Capabilities,
    pub parameters: BTreeMap<u32, Value>,
    pub vertex_attribs: Vec<VertexAttribState>,
    pub texture_units: Vec<TextureUnitState>,
}

pub(crate) fn snapshot(
    env: &mut Env<'_>,
    cache: &mut Cache<ReplayableResource>,
    id: ResourceId,
) -> Result<GlContextSnapshot, HostError> {
    let gl = gl_object(env.registry, id)?;
    let mut snapshot = GlContextSnapshot {
        original_canvas: env.host.get_property(&gl, "canvas")?.as_object(),
        context_attributes: env.host.invoke(&gl, "getContextAttributes", &[])?,
        extensions: env
            .registry
            .get(id)
            .and_then(|r| r.kind().gl_state())
            .map(|state| state.extensions.clone())
            .unwrap_or_default(),
        ..Default::default()
    };

    let errors = get_all_errors(env, id)?;
    let read = read_state(env, cache, &gl, &mut snapshot);
    restore_errors(env, id, errors);
    read.map(|()| snapshot)
}

fn read_state(
    env: &mut Env<'_>,
    cache: &mut Cache<ReplayableResource>,
    gl: &HostObject,
    snapshot: &mut GlContextSnapshot,
) -> Result<(), HostError> {
    for (flag, capability) in CAPABILITIES {
        let enabled = env.host.invoke(gl, "isEnabled", &[capability.into()])?;
        snapshot.capabilities.set(flag, enabled.is_truthy());
    }
    for pname in STATE_PARAMETERS {
        let value = env.host.invoke(gl, "getParameter", &[pname.into()])?;
        let value = value_to_replayable(env, cache, &value);
        snapshot.parameters.insert(pname, value);
    }

    let max_attribs = parameter_u32(env, gl, gl::MAX_VERTEX_ATTRIBS)?;
    for index in 0..max_attribs {
        let mut attrib = |pname: u32| env.host.invoke(gl, "getVertexAttrib", &[index.into(), pname.into()]);
        let buffer = attrib(gl::VERTEX_ATTRIB_ARRAY_BUFFER_BINDING)?;
        let enabled = attrib(gl::VERTEX_ATTRIB_ARRAY_ENABLED)?.is_truthy();
        let size = attrib(gl::VERTEX_ATTRIB_ARRAY_SIZE)?;
        let stride = attrib(gl::VERTEX_ATTRIB_ARRAY_STRIDE)?;
        let ty = attrib(gl::VERTEX_ATTRIB_ARRAY_TYPE)?;
        let normalized = attrib(gl::VERTEX_ATTRIB_ARRAY_NORMALIZED)?;
        let current = attrib(gl::CURRENT_VERTEX_ATTRIB)?;
        let pointer = env.host.invoke(
            gl,
            "getVertexAttribOffset",
            &[index.into(), gl::VERTEX_ATTRIB_ARRAY_POINTER.into()],
        )?;
        snapshot.vertex_attribs.push(VertexAttribState {
            buffer: value_to_replayable(env, cache, &buffer),
            enabled,
            size,
            stride,
            ty,
            normalized,
            current,
            pointer,
        });
    }

    let active_texture = env.host.invoke(gl, "getParameter", &[gl::ACTIVE_TEXTURE.into()])?;
    let max_units = parameter_u32(env, gl, gl::MAX_TEXTURE_IMAGE_UNITS)?;
    for unit in 0..max_units {
        env.host.invoke(gl, "activeTexture", &[(gl::TEXTURE0 + unit).into()])?;
        let texture_2d = env.host.invoke(gl, "getParameter", &[gl::TEXTURE_BINDING_2D.into()])?;
        let texture_cube_map =
            env.host.invoke(gl, "getParameter", &[gl::TEXTURE_BINDING_CUBE_MAP.into()])?;
        snapshot.texture_units.push(TextureUnitState {
            texture_2d: value_to_replayable(env, cache, &texture_2d),
            texture_cube_map: value_to_replayable(env, cache, &texture_cube_map),
        });
    }
    env.host.invoke(gl, "activeTexture", &[active_texture])?;
    Ok(())
}

fn parameter_u32(env: &mut Env<'_>, gl: &HostObject, pname: u32) -> Result<u32, HostError> {
    Ok(env
        .host
        .invoke(gl, "getParameter", &[pname.into()])?
        .as_u32()
        .unwrap_or(0))
}

/// Writes snapshot values back into a freshly created context.
struct StateWriter<'s, 'e, 'w> {
    env: &'e mut Env<'w>,
    source: &'s Cache<ReplayableResource>,
    gl: HostObject,
    state: &'s GlContextSnapshot,
}

impl StateWriter<'_, '_, '_> {
    fn parameter(&mut self, pname: u32) -> Result<Value, HostError> {
        let value = self.state.parameters.get(&pname).cloned().unwrap_or_default();
        replay_value(self.env, self.source, &value)
    }

    fn component(&self, pname: u32, index: usize) -> Value {
        self.state
            .parameters
            .get(&pname)
            .map(|value| value.element(index))
            .unwrap_or_default()
    }

    fn call(&mut self, method: &str, args: &[Value]) -> Result<(), HostError> {
        self.env.host.invoke(&self.gl, method, args).map(drop)
    }

    /// `method(prefix..., parameters...)`.
    fn apply(&mut self, method: &str, prefix: &[Value], pnames: &[u32]) -> Result<(), HostError> {
        let mut args = prefix.to_vec();
        for pname in pnames {
            args.push(self.parameter(*pname)?);
        }
        self.call(method, &args)
    }

    /// `method(p[0], ..., p[count - 1])` for an array-valued parameter.
    fn apply_components(&mut self, method: &str, pname: u32, count: usize) -> Result<(), HostError> {
        let args: Vec<Value> = (0..count).map(|i| self.component(pname, i)).collect();
        self.call(method, &args)
    }

    fn replay(&mut self, handle: &Value) -> Result<Value, HostError> {
        replay_value(self.env, self.source, handle)
    }

    fn write(&mut self) -> Result<(), HostError> {
        self.apply("bindFramebuffer", &[gl::FRAMEBUFFER.into()], &[gl::FRAMEBUFFER_BINDING])?;
        self.apply("bindRenderbuffer", &[gl::RENDERBUFFER.into()], &[gl::RENDERBUFFER_BINDING])?;

        for (flag, capability) in CAPABILITIES {
            let method = if self.state.capabilities.contains(flag) { "enable" } else { "disable" };
            self.call(method, &[capability.into()])?;
        }

        self.apply_components("blendColor", gl::BLEND_COLOR, 4)?;
        self.apply("blendEquationSeparate", &[], &[gl::BLEND_EQUATION_RGB, gl::BLEND_EQUATION_ALPHA])?;
        self.apply(
            "blendFuncSeparate",
            &[],
            &[gl::BLEND_SRC_RGB, gl::BLEND_DST_RGB, gl::BLEND_SRC_ALPHA, gl::BLEND_DST_ALPHA],
        )?;
        self.apply_components("clearColor", gl::COLOR_CLEAR_VALUE, 4)?;
        self.apply("clearDepth", &[], &[gl::DEPTH_CLEAR_VALUE])?;
        self.apply("clearStencil", &[], &[gl::STENCIL_CLEAR_VALUE])?;
        self.apply_components("colorMask", gl::COLOR_WRITEMASK, 4)?;
        self.apply("cullFace", &[], &[gl::CULL_FACE_MODE])?;
        self.apply("depthFunc", &[], &[gl::DEPTH_FUNC])?;
        self.apply("depthMask", &[], &[gl::DEPTH_WRITEMASK])?;
        self.apply_components("depthRange", gl::DEPTH_RANGE, 2)?;
        self.apply("frontFace", &[], &[gl::FRONT_FACE])?;
        self.apply("hint", &[gl::GENERATE_MIPMAP_HINT.into()], &[gl::GENERATE_MIPMAP_HINT])?;
        self.apply("lineWidth", &[], &[gl::LINE_WIDTH])?;

        for pname in PIXEL_STORE_PARAMETERS {
            self.apply("pixelStorei", &[pname.into()], &[pname])?;
        }

        self.apply("polygonOffset", &[], &[gl::POLYGON_OFFSET_FACTOR, gl::POLYGON_OFFSET_UNITS])?;
        self.apply("sampleCoverage", &[], &[gl::SAMPLE_COVERAGE_VALUE, gl::SAMPLE_COVERAGE_INVERT])?;
        self.apply(
            "stencilFuncSeparate",
            &[gl::FRONT.into()],
            &[gl::STENCIL_FUNC, gl::STENCIL_REF, gl::STENCIL_VALUE_MASK],
        )?;
        self.apply(
            "stencilFuncSeparate",
            &[gl::BACK.into()],
            &[gl::STENCIL_BACK_FUNC, gl::STENCIL_BACK_REF, gl::STENCIL_BACK_VALUE_MASK],
        )?;
        self.apply(
            "stencilOpSeparate",
            &[gl::FRONT.into()],
            &[gl::STENCIL_FAIL, gl::STENCIL_PASS_DEPTH_FAIL, gl::STENCIL_PASS_DEPTH_PASS],
        )?;
        self.apply(
            "stencilOpSeparate",
            &[gl::BACK.into()],
            &[gl::STENCIL_BACK_FAIL, gl::STENCIL_BACK_PASS_DEPTH_FAIL, gl::STENCIL_BACK_PASS_DEPTH_PASS],
        )?;
        self.apply("stencilMaskSeparate", &[gl::FRONT.into()], &[gl::STENCIL_WRITEMASK])?;
        self.apply("stencilMaskSeparate", &[gl::BACK.into()], &[gl::STENCIL_BACK_WRITEMASK])?;
        self.apply_components("scissor", gl::SCISSOR_BOX, 4)?;
        self.apply_components("viewport", gl::VIEWPORT, 4)?;
        self.apply("useProgram", &[], &[gl::CURRENT_PROGRAM])?;

        self.write_vertex_attribs()?;
        self.apply("bindBuffer", &[gl::ARRAY_BUFFER.into()], &[gl::ARRAY_BUFFER_BINDING])?;
        self.apply(
            "bindBuffer",
            &[gl::ELEMENT_ARRAY_BUFFER.into()],
            &[gl::ELEMENT_ARRAY_BUFFER_BINDING],
        )?;

        self.write_texture_units()?;
        self.apply("activeTexture", &[], &[gl::ACTIVE_TEXTURE])
    }

    fn write_vertex_attribs(&mut self) -> Result<(), HostError> {
        let max_attribs = parameter_u32(self.env, &self.gl, gl::MAX_VERTEX_ATTRIBS)?;
        for index in 0..max_attribs {
            let attrib = self
                .state
                .vertex_attribs
                .get(index as usize)
                .cloned()
                .unwrap_or_default();
            let toggle = if attrib.enabled { "enableVertexAttribArray" } else { "disableVertexAttribArray" };
            self.call(toggle, &[index.into()])?;
            if attrib.current.is_truthy() {
                self.call("vertexAttrib4fv", &[index.into(), attrib.current.clone()])?;
            }
            let buffer = self.replay(&attrib.buffer)?;
            if buffer.as_object().is_some() {
                self.call("bindBuffer", &[gl::ARRAY_BUFFER.into(), buffer])?;
                self.call(
                    "vertexAttribPointer",
                    &[
                        index.into(),
                        attrib.size,
                        attrib.ty,
                        attrib.normalized,
                        attrib.stride,
                        attrib.pointer,
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn write_texture_units(&mut self) -> Result<(), HostError> {
        let max_units = parameter_u32(self.env, &self.gl, gl::MAX_TEXTURE_IMAGE_UNITS)?;
        for unit in 0..max_units {
            self.call("activeTexture", &[(gl::TEXTURE0 + unit).into()])?;
            let bindings = self
                .state
                .texture_units
                .get(unit as usize)
                .cloned()
                .unwrap_or_default();
            let texture_2d = self.replay(&bindings.texture_2d)?;
            self.call("bindTexture", &[gl::TEXTURE_2D.into(), texture_2d])?;
            let texture_cube_map = self.replay(&bindings.texture_cube_map)?;
            self.call("bindTexture", &[gl::TEXTURE_CUBE_MAP.into(), texture_cube_map])?;
        }
        Ok(())
    }
}

/// Recreates the context on a clone of its original canvas, restores the
/// snapshotted state and replays the context's own calls.
pub(crate) fn replay_context(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    let Some(Snapshot::WebGLContext(state)) = data.snapshot() else {
        tracing::error!(resource = %id, "WebGL context has no state snapshot");
        return replay_calls_base(env, source, id, data.calls());
    };
    if let Some(gl_state) = env.registry.get_mut(id).and_then(|r| r.kind.gl_state_mut()) {
        gl_state.custom_errors = None;
        gl_state.extensions = state.extensions.clone();
    }

    let original_canvas = state.original_canvas.ok_or(HostError::Unbound(id))?;
    let canvas = env.host.clone_node(&original_canvas)?;
    let mut context = None;
    for context_id in CONTEXT_IDS {
        let created = env.host.invoke(
            &canvas,
            "getContext",
            &[context_id.into(), state.context_attributes.clone()],
        )?;
        if let Some(object) = created.as_object() {
            context = Some(object);
            break;
        }
    }
    let Some(gl) = context else {
        return Err(HostError::InvalidArgument {
            method: "getContext".to_string(),
            reason: "no WebGL context available for replay".to_string(),
        });
    };
    env.registry.set_wrapped_object(id, gl);

    for name in &state.extensions {
        env.host.invoke(&gl, "getExtension", &[name.as_str().into()])?;
    }

    StateWriter {
        env: &mut *env,
        source,
        gl,
        state,
    }
    .write()?;

    replay_calls_base(env, source, id, data.calls())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table_covers_every_flag() {
        let all = CAPABILITIES
            .iter()
            .fold(Capabilities::empty(), |acc, (flag, _)| acc | *flag);
        assert_eq!(all, Capabilities::all());
    }

    #[test]
    fn test_state_parameters_include_pixel_store() {
        for pname in PIXEL_STORE_PARAMETERS {
            assert!(STATE_PARAMETERS.contains(&pname));
        }
    }
}
