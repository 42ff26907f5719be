//! Programs and shaders.

use canvas_inspector_shared::constants as gl;
use canvas_inspector_shared::{HostObject, ResourceId, Value};
use serde::Serialize;

use super::{get_all_errors, gl_object, restore_errors};
use crate::cache::Cache;
use crate::host::{Host, HostError};
use crate::resource::replayable::{ReplayableResource, Snapshot, replay_calls_base};
use crate::resource::{Env, ResourceRegistry};

/// Value of one active uniform at flatten time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniformSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: u32,
    pub value: Value,
}

/// Setter used to restore a uniform of the given GL type.
pub fn uniform_method(ty: u32) -> Option<&'static str> {
    let method = match ty {
        gl::FLOAT => "uniform1f",
        gl::FLOAT_VEC2 => "uniform2fv",
        gl::FLOAT_VEC3 => "uniform3fv",
        gl::FLOAT_VEC4 => "uniform4fv",
        gl::INT | gl::BOOL | gl::SAMPLER_2D | gl::SAMPLER_CUBE => "uniform1i",
        gl::INT_VEC2 | gl::BOOL_VEC2 => "uniform2iv",
        gl::INT_VEC3 | gl::BOOL_VEC3 => "uniform3iv",
        gl::INT_VEC4 | gl::BOOL_VEC4 => "uniform4iv",
        gl::FLOAT_MAT2 => "uniformMatrix2fv",
        gl::FLOAT_MAT3 => "uniformMatrix3fv",
        gl::FLOAT_MAT4 => "uniformMatrix4fv",
        _ => return None,
    };
    Some(method)
}

/// Shader type, read back from the `createShader` call that opens a shader's history.
pub fn shader_type(registry: &ResourceRegistry, shader: ResourceId) -> u32 {
    let first = registry.get(shader).and_then(|r| r.calls().first());
    match first {
        Some(call) if call.function_name() == "createShader" => {
            call.args().first().and_then(Value::as_u32).unwrap_or(0)
        }
        _ => {
            tracing::error!(resource = %shader, "Failed to restore shader type from the log");
            0
        }
    }
}

fn program_and_context(
    registry: &ResourceRegistry,
    id: ResourceId,
) -> Result<(HostObject, ResourceId, HostObject), HostError> {
    let program = registry.wrapped_object(id).ok_or(HostError::Unbound(id))?;
    let gl_id = registry.context_resource(id).ok_or(HostError::Unbound(id))?;
    let gl = gl_object(registry, gl_id)?;
    Ok((program, gl_id, gl))
}

/// Reads every active uniform without disturbing the application's error state.
pub(crate) fn snapshot_uniforms(env: &mut Env<'_>, id: ResourceId) -> Result<Vec<UniformSnapshot>, HostError> {
    let (program, gl_id, gl) = program_and_context(env.registry, id)?;
    let errors = get_all_errors(env, gl_id)?;
    let uniforms = read_uniforms(env.host, &gl, program);
    restore_errors(env, gl_id, errors);
    uniforms
}

fn read_uniforms(
    host: &mut dyn Host,
    gl: &HostObject,
    program: HostObject,
) -> Result<Vec<UniformSnapshot>, HostError> {
    let program = Value::Object(program);
    let count = host
        .invoke(gl, "getProgramParameter", &[program.clone(), gl::ACTIVE_UNIFORMS.into()])?
        .as_u32()
        .unwrap_or(0);

    let mut uniforms = Vec::new();
    for index in 0..count {
        let Some(info) = host
            .invoke(gl, "getActiveUniform", &[program.clone(), index.into()])?
            .as_object()
        else {
            continue;
        };
        let name = host.get_property(&info, "name")?;
        let Some(name) = name.as_str() else {
            continue;
        };
        let ty = host.get_property(&info, "type")?.as_u32().unwrap_or(0);
        let location = host.invoke(gl, "getUniformLocation", &[program.clone(), name.into()])?;
        if location.is_nullish() {
            continue;
        }
        let value = host.invoke(gl, "getUniform", &[program.clone(), location])?;
        uniforms.push(UniformSnapshot {
            name: name.to_string(),
            ty,
            value,
        });
    }
    Ok(uniforms)
}

/// Replays the history, then writes the snapshotted uniforms back with the
/// current program restored afterwards.
pub(crate) fn replay_program(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    replay_calls_base(env, source, id, data.calls())?;
    let Some(Snapshot::Program(uniforms)) = data.snapshot() else {
        return Ok(());
    };
    let (program, _, gl) = program_and_context(env.registry, id)?;
    let program = Value::Object(program);

    let original = env.host.invoke(&gl, "getParameter", &[gl::CURRENT_PROGRAM.into()])?;
    let mut current = original.clone();
    for uniform in uniforms {
        let location = env.host.invoke(
            &gl,
            "getUniformLocation",
            &[program.clone(), uniform.name.as_str().into()],
        )?;
        if location.is_nullish() {
            continue;
        }
        if current != program {
            current = program.clone();
            env.host.invoke(&gl, "useProgram", &[program.clone()])?;
        }
        let Some(method) = uniform_method(uniform.ty) else {
            debug_assert!(false, "unknown uniform type {}", uniform.ty);
            tracing::error!(ty = uniform.ty, name = %uniform.name, "Unknown uniform type");
            continue;
        };
        if method.contains("Matrix") {
            env.host
                .invoke(&gl, method, &[location, false.into(), uniform.value.clone()])?;
        } else {
            env.host.invoke(&gl, method, &[location, uniform.value.clone()])?;
        }
    }
    if current != original {
        env.host.invoke(&gl, "useProgram", &[original])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_methods_by_type() {
        assert_eq!(uniform_method(gl::FLOAT), Some("uniform1f"));
        assert_eq!(uniform_method(gl::FLOAT_VEC3), Some("uniform3fv"));
        assert_eq!(uniform_method(gl::BOOL_VEC2), Some("uniform2iv"));
        assert_eq!(uniform_method(gl::SAMPLER_CUBE), Some("uniform1i"));
        assert_eq!(uniform_method(gl::FLOAT_MAT4), Some("uniformMatrix4fv"));
        assert_eq!(uniform_method(gl::RGBA), None);
    }
}
