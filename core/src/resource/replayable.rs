//! Flattening resources into replayable form and reconstructing them.
//!
//! Both directions are cache-first: an entry for the resource id is inserted
//! before recursing into its calls, so a resource referenced from its own
//! history (or from a cycle) resolves to the entry already present.

use canvas_inspector_shared::{ResourceId, Value};

use super::{Env, Resource, ResourceKind};
use crate::cache::Cache;
use crate::call::ReplayableCall;
use crate::canvas2d::{self, Canvas2DSnapshot};
use crate::host::HostError;
use crate::webgl::bound;
use crate::webgl::program::{self, UniformSnapshot};
use crate::webgl::state::{self, GlContextSnapshot};

/// Kind-specific snapshot data captured alongside the call log.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Program(Vec<UniformSnapshot>),
    WebGLContext(Box<GlContextSnapshot>),
    Canvas2D(Box<Canvas2DSnapshot>),
}

/// Location-independent form of a [`Resource`].
#[derive(Debug, Clone)]
pub struct ReplayableResource {
    id: ResourceId,
    name: String,
    kind_id: u32,
    kind: ResourceKind,
    calls: Vec<ReplayableCall>,
    context_resource: Option<ResourceId>,
    snapshot: Option<Snapshot>,
}

impl ReplayableResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_id(&self) -> u32 {
        self.kind_id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn calls(&self) -> &[ReplayableCall] {
        &self.calls
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// `"<name>@<kindId>"`.
    pub fn description(&self) -> String {
        format!("{}@{}", self.name, self.kind_id)
    }

    /// The context resource handle, or this resource when it is its own root.
    pub fn replayable_context_resource(&self) -> ResourceId {
        self.context_resource.unwrap_or(self.id)
    }
}

/// Converts a resource (and everything it references) into `cache`.
///
/// Returns the handle under which it was stored. Calling this again with the
/// same cache returns immediately without touching the stored entry.
pub fn to_replayable(
    env: &mut Env<'_>,
    cache: &mut Cache<ReplayableResource>,
    id: ResourceId,
) -> ResourceId {
    if cache.has(id) {
        return id;
    }
    let Some(resource) = env.registry.get(id) else {
        debug_assert!(false, "flattening unknown resource {id}");
        tracing::error!(resource = %id, "Flattening unknown resource");
        return id;
    };
    let mut calls = resource.calls.clone();
    cache.put(
        id,
        ReplayableResource {
            id,
            name: resource.name().to_string(),
            kind_id: resource.kind_id(),
            kind: resource.kind.for_replay(),
            calls: Vec::new(),
            context_resource: None,
            snapshot: None,
        },
    );

    let replayable_calls: Vec<ReplayableCall> = calls
        .iter_mut()
        .map(|call| call.to_replayable(env, cache))
        .collect();
    let snapshot = populate_replayable_data(env, cache, id);
    let context_resource = match env.registry.context_resource(id) {
        Some(context) if context != id => Some(to_replayable(env, cache, context)),
        _ => None,
    };

    if let Some(entry) = cache.get_mut(id) {
        entry.calls = replayable_calls;
        entry.snapshot = snapshot;
        entry.context_resource = context_resource;
    }
    id
}

/// Resource-valued `value` as a handle; anything else unchanged.
pub(crate) fn value_to_replayable(
    env: &mut Env<'_>,
    cache: &mut Cache<ReplayableResource>,
    value: &Value,
) -> Value {
    match env.registry.for_value(value) {
        Some(id) => Value::Resource(to_replayable(env, cache, id)),
        None => value.clone(),
    }
}

fn populate_replayable_data(
    env: &mut Env<'_>,
    cache: &mut Cache<ReplayableResource>,
    id: ResourceId,
) -> Option<Snapshot> {
    let kind = env.registry.get(id).map(|r| r.kind.clone())?;
    let snapshot = match kind {
        ResourceKind::Program => program::snapshot_uniforms(env, id).map(Snapshot::Program),
        ResourceKind::WebGLContext(_) => {
            state::snapshot(env, cache, id).map(|s| Snapshot::WebGLContext(Box::new(s)))
        }
        ResourceKind::Canvas2D => canvas2d::snapshot(env, id).map(|s| Snapshot::Canvas2D(Box::new(s))),
        _ => return None,
    };
    match snapshot {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(error = %e, resource = %id, "Failed to snapshot resource state");
            None
        }
    }
}

/// Reconstructs the resource stored under `id` in `source` into `env`'s world.
///
/// Idempotent per world: a resource already present (or being reconstructed)
/// is returned as-is.
pub fn replay_resource(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
) -> Result<ResourceId, HostError> {
    if env.registry.has(id) {
        return Ok(id);
    }
    let Some(data) = source.get(id) else {
        debug_assert!(false, "replaying unknown resource {id}");
        tracing::error!(resource = %id, "Replaying unknown resource");
        return Ok(id);
    };
    env.registry
        .insert(Resource::new(id, data.name.clone(), data.kind_id, data.kind.clone()));

    do_replay_calls(env, source, id, data)?;

    if env.registry.wrapped_object(id).is_none() {
        debug_assert!(false, "resource {id} should be reconstructed");
        tracing::error!(resource = %id, "Resource was not reconstructed by replay");
    }
    Ok(id)
}

/// Resource handles resolve to their replayed host object; anything else is
/// passed through.
pub fn replay_value(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    value: &Value,
) -> Result<Value, HostError> {
    match value {
        Value::Resource(id) => {
            let id = replay_resource(env, source, *id)?;
            Ok(env.registry.wrapped_object(id).into())
        }
        other => Ok(other.clone()),
    }
}

fn do_replay_calls(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    match &data.kind {
        ResourceKind::Texture(_) => bound::replay_texture(env, source, id, data),
        ResourceKind::Buffer(_) | ResourceKind::Framebuffer(_) | ResourceKind::Renderbuffer(_) => {
            bound::replay_bound(env, source, id, data)
        }
        ResourceKind::Program => program::replay_program(env, source, id, data),
        ResourceKind::WebGLContext(_) => state::replay_context(env, source, id, data),
        ResourceKind::Canvas2D => canvas2d::replay_context(env, source, id, data),
        ResourceKind::Plain | ResourceKind::LogEverything | ResourceKind::Shader => {
            replay_calls_base(env, source, id, data.calls())
        }
    }
}

/// Replays `calls` in order and appends the results to `id`'s history.
pub(crate) fn replay_calls_base<'c>(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    calls: impl IntoIterator<Item = &'c ReplayableCall>,
) -> Result<(), HostError> {
    for call in calls {
        let replayed = call.replay(env, source)?;
        if let Some(resource) = env.registry.get_mut(id) {
            resource.calls.push(replayed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::cloner::ValueCloner;
    use crate::headless::HeadlessHost;
    use crate::host::Host;
    use crate::resource::{IdAllocator, ResourceRegistry, push_call};
    use canvas_inspector_shared::constants as gl;

    #[test]
    fn test_to_replayable_is_idempotent_per_cache() {
        let mut host = HeadlessHost::new();
        let gl_object = host.create_webgl_context(4, 4);
        let buffer_object = host.invoke(&gl_object, "createBuffer", &[]).unwrap().as_object().unwrap();

        let mut cloner = ValueCloner::new();
        let mut registry = ResourceRegistry::new();
        let mut ids = IdAllocator::new();
        let gl_id = registry.create(&mut ids, gl_object, "WebGLRenderingContext", ResourceKind::webgl_context());
        let buffer_id = registry.create(&mut ids, buffer_object, "WebGLBuffer", ResourceKind::buffer());

        let mut env = Env {
            host: &mut host,
            cloner: &mut cloner,
            registry: &mut registry,
        };
        push_call(
            &mut env,
            buffer_id,
            Call::new(Value::Resource(gl_id), "createBuffer", [], Value::Object(buffer_object)),
        );
        push_call(
            &mut env,
            buffer_id,
            Call::new(Value::Resource(gl_id), "bindBuffer", [gl::ARRAY_BUFFER.into(), Value::Object(buffer_object)], Value::Undefined),
        );

        let mut cache = Cache::new();
        let first = to_replayable(&mut env, &mut cache, buffer_id);
        let entry: *const ReplayableResource = cache.get(first).unwrap();
        let size = cache.size();
        let calls = cache.get(first).unwrap().calls().len();

        let second = to_replayable(&mut env, &mut cache, buffer_id);
        assert_eq!(first, second);
        assert!(std::ptr::eq(entry, cache.get(second).unwrap()));
        assert_eq!(cache.size(), size);
        assert_eq!(cache.get(second).unwrap().calls().len(), calls);

        // The buffer's own creation call references itself through the cache.
        let replayable = cache.get(buffer_id).unwrap();
        assert_eq!(replayable.calls()[0].result(), &Value::Resource(buffer_id));
        assert_eq!(replayable.replayable_context_resource(), gl_id);
        assert_eq!(replayable.description(), "WebGLBuffer@1");
        assert!(cache.has(gl_id));
    }
}
