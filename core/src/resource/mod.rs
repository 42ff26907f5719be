//! Resources: tracked wrappers around host objects.
//!
//! A [`Resource`] owns the call history of one host object (a context, a
//! buffer, a gradient...). Each capture or replay world keeps its resources in
//! a [`ResourceRegistry`], which doubles as the side table mapping host
//! objects back to the resource that wraps them.
//!
//! Replay policy differs per [`ResourceKind`]; the kind-specific behaviour
//! lives in [`crate::webgl`] and [`crate::canvas2d`] and is dispatched from
//! here and from [`replayable`].

pub mod intercept;
pub mod replayable;

use std::collections::{BTreeMap, BTreeSet};

use canvas_inspector_shared::{HostObject, ObjectId, ResourceId, Value};
use hashbrown::{HashMap, HashSet};

use crate::cache::Cache;
use crate::call::Call;
use crate::cloner::ValueCloner;
use crate::host::Host;
use crate::webgl::bound::{self, BoundState};

/// Replay-policy variant of a resource, with its kind-specific shadow state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    /// No replay policy beyond re-running its calls.
    Plain,
    /// Records every method call verbatim (gradients, patterns).
    LogEverything,
    Texture(BoundState),
    Buffer(BoundState),
    Framebuffer(BoundState),
    Renderbuffer(BoundState),
    Program,
    Shader,
    WebGLContext(GlContextState),
    Canvas2D,
}

/// Error and extension bookkeeping of a WebGL context resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlContextState {
    /// Errors drained from the real context that the application has not
    /// read yet; `None` until a snapshot drains something.
    pub custom_errors: Option<BTreeSet<u32>>,
    /// Lower-cased names of enabled extensions.
    pub extensions: BTreeSet<String>,
}

impl ResourceKind {
    pub fn texture() -> Self {
        ResourceKind::Texture(BoundState::texture())
    }

    pub fn buffer() -> Self {
        ResourceKind::Buffer(BoundState::default())
    }

    pub fn framebuffer() -> Self {
        ResourceKind::Framebuffer(BoundState::default())
    }

    pub fn renderbuffer() -> Self {
        ResourceKind::Renderbuffer(BoundState::default())
    }

    pub fn webgl_context() -> Self {
        ResourceKind::WebGLContext(GlContextState::default())
    }

    /// Whether resources of this kind are roots of their ownership chain.
    pub fn is_context(&self) -> bool {
        matches!(self, ResourceKind::WebGLContext(_) | ResourceKind::Canvas2D)
    }

    pub fn bound_state(&self) -> Option<&BoundState> {
        match self {
            ResourceKind::Texture(state)
            | ResourceKind::Buffer(state)
            | ResourceKind::Framebuffer(state)
            | ResourceKind::Renderbuffer(state) => Some(state),
            _ => None,
        }
    }

    pub fn bound_state_mut(&mut self) -> Option<&mut BoundState> {
        match self {
            ResourceKind::Texture(state)
            | ResourceKind::Buffer(state)
            | ResourceKind::Framebuffer(state)
            | ResourceKind::Renderbuffer(state) => Some(state),
            _ => None,
        }
    }

    pub fn gl_state(&self) -> Option<&GlContextState> {
        match self {
            ResourceKind::WebGLContext(state) => Some(state),
            _ => None,
        }
    }

    pub fn gl_state_mut(&mut self) -> Option<&mut GlContextState> {
        match self {
            ResourceKind::WebGLContext(state) => Some(state),
            _ => None,
        }
    }

    /// Copy of this kind as stored in replayable form. Pending custom errors
    /// belong to the live context and are not carried over.
    pub(crate) fn for_replay(&self) -> Self {
        match self {
            ResourceKind::WebGLContext(state) => ResourceKind::WebGLContext(GlContextState {
                custom_errors: None,
                extensions: state.extensions.clone(),
            }),
            other => other.clone(),
        }
    }
}

/// One tracked host object and its call history.
#[derive(Debug, Clone)]
pub struct Resource {
    id: ResourceId,
    name: String,
    kind_id: u32,
    pub(crate) kind: ResourceKind,
    pub(crate) calls: Vec<Call>,
    wrapped: Option<HostObject>,
    bound_resources: BTreeMap<String, ResourceId>,
    pub(crate) tracked: bool,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, name: impl Into<String>, kind_id: u32, kind: ResourceKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind_id,
            kind,
            calls: Vec::new(),
            wrapped: None,
            bound_resources: BTreeMap::new(),
            tracked: false,
        }
    }

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

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn wrapped_object(&self) -> Option<HostObject> {
        self.wrapped
    }

    pub fn bound_resources(&self) -> &BTreeMap<String, ResourceId> {
        &self.bound_resources
    }

    /// Whether calls through this resource are routed to the tracking manager.
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// `"<name>@<kindId>"`.
    pub fn description(&self) -> String {
        format!("{}@{}", self.name, self.kind_id)
    }

    /// The value handed to the application in place of the wrapped object.
    ///
    /// Objects with nothing to intercept are handed out as themselves.
    pub fn proxy_object(&self) -> Value {
        match self.wrapped {
            Some(object) if !object.class.is_interceptable() => Value::Object(object),
            _ => Value::Resource(self.id),
        }
    }
}

/// Allocates resource ids and per-name kind ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last_id: u64,
    kind_ids: HashMap<String, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next process-wide id, and the next kind id for `name` (starting at 1).
    pub fn next(&mut self, name: &str) -> (ResourceId, u32) {
        self.last_id += 1;
        let kind_id = self.kind_ids.entry_ref(name).or_insert(0);
        *kind_id += 1;
        (ResourceId(self.last_id), *kind_id)
    }
}

/// All resources of one world, plus the host-object side table.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Cache<Resource>,
    objects: HashMap<ObjectId, ResourceId>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, id: ResourceId) -> bool {
        self.resources.has(id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Allocates and stores a new resource wrapping `object`.
    pub(crate) fn create(
        &mut self,
        ids: &mut IdAllocator,
        object: HostObject,
        name: &str,
        kind: ResourceKind,
    ) -> ResourceId {
        let (id, kind_id) = ids.next(name);
        self.insert(Resource::new(id, name, kind_id, kind));
        self.set_wrapped_object(id, object);
        id
    }

    pub(crate) fn insert(&mut self, resource: Resource) {
        let id = resource.id;
        if let Some(object) = resource.wrapped {
            self.objects.insert(object.id, id);
        }
        self.resources.put(id, resource);
    }

    /// Binds the live host object of a resource and records it in the side table.
    pub(crate) fn set_wrapped_object(&mut self, id: ResourceId, object: HostObject) {
        if let Some(previous) = self.objects.get(&object.id).copied() {
            debug_assert_eq!(previous, id, "host object is already wrapped by another resource");
            if previous != id {
                tracing::error!(object = object.id, %previous, resource = %id, "Host object already wrapped");
                return;
            }
        }
        let Some(resource) = self.resources.get_mut(id) else {
            return;
        };
        if let Some(old) = resource.wrapped.replace(object) {
            self.objects.remove(&old.id);
        }
        self.objects.insert(object.id, id);
    }

    /// Resource behind a value: the resource itself for a handle, the
    /// wrapping resource for a tracked host object.
    pub fn for_value(&self, value: &Value) -> Option<ResourceId> {
        match value {
            Value::Resource(id) if self.resources.has(*id) => Some(*id),
            Value::Object(object) => self.objects.get(&object.id).copied(),
            _ => None,
        }
    }

    pub fn for_object(&self, object: &HostObject) -> Option<ResourceId> {
        self.objects.get(&object.id).copied()
    }

    pub fn wrapped_object(&self, id: ResourceId) -> Option<HostObject> {
        self.resources.get(id).and_then(Resource::wrapped_object)
    }

    /// The host value to pass to the real implementation in place of `value`.
    pub fn unwrap_value(&self, value: &Value) -> Value {
        match value {
            Value::Resource(id) => self.wrapped_object(*id).into(),
            other => other.clone(),
        }
    }

    pub(crate) fn unwrap_args(&self, args: &[Value]) -> Vec<Value> {
        args.iter().map(|arg| self.unwrap_value(arg)).collect()
    }

    /// Keeps the resource behind `value` reachable from `id` under `key`, or
    /// forgets the key when `value` is not a resource.
    pub(crate) fn register_bound_resource(&mut self, id: ResourceId, key: &str, value: &Value) {
        let bound = self.for_value(value);
        let Some(resource) = self.resources.get_mut(id) else {
            return;
        };
        match bound {
            Some(bound) => {
                resource.bound_resources.insert(key.to_string(), bound);
            }
            None => {
                resource.bound_resources.remove(key);
            }
        }
    }

    /// Nearest context resource reached by walking call receivers.
    ///
    /// Resources still being walked count as "not found yet", so cyclic call
    /// graphs terminate.
    pub fn context_resource(&self, id: ResourceId) -> Option<ResourceId> {
        let mut visiting = HashSet::new();
        let found = self.find_context_resource(id, &mut visiting);
        if found.is_none() {
            tracing::error!(resource = %id, "Failed to find context resource");
        }
        found
    }

    fn find_context_resource(
        &self,
        id: ResourceId,
        visiting: &mut HashSet<ResourceId>,
    ) -> Option<ResourceId> {
        let resource = self.get(id)?;
        if resource.kind.is_context() {
            return Some(id);
        }
        if !visiting.insert(id) {
            return None;
        }
        let found = resource
            .calls
            .iter()
            .filter_map(|call| self.for_value(call.receiver()))
            .find_map(|receiver| self.find_context_resource(receiver, visiting));
        visiting.remove(&id);
        found
    }
}

/// Mutable view of one world handed to flatten, replay and bookkeeping code.
pub struct Env<'a> {
    pub host: &'a mut dyn Host,
    pub cloner: &'a mut ValueCloner,
    pub registry: &'a mut ResourceRegistry,
}

/// Appends a call to a resource's history, applying its kind's policy.
pub(crate) fn push_call(env: &mut Env<'_>, id: ResourceId, call: Call) {
    let is_texture = matches!(
        env.registry.get(id).map(Resource::kind),
        Some(ResourceKind::Texture(_))
    );
    if is_texture {
        bound::push_texture_call(env, id, call);
    } else {
        push_call_base(env, id, call);
    }
}

/// Freezes and appends, with no kind policy.
pub(crate) fn push_call_base(env: &mut Env<'_>, id: ResourceId, mut call: Call) {
    call.freeze(env);
    if let Some(resource) = env.registry.get_mut(id) {
        resource.calls.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_inspector_shared::ObjectClass;

    fn object(id: u64, class: ObjectClass) -> HostObject {
        HostObject::new(id, class)
    }

    #[test]
    fn test_id_allocator_counts_kind_ids_per_name() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next("WebGLBuffer"), (ResourceId(1), 1));
        assert_eq!(ids.next("WebGLTexture"), (ResourceId(2), 1));
        assert_eq!(ids.next("WebGLBuffer"), (ResourceId(3), 2));
    }

    #[test]
    fn test_for_value_resolves_handles_and_objects() {
        let mut ids = IdAllocator::new();
        let mut registry = ResourceRegistry::new();
        let gl = object(10, ObjectClass::WebGLRenderingContext);
        let id = registry.create(&mut ids, gl, "WebGLRenderingContext", ResourceKind::webgl_context());

        assert_eq!(registry.for_value(&Value::Resource(id)), Some(id));
        assert_eq!(registry.for_value(&Value::Object(gl)), Some(id));
        assert_eq!(registry.for_value(&Value::Resource(ResourceId(99))), None);
        assert_eq!(registry.for_value(&Value::Number(10.0)), None);
        assert_eq!(registry.unwrap_value(&Value::Resource(id)), Value::Object(gl));
    }

    #[test]
    fn test_proxy_object_only_for_interceptable_classes() {
        let mut ids = IdAllocator::new();
        let mut registry = ResourceRegistry::new();
        let buffer = object(1, ObjectClass::WebGLBuffer);
        let context = object(2, ObjectClass::CanvasRenderingContext2D);
        let buffer_id = registry.create(&mut ids, buffer, "WebGLBuffer", ResourceKind::buffer());
        let context_id = registry.create(&mut ids, context, "CanvasRenderingContext2D", ResourceKind::Canvas2D);

        assert_eq!(registry.get(buffer_id).unwrap().proxy_object(), Value::Object(buffer));
        assert_eq!(
            registry.get(context_id).unwrap().proxy_object(),
            Value::Resource(context_id)
        );
        assert_eq!(registry.get(buffer_id).unwrap().description(), "WebGLBuffer@1");
    }

    #[test]
    fn test_register_bound_resource_forgets_non_resources() {
        let mut ids = IdAllocator::new();
        let mut registry = ResourceRegistry::new();
        let ctx = registry.create(&mut ids, object(1, ObjectClass::CanvasRenderingContext2D), "CanvasRenderingContext2D", ResourceKind::Canvas2D);
        let gradient = registry.create(&mut ids, object(2, ObjectClass::CanvasGradient), "CanvasGradient", ResourceKind::LogEverything);

        registry.register_bound_resource(ctx, "fillStyle", &Value::Resource(gradient));
        assert_eq!(registry.get(ctx).unwrap().bound_resources().get("fillStyle"), Some(&gradient));

        registry.register_bound_resource(ctx, "fillStyle", &"red".into());
        assert!(registry.get(ctx).unwrap().bound_resources().is_empty());
    }

    #[test]
    fn test_context_resource_survives_cycles() {
        let mut ids = IdAllocator::new();
        let mut registry = ResourceRegistry::new();
        let gl = registry.create(&mut ids, object(1, ObjectClass::WebGLRenderingContext), "WebGLRenderingContext", ResourceKind::webgl_context());
        let a = registry.create(&mut ids, object(2, ObjectClass::WebGLTexture), "WebGLTexture", ResourceKind::texture());
        let b = registry.create(&mut ids, object(3, ObjectClass::WebGLFramebuffer), "WebGLFramebuffer", ResourceKind::framebuffer());

        // A's first call goes through B, and B's only call goes back through A.
        registry.get_mut(a).unwrap().calls = vec![
            Call::new(Value::Resource(b), "touch", [], Value::Undefined),
            Call::new(Value::Resource(gl), "createTexture", [], Value::Resource(a)),
        ];
        registry.get_mut(b).unwrap().calls =
            vec![Call::new(Value::Resource(a), "touch", [], Value::Undefined)];

        assert_eq!(registry.context_resource(a), Some(gl));
        assert_eq!(registry.context_resource(gl), Some(gl));
        // B reaches the context through A's second call.
        assert_eq!(registry.context_resource(b), Some(gl));
    }
}
