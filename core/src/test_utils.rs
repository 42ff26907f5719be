//! Shared test utilities for unit tests

use crate::cloner::ValueCloner;
use crate::headless::HeadlessHost;
use crate::resource::{Env, IdAllocator, ResourceKind, ResourceRegistry};
use canvas_inspector_shared::ResourceId;

/// A capture world without an engine: a headless host plus the registry and
/// cloner that flatten and replay code borrow through [`Env`].
pub struct CaptureWorld {
    pub host: HeadlessHost,
    pub cloner: ValueCloner,
    pub registry: ResourceRegistry,
    pub ids: IdAllocator,
}

impl CaptureWorld {
    pub fn new() -> Self {
        Self {
            host: HeadlessHost::new(),
            cloner: ValueCloner::new(),
            registry: ResourceRegistry::new(),
            ids: IdAllocator::new(),
        }
    }

    pub fn env(&mut self) -> Env<'_> {
        Env {
            host: &mut self.host,
            cloner: &mut self.cloner,
            registry: &mut self.registry,
        }
    }

    /// Tracked WebGL context resource on a fresh canvas.
    pub fn webgl_context(&mut self, width: u32, height: u32) -> ResourceId {
        let context = self.host.create_webgl_context(width, height);
        self.track(context, "WebGLRenderingContext", ResourceKind::webgl_context())
    }

    /// Tracked 2D context resource on a fresh canvas.
    pub fn canvas2d_context(&mut self, width: u32, height: u32) -> ResourceId {
        let context = self.host.create_canvas2d_context(width, height);
        self.track(context, "CanvasRenderingContext2D", ResourceKind::Canvas2D)
    }

    fn track(
        &mut self,
        context: canvas_inspector_shared::HostObject,
        name: &str,
        kind: ResourceKind,
    ) -> ResourceId {
        let id = self.registry.create(&mut self.ids, context, name, kind);
        if let Some(resource) = self.registry.get_mut(id) {
            resource.tracked = true;
        }
        id
    }
}
