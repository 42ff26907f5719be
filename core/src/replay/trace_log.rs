//! Append-only log of one capture session.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use canvas_inspector_shared::ResourceId;

use crate::cache::Cache;
use crate::call::{Call, ReplayableCall};
use crate::resource::Env;
use crate::resource::replayable::{ReplayableResource, to_replayable};

/// A trace log is written by the manager and read by any number of players.
pub type SharedTraceLog = Rc<RefCell<TraceLog>>;

/// Replayable calls of one capture session and every resource they reference.
#[derive(Debug, Default)]
pub struct TraceLog {
    calls: Vec<ReplayableCall>,
    resources: Cache<ReplayableResource>,
    frame_end_indexes: BTreeSet<usize>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTraceLog {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn size(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn replayable_calls(&self) -> &[ReplayableCall] {
        &self.calls
    }

    pub fn replayable_resource(&self, id: ResourceId) -> Option<&ReplayableResource> {
        self.resources.get(id)
    }

    /// Flattened resources, keyed by id.
    pub fn resources(&self) -> &Cache<ReplayableResource> {
        &self.resources
    }

    /// Flattens `id` into the log without adding a call.
    pub fn capture_resource(&mut self, env: &mut Env<'_>, id: ResourceId) {
        to_replayable(env, &mut self.resources, id);
    }

    pub fn add_call(&mut self, env: &mut Env<'_>, call: &mut Call) {
        let replayable = call.to_replayable(env, &mut self.resources);
        self.calls.push(replayable);
    }

    /// Marks the last call as ending a frame. No-op on an empty log.
    pub fn add_frame_end_mark(&mut self) {
        if let Some(index) = self.calls.len().checked_sub(1) {
            self.frame_end_indexes.insert(index);
        }
    }

    pub fn is_frame_end_call_at(&self, index: usize) -> bool {
        self.frame_end_indexes.contains(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CaptureWorld;
    use canvas_inspector_shared::Value;

    #[test]
    fn test_frame_end_mark_on_empty_log_is_noop() {
        let mut log = TraceLog::new();
        log.add_frame_end_mark();
        assert!(!log.is_frame_end_call_at(0));
        assert!(log.is_empty());
    }

    #[test]
    fn test_add_call_flattens_receiver() {
        let mut world = CaptureWorld::new();
        let gl = world.webgl_context(4, 4);
        let mut log = TraceLog::new();

        let mut call = Call::new(Value::Resource(gl), "clearColor", [1.0.into(), 0.0.into(), 0.0.into(), 1.0.into()], Value::Undefined);
        log.add_call(&mut world.env(), &mut call);
        log.add_frame_end_mark();

        assert_eq!(log.size(), 1);
        assert!(log.is_frame_end_call_at(0));
        assert_eq!(log.replayable_calls()[0].replayable_resource(), Some(gl));
        let resource = log.replayable_resource(gl).unwrap();
        assert_eq!(resource.description(), "WebGLRenderingContext@1");
    }
}
