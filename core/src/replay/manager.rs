//! Resource tracking manager
//!
//! Owns the capture switch and the trace log currently being written.

use std::rc::Rc;

use canvas_inspector_shared::{ResourceId, Value};

use super::trace_log::{SharedTraceLog, TraceLog};
use crate::call::Call;
use crate::resource::Env;

/// Capture state of one inspector session.
#[derive(Debug, Default)]
pub struct ResourceTrackingManager {
    capturing: bool,
    stop_on_frame_end: bool,
    last_trace_log: Option<SharedTraceLog>,
}

impl ResourceTrackingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if calls are being recorded
    pub fn capturing(&self) -> bool {
        self.capturing
    }

    /// The trace log written by the latest capture
    pub fn last_trace_log(&self) -> Option<&SharedTraceLog> {
        self.last_trace_log.as_ref()
    }

    fn is_last(&self, trace_log: &SharedTraceLog) -> bool {
        self.last_trace_log
            .as_ref()
            .is_some_and(|last| Rc::ptr_eq(last, trace_log))
    }

    /// Start capturing into a new trace log, or keep writing the current one
    /// if a capture is already running. Returns the log being written.
    pub fn start_capturing(&mut self) -> SharedTraceLog {
        let trace_log = match &self.last_trace_log {
            Some(log) if self.capturing => Rc::clone(log),
            _ => TraceLog::shared(),
        };
        self.last_trace_log = Some(Rc::clone(&trace_log));
        self.capturing = true;
        self.stop_on_frame_end = false;
        tracing::debug!("Capture started");
        trace_log
    }

    /// Stop capturing and mark the end of the current frame.
    ///
    /// With `Some(log)`, only stops if `log` is the one being written.
    pub fn stop_capturing(&mut self, trace_log: Option<&SharedTraceLog>) {
        if trace_log.is_some_and(|log| !self.is_last(log)) {
            return;
        }
        self.capturing = false;
        self.stop_on_frame_end = false;
        if let Some(last) = &self.last_trace_log {
            last.borrow_mut().add_frame_end_mark();
        }
        tracing::debug!("Capture stopped");
    }

    /// Stop writing `trace_log` and forget it.
    pub fn drop_trace_log(&mut self, trace_log: &SharedTraceLog) {
        self.stop_capturing(Some(trace_log));
        if self.is_last(trace_log) {
            self.last_trace_log = None;
        }
    }

    /// Capture into a new trace log until the next frame end.
    pub fn capture_frame(&mut self) -> SharedTraceLog {
        let trace_log = TraceLog::shared();
        self.last_trace_log = Some(Rc::clone(&trace_log));
        self.capturing = true;
        self.stop_on_frame_end = true;
        tracing::debug!("Single-frame capture started");
        trace_log
    }

    /// Flattens `resource` and every resource among `args` into the active log.
    pub fn capture_arguments(&mut self, env: &mut Env<'_>, resource: ResourceId, args: &[Value]) {
        let Some(log) = self.active_log() else {
            return;
        };
        let mut log = log.borrow_mut();
        log.capture_resource(env, resource);
        for arg in args {
            if let Some(id) = env.registry.for_value(arg) {
                log.capture_resource(env, id);
            }
        }
    }

    pub fn capture_call(&mut self, env: &mut Env<'_>, call: &mut Call) {
        if let Some(log) = self.active_log() {
            log.borrow_mut().add_call(env, call);
        }
    }

    /// Marks a frame boundary, ending a single-frame capture that recorded
    /// at least one call.
    pub fn mark_frame_end(&mut self) {
        let Some(last) = self.last_trace_log.clone() else {
            return;
        };
        last.borrow_mut().add_frame_end_mark();
        if self.stop_on_frame_end && !last.borrow().is_empty() {
            self.stop_capturing(Some(&last));
        }
    }

    fn active_log(&self) -> Option<&SharedTraceLog> {
        if self.capturing {
            self.last_trace_log.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CaptureWorld;

    fn draw_call(context: ResourceId) -> Call {
        Call::new(Value::Resource(context), "fillRect", [0.into(), 0.into(), 1.into(), 1.into()], Value::Undefined)
    }

    #[test]
    fn test_calls_outside_capture_are_ignored() {
        let mut world = CaptureWorld::new();
        let context = world.canvas2d_context(4, 4);
        let mut manager = ResourceTrackingManager::new();

        manager.capture_call(&mut world.env(), &mut draw_call(context));
        assert!(manager.last_trace_log().is_none());

        manager.start_capturing();
        manager.stop_capturing(None);
        manager.capture_call(&mut world.env(), &mut draw_call(context));
        assert!(manager.last_trace_log().unwrap().borrow().is_empty());
    }

    #[test]
    fn test_start_capturing_twice_keeps_log() {
        let mut manager = ResourceTrackingManager::new();
        manager.start_capturing();
        let first = Rc::clone(manager.last_trace_log().unwrap());
        manager.start_capturing();
        assert!(Rc::ptr_eq(&first, manager.last_trace_log().unwrap()));

        manager.capture_frame();
        assert!(!Rc::ptr_eq(&first, manager.last_trace_log().unwrap()));
    }

    #[test]
    fn test_capture_frame_stops_at_frame_end() {
        let mut world = CaptureWorld::new();
        let context = world.canvas2d_context(4, 4);
        let mut manager = ResourceTrackingManager::new();

        manager.capture_frame();
        // An empty frame does not end the capture.
        manager.mark_frame_end();
        assert!(manager.capturing());

        manager.capture_call(&mut world.env(), &mut draw_call(context));
        manager.mark_frame_end();
        assert!(!manager.capturing());
        let log = manager.last_trace_log().unwrap().borrow();
        assert!(log.is_frame_end_call_at(log.size() - 1));
    }

    #[test]
    fn test_stop_ignores_other_logs() {
        let mut manager = ResourceTrackingManager::new();
        manager.start_capturing();
        let stale = TraceLog::shared();
        manager.stop_capturing(Some(&stale));
        assert!(manager.capturing());

        manager.drop_trace_log(&stale);
        assert!(manager.last_trace_log().is_some());

        let current = Rc::clone(manager.last_trace_log().unwrap());
        manager.drop_trace_log(&current);
        assert!(!manager.capturing());
        assert!(manager.last_trace_log().is_none());
    }

    #[test]
    fn test_capture_arguments_flattens_resources() {
        let mut world = CaptureWorld::new();
        let context = world.canvas2d_context(4, 4);
        let mut manager = ResourceTrackingManager::new();
        manager.start_capturing();

        manager.capture_arguments(&mut world.env(), context, &[Value::Number(1.0)]);
        let log = manager.last_trace_log().unwrap().borrow();
        assert!(log.replayable_resource(context).is_some());
        assert!(log.is_empty());
    }
}
