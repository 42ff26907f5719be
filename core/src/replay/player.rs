//! Trace log player
//!
//! Re-executes a trace log against fresh host objects, forward only.

use std::rc::Rc;

use canvas_inspector_shared::ResourceId;

use super::trace_log::SharedTraceLog;
use crate::call::Call;
use crate::cloner::ValueCloner;
use crate::host::{Host, HostError};
use crate::resource::{Env, Resource, ResourceRegistry};

/// Replays one trace log into a private replay world.
///
/// Stepping backwards resets the world and replays from the first call.
pub struct TraceLogPlayer {
    trace_log: SharedTraceLog,
    next_step: usize,
    registry: ResourceRegistry,
    cloner: ValueCloner,
}

impl TraceLogPlayer {
    pub fn new(trace_log: SharedTraceLog) -> Self {
        Self {
            trace_log,
            next_step: 0,
            registry: ResourceRegistry::new(),
            cloner: ValueCloner::new(),
        }
    }

    pub fn trace_log(&self) -> &SharedTraceLog {
        &self.trace_log
    }

    /// Resources reconstructed so far.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn replay_world_resource(&self, id: ResourceId) -> Option<&Resource> {
        self.registry.get(id)
    }

    /// Index of the next call to replay
    pub fn next_replay_step(&self) -> usize {
        self.next_step
    }

    /// Drops the replay world and rewinds to the first call
    pub fn reset(&mut self) {
        self.next_step = 0;
        self.registry = ResourceRegistry::new();
    }

    /// Replays the next call.
    pub fn step(&mut self, host: &mut dyn Host) -> Result<Option<Call>, HostError> {
        self.step_to(host, self.next_step)
    }

    /// Replays up to and including call `step`, clamped to the log.
    ///
    /// Returns the last call replayed, or `None` when the log is empty. A call
    /// that fails to replay is not consumed.
    pub fn step_to(&mut self, host: &mut dyn Host, step: usize) -> Result<Option<Call>, HostError> {
        let trace_log = Rc::clone(&self.trace_log);
        let trace_log = trace_log.borrow();
        let Some(last) = trace_log.size().checked_sub(1) else {
            return Ok(None);
        };
        let step = step.min(last);
        if self.next_step > step {
            self.reset();
        }

        let mut env = Env {
            host,
            cloner: &mut self.cloner,
            registry: &mut self.registry,
        };
        let calls = trace_log.replayable_calls();
        let mut last_call = None;
        while self.next_step <= step {
            let call = &calls[self.next_step];
            last_call = Some(call.replay(&mut env, trace_log.resources())?);
            self.next_step += 1;
        }
        Ok(last_call)
    }

    /// Replays the whole log.
    pub fn replay(&mut self, host: &mut dyn Host) -> Result<Option<Call>, HostError> {
        self.step_to(host, usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessHost;
    use crate::replay::TraceLog;
    use crate::test_utils::CaptureWorld;
    use canvas_inspector_shared::Value;
    use canvas_inspector_shared::constants as gl;

    fn clear_color_log(world: &mut CaptureWorld, count: usize) -> SharedTraceLog {
        let context = world.webgl_context(4, 4);
        let log = TraceLog::shared();
        for i in 0..count {
            let mut call = Call::new(
                Value::Resource(context),
                "clearColor",
                [(i as f64 / 10.0).into(), 0.0.into(), 0.0.into(), 1.0.into()],
                Value::Undefined,
            );
            log.borrow_mut().add_call(&mut world.env(), &mut call);
        }
        log
    }

    #[test]
    fn test_empty_log_replays_nothing() {
        let mut host = HeadlessHost::new();
        let mut player = TraceLogPlayer::new(TraceLog::shared());
        assert!(player.step_to(&mut host, 5).unwrap().is_none());
        assert_eq!(player.next_replay_step(), 0);
    }

    #[test]
    fn test_step_to_clamps_to_log() {
        let mut world = CaptureWorld::new();
        let log = clear_color_log(&mut world, 3);
        let mut player = TraceLogPlayer::new(log);

        let last = player.step_to(&mut world.host, 100).unwrap().unwrap();
        assert_eq!(player.next_replay_step(), 3);
        assert_eq!(last.function_name(), "clearColor");
        assert_eq!(last.args()[0], Value::Number(0.2));
    }

    #[test]
    fn test_stepping_back_resets_the_world() {
        let mut world = CaptureWorld::new();
        let log = clear_color_log(&mut world, 3);
        let mut player = TraceLogPlayer::new(log);

        player.step_to(&mut world.host, 2).unwrap();
        let first_world = player.registry().resources().next().and_then(Resource::wrapped_object);

        let last = player.step_to(&mut world.host, 0).unwrap().unwrap();
        assert_eq!(player.next_replay_step(), 1);
        assert_eq!(last.args()[0], Value::Number(0.0));
        let second_world = player.registry().resources().next().and_then(Resource::wrapped_object);
        assert_ne!(first_world, second_world);

        let live = second_world.unwrap();
        let color = world.host.invoke(&live, "getParameter", &[gl::COLOR_CLEAR_VALUE.into()]).unwrap();
        assert_eq!(color.numbers().unwrap()[0], 0.0);
    }

    #[test]
    fn test_failed_call_is_not_consumed() {
        let mut world = CaptureWorld::new();
        let context = world.webgl_context(4, 4);
        let log = TraceLog::shared();
        for method in ["clear", "noSuchMethod"] {
            let mut call = Call::new(Value::Resource(context), method, [gl::COLOR_BUFFER_BIT.into()], Value::Undefined);
            log.borrow_mut().add_call(&mut world.env(), &mut call);
        }
        let mut player = TraceLogPlayer::new(log);

        assert!(player.step_to(&mut world.host, 1).is_err());
        assert_eq!(player.next_replay_step(), 1);
        assert!(player.step(&mut world.host).is_err());
        assert_eq!(player.next_replay_step(), 1);
    }

    #[test]
    fn test_step_advances_one_call() {
        let mut world = CaptureWorld::new();
        let log = clear_color_log(&mut world, 2);
        let mut player = TraceLogPlayer::new(log);

        player.step(&mut world.host).unwrap();
        assert_eq!(player.next_replay_step(), 1);
        player.step(&mut world.host).unwrap();
        assert_eq!(player.next_replay_step(), 2);
        // Past the end, the last call is replayed again from a fresh world.
        let last = player.step(&mut world.host).unwrap().unwrap();
        assert_eq!(last.args()[0], Value::Number(0.1));
        assert_eq!(player.next_replay_step(), 2);
    }
}
