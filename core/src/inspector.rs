//! Canvas inspector facade.
//!
//! The only entry point a host needs: it wraps contexts, routes proxied
//! calls into the [`Engine`], and maps opaque id strings to trace logs and
//! their players. Lookup failures come back as [`InspectorError`], whose
//! string form is what the host shows.

use std::rc::Rc;

use canvas_inspector_shared::{HostObject, ParsedId, ResourceId, ResourceRef, TraceLogId, Value};
use hashbrown::HashMap;
use serde::Serialize;

use crate::capture::resource_data_url;
use crate::config::InspectorConfig;
use crate::engine::Engine;
use crate::error::InspectorError;
use crate::formatter::{FormattedCall, FormatterRegistry};
use crate::host::{Host, HostError};
use crate::replay::{SharedTraceLog, TraceLogPlayer};

/// A page of a trace log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLogView {
    pub id: String,
    pub calls: Vec<TraceLogCall>,
    pub alive: bool,
    pub start_offset: usize,
    pub total_available_calls: usize,
}

/// One formatted call of a [`TraceLogView`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLogCall {
    #[serde(flatten)]
    pub call: FormattedCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(rename = "sourceURL", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    pub is_frame_end_call: bool,
}

/// Rendered state of a resource in a replay world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    pub id: String,
    pub trace_log_id: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: String,
    pub description: String,
}

/// One inspector session over a host.
pub struct CanvasInspector<H: Host> {
    host: H,
    engine: Engine,
    config: InspectorConfig,
    injected_script_id: u64,
    last_trace_log_id: u64,
    trace_logs: HashMap<String, SharedTraceLog>,
    players: HashMap<String, TraceLogPlayer>,
    formatters: FormatterRegistry,
}

impl<H: Host> CanvasInspector<H> {
    pub fn new(host: H, injected_script_id: u64, config: InspectorConfig) -> Self {
        Self {
            host,
            engine: Engine::new(config.capture.clone()),
            config,
            injected_script_id,
            last_trace_log_id: 0,
            trace_logs: HashMap::new(),
            players: HashMap::new(),
            formatters: FormatterRegistry::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn wrap_webgl_context(&mut self, context: HostObject) -> Value {
        self.engine.wrap_webgl_context(context)
    }

    pub fn wrap_canvas2d_context(&mut self, context: HostObject) -> Value {
        self.engine.wrap_canvas2d_context(context)
    }

    /// `receiver.method(...args)` as the application would make it.
    pub fn call(&mut self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, HostError> {
        self.engine.call(&mut self.host, receiver, method, args)
    }

    /// `receiver[name]`.
    pub fn get(&self, receiver: &Value, name: &str) -> Result<Value, HostError> {
        self.engine.get_property(&self.host, receiver, name)
    }

    /// `receiver[name] = value`.
    pub fn set(&mut self, receiver: &Value, name: &str, value: Value) -> Result<(), HostError> {
        self.engine.set_property(&mut self.host, receiver, name, value)
    }

    pub fn start_capturing(&mut self) -> String {
        let previous = self.engine.manager().last_trace_log().cloned();
        let trace_log = self.engine.manager_mut().start_capturing();
        self.trace_log_id(previous, trace_log)
    }

    pub fn capture_frame(&mut self) -> String {
        let previous = self.engine.manager().last_trace_log().cloned();
        let trace_log = self.engine.manager_mut().capture_frame();
        self.trace_log_id(previous, trace_log)
    }

    /// Reuses the id of a trace log the capture kept writing to.
    fn trace_log_id(&mut self, previous: Option<SharedTraceLog>, trace_log: SharedTraceLog) -> String {
        if previous.is_some_and(|previous| Rc::ptr_eq(&previous, &trace_log)) {
            let existing = self
                .trace_logs
                .iter()
                .find(|(_, log)| Rc::ptr_eq(log, &trace_log))
                .map(|(id, _)| id.clone());
            if let Some(id) = existing {
                return id;
            }
        }
        self.last_trace_log_id += 1;
        let id = TraceLogId {
            injected_script_id: self.injected_script_id,
            trace_log_id: self.last_trace_log_id,
        }
        .to_string();
        self.trace_logs.insert(id.clone(), trace_log);
        id
    }

    pub fn stop_capturing(&mut self, trace_log_id: &str) {
        if let Some(trace_log) = self.trace_logs.get(trace_log_id) {
            self.engine.manager_mut().stop_capturing(Some(trace_log));
        }
    }

    pub fn mark_frame_end(&mut self) {
        self.engine.manager_mut().mark_frame_end();
    }

    pub fn drop_trace_log(&mut self, trace_log_id: &str) {
        if let Some(trace_log) = self.trace_logs.remove(trace_log_id) {
            self.engine.manager_mut().drop_trace_log(&trace_log);
        }
        self.players.remove(trace_log_id);
    }

    /// Up to `max_length` formatted calls starting at `start_offset`.
    ///
    /// The last call is marked as ending a frame first.
    pub fn trace_log(
        &self,
        trace_log_id: &str,
        start_offset: Option<usize>,
        max_length: Option<usize>,
    ) -> Result<TraceLogView, InspectorError> {
        let shared = self
            .trace_logs
            .get(trace_log_id)
            .ok_or(InspectorError::TraceLogNotFound)?;
        shared.borrow_mut().add_frame_end_mark();
        let trace_log = shared.borrow();

        let total = trace_log.size();
        let from = start_offset.unwrap_or(0);
        let length = max_length.or(self.config.trace_log.page_size).unwrap_or(total);
        let to = total.min(from.saturating_add(length));

        let manager = self.engine.manager();
        let alive = manager.capturing()
            && manager
                .last_trace_log()
                .is_some_and(|last| Rc::ptr_eq(last, shared));

        let resources = trace_log.resources();
        let calls = (from..to)
            .map(|index| {
                let call = &trace_log.replayable_calls()[index];
                let context_id = call
                    .replayable_resource()
                    .and_then(|id| resources.get(id))
                    .map(|resource| self.resource_id(resource.replayable_context_resource()));
                let frame = call.stack_trace().and_then(|stack| stack.call_frame(0));
                TraceLogCall {
                    call: self.formatters.format_call(call, resources),
                    context_id,
                    source_url: frame.map(|f| f.source_url.clone()),
                    line_number: frame.map(|f| f.line_number),
                    column_number: frame.map(|f| f.column_number),
                    is_frame_end_call: trace_log.is_frame_end_call_at(index),
                }
            })
            .collect();

        Ok(TraceLogView {
            id: trace_log_id.to_string(),
            calls,
            alive,
            start_offset: from,
            total_available_calls: total,
        })
    }

    /// Replays the trace log up to `step` and renders the resource the last
    /// replayed call went through, or its context when it has no surface.
    pub fn replay_trace_log(&mut self, trace_log_id: &str, step: usize) -> Result<ResourceState, InspectorError> {
        let trace_log = self
            .trace_logs
            .get(trace_log_id)
            .ok_or(InspectorError::TraceLogNotFound)?;
        let player = self
            .players
            .entry(trace_log_id.to_string())
            .or_insert_with(|| TraceLogPlayer::new(Rc::clone(trace_log)));

        let last_call = player
            .step_to(&mut self.host, step)?
            .ok_or(InspectorError::EmptyTraceLog)?;
        let registry = player.registry();
        let resource = last_call
            .resource(registry)
            .ok_or(InspectorError::ResourceNotFound)?;

        let (resource, image_url) = match resource_data_url(&mut self.host, registry, resource)? {
            Some(url) => (resource, url),
            None => match registry.context_resource(resource) {
                Some(context) => (
                    context,
                    resource_data_url(&mut self.host, registry, context)?.unwrap_or_default(),
                ),
                None => (resource, String::new()),
            },
        };
        Ok(ResourceState {
            id: self.resource_id(resource),
            trace_log_id: trace_log_id.to_string(),
            image_url,
        })
    }

    /// Description of a resource recorded in any trace log.
    pub fn resource_info(&self, resource_id: &str) -> Result<ResourceInfo, InspectorError> {
        let id = parse_resource_id(resource_id)?;
        let description = self
            .trace_logs
            .values()
            .find_map(|log| log.borrow().replayable_resource(id).map(|r| r.description()))
            .ok_or(InspectorError::ResourceNotFound)?;
        Ok(ResourceInfo {
            id: resource_id.to_string(),
            description,
        })
    }

    /// Renders a resource of a trace log's replay world.
    pub fn resource_state(&mut self, trace_log_id: &str, resource_id: &str) -> Result<ResourceState, InspectorError> {
        if !self.trace_logs.contains_key(trace_log_id) {
            return Err(InspectorError::TraceLogNotFound);
        }
        let player = self
            .players
            .get(trace_log_id)
            .ok_or(InspectorError::ReplayNotStarted)?;

        let wrong_id = || InspectorError::WrongResourceId(resource_id.to_string());
        let trace_log_ref = ParsedId::parse(trace_log_id).map_err(|_| InspectorError::TraceLogNotFound)?;
        let resource_ref = ParsedId::parse(resource_id).map_err(|_| wrong_id())?;
        if trace_log_ref.injected_script_id != resource_ref.injected_script_id {
            return Err(InspectorError::InjectedScriptMismatch);
        }
        let id = resource_ref
            .resource_id
            .filter(|&id| id != 0)
            .map(ResourceId)
            .ok_or_else(wrong_id)?;
        if player.replay_world_resource(id).is_none() {
            return Err(InspectorError::ResourceNotReplayed);
        }

        let image_url = resource_data_url(&mut self.host, player.registry(), id)?.unwrap_or_default();
        Ok(ResourceState {
            id: resource_id.to_string(),
            trace_log_id: trace_log_id.to_string(),
            image_url,
        })
    }

    fn resource_id(&self, id: ResourceId) -> String {
        ResourceRef {
            injected_script_id: self.injected_script_id,
            resource_id: id.0,
        }
        .to_string()
    }
}

fn parse_resource_id(resource_id: &str) -> Result<ResourceId, InspectorError> {
    match ResourceRef::parse(resource_id) {
        Ok(parsed) if parsed.resource_id != 0 => Ok(ResourceId(parsed.resource_id)),
        _ => Err(InspectorError::WrongResourceId(resource_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessHost;

    fn inspector() -> CanvasInspector<HeadlessHost> {
        CanvasInspector::new(HeadlessHost::new(), 1, InspectorConfig::default())
    }

    #[test]
    fn test_trace_log_ids_are_stable() {
        let mut inspector = inspector();
        let first = inspector.start_capturing();
        assert_eq!(first, r#"{"injectedScriptId":1,"traceLogId":1}"#);
        assert_eq!(inspector.start_capturing(), first);

        inspector.stop_capturing(&first);
        let second = inspector.start_capturing();
        assert_ne!(second, first);
        assert_eq!(inspector.capture_frame(), r#"{"injectedScriptId":1,"traceLogId":3}"#);
    }

    #[test]
    fn test_unknown_ids_report_errors() {
        let mut inspector = inspector();
        let unknown = r#"{"injectedScriptId":1,"traceLogId":9}"#;
        assert_eq!(inspector.trace_log(unknown, None, None), Err(InspectorError::TraceLogNotFound));
        assert_eq!(inspector.replay_trace_log(unknown, 0), Err(InspectorError::TraceLogNotFound));
        assert_eq!(
            inspector.resource_info("garbage").unwrap_err().to_string(),
            "Error: Wrong resource ID: garbage"
        );
        assert_eq!(
            inspector.resource_info(r#"{"injectedScriptId":1,"resourceId":4}"#),
            Err(InspectorError::ResourceNotFound)
        );

        let id = inspector.start_capturing();
        assert_eq!(
            inspector.resource_state(&id, r#"{"injectedScriptId":1,"resourceId":1}"#),
            Err(InspectorError::ReplayNotStarted)
        );
    }

    #[test]
    fn test_empty_trace_log_cannot_be_replayed() {
        let mut inspector = inspector();
        let id = inspector.start_capturing();
        inspector.stop_capturing(&id);
        let view = inspector.trace_log(&id, None, None).unwrap();
        assert_eq!(view.total_available_calls, 0);
        assert!(!view.alive);
        assert_eq!(inspector.replay_trace_log(&id, 0), Err(InspectorError::EmptyTraceLog));
    }

    #[test]
    fn test_dropped_trace_log_is_forgotten() {
        let mut inspector = inspector();
        let id = inspector.start_capturing();
        inspector.drop_trace_log(&id);
        assert!(!inspector.engine().manager().capturing());
        assert_eq!(inspector.trace_log(&id, None, None), Err(InspectorError::TraceLogNotFound));
    }
}
