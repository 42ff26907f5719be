//! 2D context resources.
//!
//! Instead of a full state table, a 2D context snapshots its attribute bag
//! and a copy of its canvas bitmap. Its call log is compacted as calls are
//! pushed: transforms overridden by `setTransform`, paths discarded by
//! `beginPath`, and clips or transforms undone by `restore` are dropped, as
//! are `save`/`restore` pairs with nothing in between. Drawing calls act as
//! barriers, since everything before them contributed to pixels. A drawing
//! call is logged by name only, and only when it has something to protect.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use canvas_inspector_shared::{HostObject, ResourceId, Value};
use hashbrown::HashSet;
use serde::Serialize;

use crate::cache::Cache;
use crate::call::{Attachment, Call};
use crate::formatter::prefixed_property_names;
use crate::host::{Host, HostError};
use crate::resource::intercept::{Factory, Intercept, WrapFunction};
use crate::resource::replayable::{ReplayableResource, Snapshot, replay_calls_base};
use crate::resource::Env;

/// Attachment key of the attribute bag stored on `save` calls.
pub const ATTRIBUTES_STATE: &str = "canvas2dAttributesState";

pub const ATTRIBUTE_PROPERTIES: [&str; 18] = [
    "strokeStyle",
    "fillStyle",
    "globalAlpha",
    "lineWidth",
    "lineCap",
    "lineJoin",
    "miterLimit",
    "shadowOffsetX",
    "shadowOffsetY",
    "shadowBlur",
    "shadowColor",
    "globalCompositeOperation",
    "font",
    "textAlign",
    "textBaseline",
    "lineDashOffset",
    "webkitLineDash",
    "webkitLineDashOffset",
];

pub const PATH_METHODS: [&str; 9] = [
    "beginPath",
    "moveTo",
    "closePath",
    "lineTo",
    "quadraticCurveTo",
    "bezierCurveTo",
    "arcTo",
    "arc",
    "rect",
];

pub const TRANSFORM_METHODS: [&str; 5] = ["scale", "rotate", "translate", "transform", "setTransform"];

pub const DRAWING_METHODS: [&str; 13] = [
    "clearRect",
    "drawImage",
    "drawImageFromRect",
    "drawCustomFocusRing",
    "drawSystemFocusRing",
    "fill",
    "fillRect",
    "fillText",
    "putImageData",
    "putImageDataHD",
    "stroke",
    "strokeRect",
    "strokeText",
];

static DRAWING: LazyLock<HashSet<String>> = LazyLock::new(|| prefixed_property_names(&DRAWING_METHODS));

/// Whether `name` paints into the canvas, including `webkit`-prefixed forms.
pub fn is_drawing_method(name: &str) -> bool {
    DRAWING.contains(name)
}

fn is_path(name: &str) -> bool {
    PATH_METHODS.contains(&name)
}

fn is_transform(name: &str) -> bool {
    TRANSFORM_METHODS.contains(&name)
}

fn is_clip(name: &str) -> bool {
    name == "clip"
}

fn is_path_or_drawing(name: &str) -> bool {
    is_path(name) || is_drawing_method(name)
}

fn is_clip_or_drawing(name: &str) -> bool {
    is_clip(name) || is_drawing_method(name)
}

fn is_state_reset(name: &str) -> bool {
    name == "restore" || name == "setTransform"
}

/// How an intercepted 2D call enters the context's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    SetTransform,
    BeginPath,
    Save,
    Restore,
    Drawing,
    Plain,
}

/// Custom intercept for a method of a 2D context.
pub fn intercept(method: &str) -> Option<Intercept> {
    let intercept = match method {
        "createLinearGradient" | "createRadialGradient" => Intercept::Factory(Factory::Gradient),
        "createPattern" => Intercept::Factory(Factory::Pattern),
        "setTransform" => Intercept::Canvas2D(Push::SetTransform),
        "beginPath" => Intercept::Canvas2D(Push::BeginPath),
        "save" => Intercept::Canvas2D(Push::Save),
        "restore" => Intercept::Canvas2D(Push::Restore),
        name if is_drawing_method(name) => Intercept::Canvas2D(Push::Drawing),
        name if is_transform(name) || is_path(name) || is_clip(name) => Intercept::Canvas2D(Push::Plain),
        _ => return None,
    };
    Some(intercept)
}

/// Attribute bag of a 2D context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributesState {
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_dash: Option<Value>,
}

/// Snapshot taken when a 2D context is flattened.
#[derive(Debug, Clone)]
pub struct Canvas2DSnapshot {
    pub current_attributes: AttributesState,
    /// Copy of the canvas bitmap at flatten time.
    pub original_canvas_cloned: HostObject,
}

/// Reads the attribute bag. Attributes the host does not implement are left out.
pub fn current_attributes_state(
    host: &mut dyn Host,
    context: &HostObject,
) -> Result<AttributesState, HostError> {
    let mut state = AttributesState::default();
    for attribute in ATTRIBUTE_PROPERTIES {
        match host.get_property(context, attribute) {
            Ok(value) => {
                state.attributes.insert(attribute.to_string(), value);
            }
            Err(HostError::UnknownProperty { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    state.line_dash = match host.invoke(context, "getLineDash", &[]) {
        Ok(dash) => Some(dash),
        Err(HostError::UnknownMethod { .. }) => None,
        Err(e) => return Err(e),
    };
    Ok(state)
}

pub fn apply_attributes_state(
    host: &mut dyn Host,
    context: &HostObject,
    state: &AttributesState,
) -> Result<(), HostError> {
    for (attribute, value) in &state.attributes {
        host.set_property(context, attribute, value.clone())?;
    }
    if let Some(dash) = &state.line_dash {
        match host.invoke(context, "setLineDash", std::slice::from_ref(dash)) {
            Ok(_) | Err(HostError::UnknownMethod { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Runs the 2D bookkeeping for one intercepted call.
pub(crate) fn handle(
    push: Push,
    env: &mut Env<'_>,
    wrap: &mut WrapFunction<'_>,
) -> Result<(), HostError> {
    let id = wrap.resource();
    let mut call = match push {
        // Never replayed, so the arguments are not cloned.
        Push::Drawing => Call::new(Value::Resource(id), wrap.function_name(), [], Value::Undefined),
        _ => wrap.frozen_call(env)?,
    };
    if push == Push::Save {
        let context = env.registry.wrapped_object(id).ok_or(HostError::Unbound(id))?;
        let state = current_attributes_state(env.host, &context)?;
        call.set_attachment(ATTRIBUTES_STATE, Some(Attachment::Canvas2DAttributes(state)));
    }
    let Some(resource) = env.registry.get_mut(id) else {
        return Ok(());
    };
    let calls = &mut resource.calls;
    match push {
        Push::SetTransform => push_set_transform(calls, call),
        Push::BeginPath => push_begin_path(calls, call),
        Push::Restore => push_restore(calls, call),
        Push::Drawing => push_drawing(calls, call),
        Push::Save | Push::Plain => calls.push(call),
    }
    Ok(())
}

pub(crate) fn snapshot(env: &mut Env<'_>, id: ResourceId) -> Result<Canvas2DSnapshot, HostError> {
    let context = env.registry.wrapped_object(id).ok_or(HostError::Unbound(id))?;
    let current_attributes = current_attributes_state(env.host, &context)?;
    let Some(canvas) = env.host.get_property(&context, "canvas")?.as_object() else {
        return Err(HostError::UnknownProperty {
            class: context.class,
            property: "canvas".to_string(),
        });
    };
    let original_canvas_cloned = env.cloner.clone_into_canvas(env.host, &canvas, None)?;
    Ok(Canvas2DSnapshot {
        current_attributes,
        original_canvas_cloned,
    })
}

/// Rebuilds the context on a copy of the snapshot bitmap and replays its
/// state calls. Drawing calls are already in the bitmap and are skipped.
pub(crate) fn replay_context(
    env: &mut Env<'_>,
    source: &Cache<ReplayableResource>,
    id: ResourceId,
    data: &ReplayableResource,
) -> Result<(), HostError> {
    let Some(Snapshot::Canvas2D(snapshot)) = data.snapshot() else {
        tracing::error!(resource = %id, "2D context has no snapshot");
        return replay_calls_base(env, source, id, data.calls());
    };
    let canvas = env
        .cloner
        .clone_into_canvas(env.host, &snapshot.original_canvas_cloned, None)?;
    let Some(context) = env.host.invoke(&canvas, "getContext", &["2d".into()])?.as_object() else {
        return Err(HostError::InvalidArgument {
            method: "getContext".to_string(),
            reason: "no 2d context available for replay".to_string(),
        });
    };
    env.registry.set_wrapped_object(id, context);

    for call in data.calls() {
        if call.function_name() == "save" {
            if let Some(Attachment::Canvas2DAttributes(state)) = call.attachment(ATTRIBUTES_STATE) {
                apply_attributes_state(env.host, &context, state)?;
            }
        }
        if is_drawing_method(call.function_name()) {
            continue;
        }
        replay_calls_base(env, source, id, [call])?;
    }
    apply_attributes_state(env.host, &context, &snapshot.current_attributes)
}

// Log compaction. Index arguments named `end` are exclusive bounds.

fn last_index_of(calls: &[Call], end: usize, matches: impl Fn(&str) -> bool) -> Option<usize> {
    calls[..end.min(calls.len())]
        .iter()
        .rposition(|call| matches(call.function_name()))
}

/// The `save` that a `restore` placed at `end` would pop.
fn last_matching_save(calls: &[Call], end: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (index, call) in calls[..end.min(calls.len())].iter().enumerate().rev() {
        match call.function_name() {
            "restore" => depth += 1,
            "save" => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn after(index: Option<usize>) -> usize {
    index.map_or(0, |i| i + 1)
}

/// Removes matching calls in `from..end`, returning whether any was removed.
fn remove_calls(calls: &mut Vec<Call>, from: usize, end: usize, matches: impl Fn(&str) -> bool) -> bool {
    let end = end.min(calls.len());
    let from = from.min(end);
    let before = calls.len();
    let mut index = 0;
    calls.retain(|call| {
        let keep = index < from || index >= end || !matches(call.function_name());
        index += 1;
        keep
    });
    calls.len() != before
}

/// A drawing call is only logged when a path, transform or clip call since
/// the previous drawing call needs it as a barrier.
fn push_drawing(calls: &mut Vec<Call>, call: Call) {
    let barrier = last_index_of(calls, calls.len(), is_drawing_method);
    let protects = calls[after(barrier)..]
        .iter()
        .any(|logged| is_prunable(logged.function_name()));
    if protects {
        calls.push(call);
    }
}

fn is_prunable(name: &str) -> bool {
    is_path(name) || is_transform(name) || is_clip(name)
}

fn push_set_transform(calls: &mut Vec<Call>, call: Call) {
    let save = last_matching_save(calls, calls.len());
    let barrier = last_index_of(calls, calls.len(), is_path_or_drawing).max(save);
    if remove_calls(calls, after(barrier), calls.len(), is_transform) {
        remove_all_obsolete(calls);
    }
    calls.push(call);
}

fn push_begin_path(calls: &mut Vec<Call>, call: Call) {
    let barrier = last_index_of(calls, calls.len(), is_clip_or_drawing);
    if remove_calls(calls, after(barrier), calls.len(), is_path) {
        remove_all_obsolete(calls);
    }
    calls.push(call);
}

fn push_restore(calls: &mut Vec<Call>, call: Call) {
    let Some(save) = last_matching_save(calls, calls.len()) else {
        return;
    };
    calls[save].set_attachment(ATTRIBUTES_STATE, None);

    let mut modified = false;
    let barrier = Some(save).max(last_index_of(calls, calls.len(), is_drawing_method));
    modified |= remove_calls(calls, after(barrier), calls.len(), is_clip);
    let barrier = Some(save).max(last_index_of(calls, calls.len(), is_path_or_drawing));
    modified |= remove_calls(calls, after(barrier), calls.len(), is_transform);
    if modified {
        remove_all_obsolete(calls);
    }

    if calls.last().is_some_and(|last| last.function_name() == "save") {
        calls.pop();
    } else {
        calls.push(call);
    }
}

fn remove_all_obsolete(calls: &mut Vec<Call>) {
    // Path calls between a clip or drawing call and the next beginPath.
    let mut begin_path = last_index_of(calls, calls.len(), |name| name == "beginPath");
    while let Some(begin) = begin_path {
        let barrier = last_index_of(calls, begin, is_clip_or_drawing);
        remove_calls(calls, after(barrier), begin, is_path);
        begin_path = barrier.and_then(|b| last_index_of(calls, b, |name| name == "beginPath"));
    }

    // Transforms overridden by a later restore or setTransform.
    let mut reset = last_index_of(calls, calls.len(), is_state_reset);
    while let Some(at) = reset {
        let save = last_matching_save(calls, at);
        let barrier = last_index_of(calls, at, is_path_or_drawing).max(save);
        remove_calls(calls, after(barrier), at, is_transform);
        reset = barrier.and_then(|b| last_index_of(calls, b, is_state_reset));
    }

    // Runs of save immediately followed by as many restores.
    let mut restores = 0usize;
    let mut i = calls.len();
    while i > 0 {
        i -= 1;
        let name = calls[i].function_name();
        if name == "restore" {
            restores += 1;
            continue;
        }
        if name == "save" && restores > 0 {
            let mut first = i;
            while first > 0
                && i - (first - 1) < restores
                && calls[first - 1].function_name() == "save"
            {
                first -= 1;
            }
            let count = (i - first + 1) * 2;
            calls.drain(first..first + count);
            i = first;
        }
        restores = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(names: &[&str]) -> Vec<Call> {
        names
            .iter()
            .map(|name| Call::new(Value::Resource(ResourceId(1)), *name, [], Value::Undefined))
            .collect()
    }

    fn names(calls: &[Call]) -> Vec<&str> {
        calls.iter().map(Call::function_name).collect()
    }

    fn call(name: &str) -> Call {
        Call::new(Value::Resource(ResourceId(1)), name, [], Value::Undefined)
    }

    #[test]
    fn test_trivial_save_restore_pair_is_dropped() {
        let mut calls = log(&["save", "translate"]);
        push_restore(&mut calls, call("restore"));
        assert!(calls.is_empty());
    }

    #[test]
    fn test_drawing_keeps_save_transform_restore() {
        let mut calls = log(&["save", "translate", "fillRect"]);
        push_restore(&mut calls, call("restore"));
        assert_eq!(names(&calls), ["save", "translate", "fillRect", "restore"]);
    }

    #[test]
    fn test_unmatched_restore_is_not_logged() {
        let mut calls = log(&["translate"]);
        push_restore(&mut calls, call("restore"));
        assert_eq!(names(&calls), ["translate"]);
    }

    #[test]
    fn test_set_transform_overrides_earlier_transforms() {
        let mut calls = log(&["translate", "scale"]);
        push_set_transform(&mut calls, call("setTransform"));
        assert_eq!(names(&calls), ["setTransform"]);
    }

    #[test]
    fn test_set_transform_keeps_transforms_before_path() {
        let mut calls = log(&["translate", "moveTo", "scale"]);
        push_set_transform(&mut calls, call("setTransform"));
        assert_eq!(names(&calls), ["translate", "moveTo", "setTransform"]);
    }

    #[test]
    fn test_set_transform_stops_at_enclosing_save() {
        let mut calls = log(&["rotate", "save", "translate"]);
        push_set_transform(&mut calls, call("setTransform"));
        assert_eq!(names(&calls), ["rotate", "save", "setTransform"]);
    }

    #[test]
    fn test_begin_path_discards_unused_path() {
        let mut calls = log(&["beginPath", "moveTo", "lineTo"]);
        push_begin_path(&mut calls, call("beginPath"));
        assert_eq!(names(&calls), ["beginPath"]);
    }

    #[test]
    fn test_begin_path_keeps_clipped_and_drawn_paths() {
        let mut calls = log(&["beginPath", "rect", "clip"]);
        push_begin_path(&mut calls, call("beginPath"));
        assert_eq!(names(&calls), ["beginPath", "rect", "clip", "beginPath"]);

        let mut calls = log(&["beginPath", "arc", "stroke"]);
        push_begin_path(&mut calls, call("beginPath"));
        assert_eq!(names(&calls), ["beginPath", "arc", "stroke", "beginPath"]);
    }

    #[test]
    fn test_restore_drops_clip_made_since_save() {
        let mut calls = log(&["save", "rect", "clip"]);
        push_restore(&mut calls, call("restore"));
        assert_eq!(names(&calls), ["save", "rect", "restore"]);
    }

    #[test]
    fn test_restore_clears_save_attachment() {
        let mut calls = log(&["save", "fillRect"]);
        calls[0].set_attachment(
            ATTRIBUTES_STATE,
            Some(Attachment::Canvas2DAttributes(AttributesState::default())),
        );
        push_restore(&mut calls, call("restore"));
        assert!(calls[0].attachment(ATTRIBUTES_STATE).is_none());
    }

    #[test]
    fn test_obsolete_pass_removes_nested_pairs() {
        let mut calls = log(&["fillRect", "save", "save", "restore", "restore"]);
        remove_all_obsolete(&mut calls);
        assert_eq!(names(&calls), ["fillRect"]);
    }

    #[test]
    fn test_matching_save_skips_closed_pairs() {
        let calls = log(&["save", "save", "restore", "translate"]);
        assert_eq!(last_matching_save(&calls, calls.len()), Some(0));
        assert_eq!(last_matching_save(&calls, 2), Some(1));
        assert_eq!(last_matching_save(&calls, 0), None);
    }

    #[test]
    fn test_drawing_without_state_calls_is_not_logged() {
        let mut calls = Vec::new();
        for _ in 0..1000 {
            push_drawing(&mut calls, call("clearRect"));
            push_drawing(&mut calls, call("fillRect"));
        }
        assert!(calls.is_empty());
    }

    #[test]
    fn test_consecutive_drawing_calls_share_one_barrier() {
        let mut calls = log(&["translate"]);
        push_drawing(&mut calls, call("fillRect"));
        push_drawing(&mut calls, call("stroke"));
        push_drawing(&mut calls, call("drawImage"));
        assert_eq!(names(&calls), ["translate", "fillRect"]);

        let mut calls = log(&["translate", "fillRect", "save"]);
        push_drawing(&mut calls, call("fillText"));
        assert_eq!(names(&calls), ["translate", "fillRect", "save"]);
        push_restore(&mut calls, call("restore"));
        assert_eq!(names(&calls), ["translate", "fillRect"]);
    }

    #[test]
    fn test_intercept_table() {
        assert_eq!(intercept("createPattern"), Some(Intercept::Factory(Factory::Pattern)));
        assert_eq!(intercept("restore"), Some(Intercept::Canvas2D(Push::Restore)));
        assert_eq!(intercept("arcTo"), Some(Intercept::Canvas2D(Push::Plain)));
        assert_eq!(intercept("webkitPutImageDataHD"), Some(Intercept::Canvas2D(Push::Drawing)));
        assert_eq!(intercept("measureText"), None);
    }
}
