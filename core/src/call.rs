//! Recorded calls.
//!
//! A [`Call`] is one intercepted method invocation or property assignment in
//! the world it was made in. [`ReplayableCall`] is its location-independent
//! twin: every resource it references is a [`Value::Resource`] handle that a
//! replay pass resolves against its own world.

use std::collections::BTreeMap;

use canvas_inspector_shared::{CallArgs, ResourceId, StackTrace, Value};
use serde::Serialize;

use crate::cache::Cache;
use crate::canvas2d::AttributesState;
use crate::cloner::clone_object;
use crate::host::HostError;
use crate::resource::replayable::{self, ReplayableResource};
use crate::resource::{Env, ResourceRegistry};

/// Opaque per-call data owned by a resource's replay policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Attachment {
    /// 2D attribute bag captured when a `save` was pushed.
    Canvas2DAttributes(AttributesState),
}

pub type Attachments = BTreeMap<String, Attachment>;

/// One intercepted invocation.
#[derive(Debug, Clone)]
pub struct Call {
    receiver: Value,
    function_name: String,
    args: CallArgs,
    result: Value,
    stack_trace: Option<StackTrace>,
    attachments: Option<Attachments>,
    frozen: bool,
}

impl Call {
    pub fn new(
        receiver: impl Into<Value>,
        function_name: impl Into<String>,
        args: impl IntoIterator<Item = Value>,
        result: Value,
    ) -> Self {
        Self {
            receiver: receiver.into(),
            function_name: function_name.into(),
            args: args.into_iter().collect(),
            result,
            stack_trace: None,
            attachments: None,
            frozen: false,
        }
    }

    /// A property assignment `receiver[property] = value`.
    pub fn property_setter(receiver: impl Into<Value>, property: &str, value: Value) -> Self {
        Self::new(receiver, "", [Value::from(property), value], Value::Undefined)
    }

    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Method name; empty for property assignments.
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn is_property_setter(&self) -> bool {
        self.function_name.is_empty()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn stack_trace(&self) -> Option<&StackTrace> {
        self.stack_trace.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_result(&mut self, result: Value) {
        self.result = result;
    }

    pub fn set_stack_trace(&mut self, stack_trace: Option<StackTrace>) {
        self.stack_trace = stack_trace;
    }

    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.as_ref()?.get(name)
    }

    /// Sets or, with `None`, removes an attachment.
    pub fn set_attachment(&mut self, name: &str, attachment: Option<Attachment>) {
        match attachment {
            Some(attachment) => {
                self.attachments
                    .get_or_insert_with(BTreeMap::new)
                    .insert(name.to_string(), attachment);
            }
            None => {
                if let Some(attachments) = self.attachments.as_mut() {
                    attachments.remove(name);
                }
            }
        }
    }

    /// Resource of the receiver in `registry`'s world.
    pub fn resource(&self, registry: &ResourceRegistry) -> Option<ResourceId> {
        registry.for_value(&self.receiver)
    }

    /// Replaces every non-resource argument by a detached copy. Idempotent.
    pub fn freeze(&mut self, env: &mut Env<'_>) {
        if self.frozen {
            return;
        }
        self.frozen = true;
        for arg in self.args.iter_mut() {
            if env.registry.for_value(arg).is_none() {
                *arg = env.cloner.clone_value(env.host, arg);
            }
        }
    }

    /// Freezes and converts every referenced resource into `cache`.
    pub fn to_replayable(
        &mut self,
        env: &mut Env<'_>,
        cache: &mut Cache<ReplayableResource>,
    ) -> ReplayableCall {
        self.freeze(env);
        let receiver = replayable::value_to_replayable(env, cache, &self.receiver);
        let result = replayable::value_to_replayable(env, cache, &self.result);
        let args = self
            .args
            .iter()
            .map(|arg| replayable::value_to_replayable(env, cache, arg))
            .collect();
        ReplayableCall {
            receiver,
            function_name: self.function_name.clone(),
            args,
            result,
            stack_trace: self.stack_trace.clone(),
            attachments: clone_object(self.attachments.as_ref()),
        }
    }
}

/// Location-independent form of a [`Call`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayableCall {
    receiver: Value,
    function_name: String,
    args: CallArgs,
    result: Value,
    stack_trace: Option<StackTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<Attachments>,
}

impl ReplayableCall {
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Handle of the receiving resource, if the receiver was one.
    pub fn replayable_resource(&self) -> Option<ResourceId> {
        self.receiver.as_resource()
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn is_property_setter(&self) -> bool {
        self.function_name.is_empty()
    }

    /// Assigned property name, for property assignments.
    pub fn property_name(&self) -> Option<&str> {
        if self.is_property_setter() {
            self.args.first().and_then(Value::as_str)
        } else {
            None
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn stack_trace(&self) -> Option<&StackTrace> {
        self.stack_trace.as_ref()
    }

    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.as_ref()?.get(name)
    }

    /// Re-executes the call in `env`'s world, reconstructing referenced
    /// resources from `source` on first use.
    ///
    /// A resource created by this call (its recorded result is a handle) is
    /// bound to the live return value unless its replay already bound one.
    pub fn replay(
        &self,
        env: &mut Env<'_>,
        source: &Cache<ReplayableResource>,
    ) -> Result<Call, HostError> {
        let receiver = replayable::replay_value(env, source, &self.receiver)?;
        let args = self
            .args
            .iter()
            .map(|arg| replayable::replay_value(env, source, arg))
            .collect::<Result<CallArgs, _>>()?;
        let Some(target) = receiver.as_object() else {
            return Err(HostError::NotAnObject {
                method: self.function_name.clone(),
            });
        };

        let mut result = Value::Undefined;
        if let Some(property) = self.property_name() {
            let value = args.get(1).cloned().unwrap_or_default();
            env.host.set_property(&target, property, value)?;
        } else {
            result = env.host.invoke(&target, &self.function_name, &args)?;
            if let Value::Resource(created) = self.result {
                let resource = replayable::replay_resource(env, source, created)?;
                if env.registry.wrapped_object(resource).is_none() {
                    match result.as_object() {
                        Some(object) => env.registry.set_wrapped_object(resource, object),
                        None => {
                            tracing::warn!(method = %self.function_name, resource = %created, "Replayed call returned no object to bind");
                        }
                    }
                }
            }
        }

        Ok(Call {
            receiver,
            function_name: self.function_name.clone(),
            args,
            result,
            stack_trace: self.stack_trace.clone(),
            attachments: clone_object(self.attachments.as_ref()),
            frozen: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloner::ValueCloner;
    use crate::headless::HeadlessHost;
    use canvas_inspector_shared::TypedArrayKind;

    #[test]
    fn test_property_setter_shape() {
        let call = Call::property_setter(Value::Resource(ResourceId(1)), "fillStyle", "red".into());
        assert!(call.is_property_setter());
        assert_eq!(call.args(), &[Value::from("fillStyle"), Value::from("red")]);
    }

    #[test]
    fn test_freeze_detaches_arguments() {
        let mut host = HeadlessHost::new();
        let mut cloner = ValueCloner::new();
        let mut registry = ResourceRegistry::new();
        let mut env = Env {
            host: &mut host,
            cloner: &mut cloner,
            registry: &mut registry,
        };

        let data = Value::typed(TypedArrayKind::Float32, [1.0, 2.0, 3.0]);
        let mut call = Call::new(Value::Resource(ResourceId(1)), "bufferData", [data.clone()], Value::Undefined);
        call.freeze(&mut env);
        assert!(call.is_frozen());

        if let Value::Typed(array) = &data {
            array.set(1, 99.0);
        }
        assert_eq!(call.args()[0].numbers(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_attachments_set_and_clear() {
        let mut call = Call::new(Value::Resource(ResourceId(1)), "save", [], Value::Undefined);
        call.set_attachment("state", Some(Attachment::Canvas2DAttributes(AttributesState::default())));
        assert!(call.attachment("state").is_some());
        call.set_attachment("state", None);
        assert!(call.attachment("state").is_none());
    }
}
