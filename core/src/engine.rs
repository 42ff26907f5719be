//! The capture world and its interceptors.
//!
//! Every call, property read and property write the application makes on a
//! proxy goes through [`Engine`]. Methods with a custom intercept run their
//! bookkeeping whether or not a capture is active; only the trace-log
//! recording depends on the capture switch. Bookkeeping failures are logged
//! and never keep the real call from running or its result from being
//! returned.

use canvas_inspector_shared::constants::is_constant_name;
use canvas_inspector_shared::{HostObject, ResourceId, StackTrace, Value};

use crate::call::Call;
use crate::cloner::ValueCloner;
use crate::config::CaptureConfig;
use crate::host::{Host, HostError};
use crate::replay::ResourceTrackingManager;
use crate::resource::intercept::{self, Intercept, WrapFunction};
use crate::resource::{Env, IdAllocator, ResourceKind, ResourceRegistry};

/// Resources of the live application and the capture switch.
#[derive(Debug, Default)]
pub struct Engine {
    config: CaptureConfig,
    ids: IdAllocator,
    registry: ResourceRegistry,
    cloner: ValueCloner,
    manager: ResourceTrackingManager,
}

impl Engine {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &ResourceTrackingManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ResourceTrackingManager {
        &mut self.manager
    }

    /// Whether calls through resource `id` are being recorded right now.
    pub fn is_capturing(&self, id: ResourceId) -> bool {
        self.manager.capturing() && self.registry.get(id).is_some_and(|r| r.is_tracked())
    }

    /// Wraps a WebGL context, returning its proxy. Wrapping twice returns the
    /// same proxy.
    pub fn wrap_webgl_context(&mut self, context: HostObject) -> Value {
        self.wrap_context(context, "WebGLRenderingContext", ResourceKind::webgl_context())
    }

    /// Wraps a 2D context, returning its proxy.
    pub fn wrap_canvas2d_context(&mut self, context: HostObject) -> Value {
        self.wrap_context(context, "CanvasRenderingContext2D", ResourceKind::Canvas2D)
    }

    fn wrap_context(&mut self, context: HostObject, name: &str, kind: ResourceKind) -> Value {
        let id = match self.registry.for_object(&context) {
            Some(id) => id,
            None => {
                let id = self.registry.create(&mut self.ids, context, name, kind);
                tracing::debug!(resource = %id, name, "Wrapped context");
                id
            }
        };
        match self.registry.get_mut(id) {
            Some(resource) => {
                resource.tracked = true;
                resource.proxy_object()
            }
            None => Value::Object(context),
        }
    }

    /// Calls `method` on `receiver`. Proxies are intercepted; plain host
    /// objects are called straight through.
    pub fn call(
        &mut self,
        host: &mut dyn Host,
        receiver: &Value,
        method: &str,
        args: &[Value],
    ) -> Result<Value, HostError> {
        let id = match receiver {
            Value::Resource(id) if self.registry.has(*id) => *id,
            Value::Object(object) => {
                let args = self.registry.unwrap_args(args);
                return host.invoke(object, method, &args);
            }
            _ => {
                return Err(HostError::NotAnObject {
                    method: method.to_string(),
                });
            }
        };
        let object = self.registry.wrapped_object(id).ok_or(HostError::Unbound(id))?;
        let custom = self
            .registry
            .get(id)
            .and_then(|resource| intercept::intercept_for(resource.kind(), method));
        let result = match custom {
            Some(custom) => self.call_custom(host, id, object, custom, method, args)?,
            None => self.call_generic(host, id, object, method, args)?,
        };
        Ok(self.proxy_value(result))
    }

    fn call_custom(
        &mut self,
        host: &mut dyn Host,
        id: ResourceId,
        object: HostObject,
        custom: Intercept,
        method: &str,
        args: &[Value],
    ) -> Result<Value, HostError> {
        let capturing = self.is_capturing(id);
        let stack_trace = self.stack_trace(host, capturing);
        let mut env = Env {
            host,
            cloner: &mut self.cloner,
            registry: &mut self.registry,
        };
        if capturing {
            self.manager.capture_arguments(&mut env, id, args);
        }

        let mut wrap = WrapFunction::new(id, object, method, args);
        let recorded = intercept::run(custom, &mut env, &mut self.ids, &mut wrap);
        let result = wrap.result(&mut env)?;
        if let Err(e) = recorded {
            tracing::warn!(error = %e, method, resource = %id, "Failed to record call");
        }

        if capturing {
            let mut call = wrap.call(&mut env)?.clone();
            call.set_stack_trace(stack_trace);
            self.manager.capture_call(&mut env, &mut call);
        }
        Ok(result)
    }

    fn call_generic(
        &mut self,
        host: &mut dyn Host,
        id: ResourceId,
        object: HostObject,
        method: &str,
        args: &[Value],
    ) -> Result<Value, HostError> {
        let unwrapped = self.registry.unwrap_args(args);
        if !self.is_capturing(id) {
            return host.invoke(&object, method, &unwrapped);
        }
        let stack_trace = self.stack_trace(host, true);
        let mut env = Env {
            host,
            cloner: &mut self.cloner,
            registry: &mut self.registry,
        };
        self.manager.capture_arguments(&mut env, id, args);
        let result = env.host.invoke(&object, method, &unwrapped)?;

        let mut call = Call::new(Value::Resource(id), method, args.iter().cloned(), result.clone());
        call.set_stack_trace(stack_trace);
        self.manager.capture_call(&mut env, &mut call);
        Ok(result)
    }

    /// Reads `receiver[name]`. Resource-valued properties come back as proxies,
    /// and ALL-CAPS constants are read straight from the host.
    pub fn get_property(
        &self,
        host: &dyn Host,
        receiver: &Value,
        name: &str,
    ) -> Result<Value, HostError> {
        let object = self.receiver_object(receiver, name)?;
        let value = host.get_property(&object, name)?;
        if is_constant_name(name) {
            return Ok(value);
        }
        Ok(self.proxy_value(value))
    }

    /// Writes `receiver[name] = value`.
    ///
    /// The value stays reachable from the receiver as a bound resource, the
    /// host gets the unwrapped value, and the write is recorded while
    /// capturing.
    pub fn set_property(
        &mut self,
        host: &mut dyn Host,
        receiver: &Value,
        name: &str,
        value: Value,
    ) -> Result<(), HostError> {
        let object = self.receiver_object(receiver, name)?;
        let Some(id) = receiver.as_resource() else {
            let value = self.registry.unwrap_value(&value);
            return host.set_property(&object, name, value);
        };
        self.registry.register_bound_resource(id, name, &value);

        let capturing = self.is_capturing(id);
        let stack_trace = self.stack_trace(host, capturing);
        let mut env = Env {
            host,
            cloner: &mut self.cloner,
            registry: &mut self.registry,
        };
        let args = [Value::from(name), value.clone()];
        if capturing {
            self.manager.capture_arguments(&mut env, id, &args);
        }
        let unwrapped = env.registry.unwrap_value(&value);
        env.host.set_property(&object, name, unwrapped)?;
        if capturing {
            let mut call = Call::property_setter(Value::Resource(id), name, value);
            call.set_stack_trace(stack_trace);
            self.manager.capture_call(&mut env, &mut call);
        }
        Ok(())
    }

    /// Host object behind a receiver, for property access.
    fn receiver_object(&self, receiver: &Value, name: &str) -> Result<HostObject, HostError> {
        match receiver {
            Value::Resource(id) => self.registry.wrapped_object(*id).ok_or(HostError::Unbound(*id)),
            Value::Object(object) => Ok(*object),
            _ => Err(HostError::NotAnObject {
                method: name.to_string(),
            }),
        }
    }

    /// The value handed back to the application for a host result.
    fn proxy_value(&self, value: Value) -> Value {
        match self.registry.for_value(&value).and_then(|id| self.registry.get(id)) {
            Some(resource) => resource.proxy_object(),
            None => value,
        }
    }

    fn stack_trace(&self, host: &mut dyn Host, capturing: bool) -> Option<StackTrace> {
        if !capturing || !self.config.stack_traces {
            return None;
        }
        host.capture_stack_trace(self.config.stack_trace_limit)
    }
}
