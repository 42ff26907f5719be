//! Detached copies of recorded call arguments.
//!
//! A recorded call must not change when the application later mutates the
//! objects it passed. [`ValueCloner`] copies everything that can be mutated
//! in place: plain arrays, buffers, typed arrays, images, canvases, video
//! frames and pixel buffers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use canvas_inspector_shared::{HostObject, ObjectClass, Value};

use crate::host::{Host, HostError};

/// Clones host values, keeping one scratch 2D context for pixel copies.
#[derive(Debug, Default)]
pub struct ValueCloner {
    scratch_context: Option<HostObject>,
}

impl ValueCloner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a value unaffected by later mutation of `value`.
    ///
    /// Values that cannot be cloned are logged and returned as-is.
    pub fn clone_value(&mut self, host: &mut dyn Host, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(Rc::new(RefCell::new(items.borrow().clone()))),
            Value::ArrayBuffer(bytes) => Value::buffer(bytes.borrow().clone()),
            Value::Typed(array) => Value::Typed(array.copy()),
            Value::Object(object) => match self.clone_host_object(host, object) {
                Ok(cloned) => cloned,
                Err(e) => {
                    tracing::warn!(error = %e, class = object.class.name(), "Failed to clone host object");
                    value.clone()
                }
            },
            _ => value.clone(),
        }
    }

    fn clone_host_object(
        &mut self,
        host: &mut dyn Host,
        object: &HostObject,
    ) -> Result<Value, HostError> {
        match object.class {
            ObjectClass::Image => {
                // Revoked blob URLs cannot be reloaded, so the pixels are copied instead.
                let src = host.get_property(object, "src")?;
                if src.as_str().is_some_and(|s| s.starts_with("blob:")) {
                    self.clone_into_canvas(host, object, None).map(Value::Object)
                } else {
                    host.clone_node(object).map(Value::Object)
                }
            }
            ObjectClass::Canvas => self.clone_into_canvas(host, object, None).map(Value::Object),
            ObjectClass::Video => {
                let width = dimension(host, object, "videoWidth")?;
                let height = dimension(host, object, "videoHeight")?;
                self.clone_into_canvas(host, object, Some((width, height)))
                    .map(Value::Object)
            }
            ObjectClass::ImageData => self.clone_image_data(host, object),
            class => {
                tracing::error!(class = class.name(), "Cannot clone host object");
                Ok(Value::Object(*object))
            }
        }
    }

    /// Draws `source` into a fresh canvas of its own size, or of `size` when given.
    pub fn clone_into_canvas(
        &mut self,
        host: &mut dyn Host,
        source: &HostObject,
        size: Option<(u32, u32)>,
    ) -> Result<HostObject, HostError> {
        let (width, height) = match size {
            Some(size) => size,
            None => (
                dimension(host, source, "width")?,
                dimension(host, source, "height")?,
            ),
        };
        let canvas = host.create_canvas(width, height)?;
        let context = context_2d(host, &canvas)?;
        host.invoke(
            &context,
            "drawImage",
            &[Value::Object(*source), 0.into(), 0.into()],
        )?;
        Ok(canvas)
    }

    fn clone_image_data(
        &mut self,
        host: &mut dyn Host,
        source: &HostObject,
    ) -> Result<Value, HostError> {
        let context = self.scratch_context(host)?;
        let copy = host.invoke(&context, "createImageData", &[Value::Object(*source)])?;
        let Some(copy_object) = copy.as_object() else {
            return Err(HostError::InvalidArgument {
                method: "createImageData".to_string(),
                reason: "did not return an object".to_string(),
            });
        };
        let (Value::Typed(from), Value::Typed(to)) = (
            host.get_property(source, "data")?,
            host.get_property(&copy_object, "data")?,
        ) else {
            return Err(HostError::UnknownProperty {
                class: source.class,
                property: "data".to_string(),
            });
        };
        for (i, value) in from.to_vec().into_iter().enumerate() {
            to.set(i, value);
        }
        Ok(copy)
    }

    fn scratch_context(&mut self, host: &mut dyn Host) -> Result<HostObject, HostError> {
        if let Some(context) = self.scratch_context {
            return Ok(context);
        }
        let canvas = host.create_canvas(1, 1)?;
        let context = context_2d(host, &canvas)?;
        self.scratch_context = Some(context);
        Ok(context)
    }
}

/// One-level copy of a small key/value map.
pub fn clone_object<K: Ord + Clone, V: Clone>(
    object: Option<&BTreeMap<K, V>>,
) -> Option<BTreeMap<K, V>> {
    object.cloned()
}

fn dimension(host: &dyn Host, object: &HostObject, name: &str) -> Result<u32, HostError> {
    Ok(host.get_property(object, name)?.as_u32().unwrap_or(0))
}

fn context_2d(host: &mut dyn Host, canvas: &HostObject) -> Result<HostObject, HostError> {
    host.invoke(canvas, "getContext", &["2d".into()])?
        .as_object()
        .ok_or_else(|| HostError::InvalidArgument {
            method: "getContext".to_string(),
            reason: "no 2d context available".to_string(),
        })
}
