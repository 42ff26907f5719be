//! Display form of recorded calls, as listed by `traceLog`.

use canvas_inspector_shared::Value;
use hashbrown::{HashMap, HashSet};
use serde::Serialize;

use crate::cache::Cache;
use crate::call::ReplayableCall;
use crate::canvas2d;
use crate::resource::replayable::ReplayableResource;
use crate::webgl;

/// `names` plus the `webkit`-prefixed spelling of each (`fillRect` and
/// `webkitFillRect`).
pub fn prefixed_property_names(names: &[&str]) -> HashSet<String> {
    let mut set = HashSet::with_capacity(names.len() * 2);
    for name in names {
        set.insert((*name).to_string());
        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            set.insert(format!("webkit{}{}", first.to_ascii_uppercase(), chars.as_str()));
        }
    }
    set
}

/// A value as shown to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallArgument {
    pub description: String,
}

/// Formatted call. Method calls fill `function_name`/`arguments`, property
/// assignments fill `property`/`value`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<CallArgument>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CallArgument>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_drawing_call: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CallArgument>,
}

/// Formats calls made on one kind of context.
#[derive(Debug, Clone, Default)]
pub struct CallFormatter {
    drawing_methods: HashSet<String>,
}

impl CallFormatter {
    pub fn new(drawing_methods: HashSet<String>) -> Self {
        Self { drawing_methods }
    }

    pub fn format_call(&self, call: &ReplayableCall, source: &Cache<ReplayableResource>) -> FormattedCall {
        if call.is_property_setter() {
            let args = call.args();
            return FormattedCall {
                property: args.first().map(ToString::to_string),
                value: Some(format_value(args.get(1).unwrap_or(&Value::Undefined), source)),
                ..Default::default()
            };
        }
        let name = call.function_name();
        FormattedCall {
            function_name: Some(name.to_string()),
            arguments: Some(call.args().iter().map(|arg| format_value(arg, source)).collect()),
            result: (!call.result().is_undefined()).then(|| format_value(call.result(), source)),
            is_drawing_call: self.drawing_methods.contains(name),
            ..Default::default()
        }
    }
}

/// Resource handles show as `name@kindId`, everything else as its string form.
pub fn format_value(value: &Value, source: &Cache<ReplayableResource>) -> CallArgument {
    let description = match value {
        Value::Resource(id) => match source.get(*id) {
            Some(resource) => resource.description(),
            None => value.to_string(),
        },
        other => other.to_string(),
    };
    CallArgument { description }
}

/// Formatters keyed by resource name. A call is formatted by its receiver's
/// formatter, else its context's, else a plain one.
#[derive(Debug, Clone)]
pub struct FormatterRegistry {
    formatters: HashMap<String, CallFormatter>,
    fallback: CallFormatter,
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            formatters: HashMap::new(),
            fallback: CallFormatter::default(),
        };
        registry.register(
            "CanvasRenderingContext2D",
            CallFormatter::new(prefixed_property_names(&canvas2d::DRAWING_METHODS)),
        );
        registry.register(
            "WebGLRenderingContext",
            CallFormatter::new(prefixed_property_names(&webgl::DRAWING_METHODS)),
        );
        registry
    }
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_name: &str, formatter: CallFormatter) {
        self.formatters.insert(resource_name.to_string(), formatter);
    }

    pub fn format_call(&self, call: &ReplayableCall, source: &Cache<ReplayableResource>) -> FormattedCall {
        let formatter = call
            .replayable_resource()
            .and_then(|id| source.get(id))
            .and_then(|resource| {
                self.formatters.get(resource.name()).or_else(|| {
                    source
                        .get(resource.replayable_context_resource())
                        .and_then(|context| self.formatters.get(context.name()))
                })
            })
            .unwrap_or(&self.fallback);
        formatter.format_call(call, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_names_include_webkit_variants() {
        let names = prefixed_property_names(&["fillRect", "drawImage"]);
        assert_eq!(names.len(), 4);
        assert!(names.contains("fillRect"));
        assert!(names.contains("webkitFillRect"));
        assert!(names.contains("webkitDrawImage"));
        assert!(!names.contains("webkitfillRect"));
    }

    #[test]
    fn test_format_value_uses_string_form() {
        let cache = Cache::new();
        assert_eq!(format_value(&Value::Number(33984.0), &cache).description, "33984");
        assert_eq!(format_value(&Value::Bool(false), &cache).description, "false");
        assert_eq!(format_value(&Value::Null, &cache).description, "null");
    }

    #[test]
    fn test_formatted_call_omits_empty_fields() {
        let call = FormattedCall {
            function_name: Some("clear".to_string()),
            arguments: Some(vec![CallArgument {
                description: "16384".to_string(),
            }]),
            is_drawing_call: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "functionName": "clear",
                "arguments": [{"description": "16384"}],
                "isDrawingCall": true
            })
        );
    }
}
