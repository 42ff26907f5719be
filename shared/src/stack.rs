//! Call-stack snapshots attached to recorded calls.

use serde::{Deserialize, Serialize};

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub line_number: u32,
    pub column_number: u32,
}

impl CallFrame {
    pub fn new(source_url: impl Into<String>, line_number: u32, column_number: u32) -> Self {
        Self {
            function_name: String::new(),
            source_url: source_url.into(),
            line_number,
            column_number,
        }
    }
}

/// Ordered call stack, innermost frame first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackTrace {
    frames: Vec<CallFrame>,
}

impl StackTrace {
    pub fn new(frames: Vec<CallFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn call_frame(&self, index: usize) -> Option<&CallFrame> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }
}
