//! Opaque string identifiers handed to the host.
//!
//! Ids are small JSON objects so the host can round-trip them without knowing
//! their structure: `{"injectedScriptId":1,"traceLogId":2}` for trace logs and
//! `{"injectedScriptId":1,"resourceId":7}` for resources.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a trace log within one inspector session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLogId {
    pub injected_script_id: u64,
    pub trace_log_id: u64,
}

/// Identifies a resource within one inspector session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub injected_script_id: u64,
    pub resource_id: u64,
}

/// Writes `value` as compact JSON.
fn write_json(f: &mut fmt::Formatter<'_>, value: &impl Serialize) -> fmt::Result {
    let json = serde_json::to_string(value).map_err(|_| fmt::Error)?;
    f.write_str(&json)
}

impl fmt::Display for TraceLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_json(f, self)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_json(f, self)
    }
}

/// Failure to decode an id string.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("malformed id: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("id has no {0} component")]
    MissingComponent(&'static str),
}

/// All components an id string may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedId {
    pub injected_script_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_log_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<u64>,
}

impl ParsedId {
    pub fn parse(id: &str) -> Result<Self, IdError> {
        Ok(serde_json::from_str(id)?)
    }
}

impl TraceLogId {
    pub fn parse(id: &str) -> Result<Self, IdError> {
        let parsed = ParsedId::parse(id)?;
        let trace_log_id = parsed
            .trace_log_id
            .ok_or(IdError::MissingComponent("traceLogId"))?;
        Ok(Self {
            injected_script_id: parsed.injected_script_id,
            trace_log_id,
        })
    }
}

impl ResourceRef {
    pub fn parse(id: &str) -> Result<Self, IdError> {
        let parsed = ParsedId::parse(id)?;
        let resource_id = parsed
            .resource_id
            .ok_or(IdError::MissingComponent("resourceId"))?;
        Ok(Self {
            injected_script_id: parsed.injected_script_id,
            resource_id,
        })
    }
}
