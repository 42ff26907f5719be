//! Errors returned by the inspector facade.
//!
//! The host receives these as strings, so the `Display` output is part of
//! the protocol.

use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InspectorError {
    #[error("Error: Trace log with the given ID not found.")]
    TraceLogNotFound,
    #[error("Error: Wrong resource ID: {0}")]
    WrongResourceId(String),
    #[error("Error: Resource with the given ID not found.")]
    ResourceNotFound,
    #[error("Error: Trace log replay has not started yet.")]
    ReplayNotStarted,
    #[error("Error: Both IDs must point to the same injected script.")]
    InjectedScriptMismatch,
    #[error("Error: Resource with the given ID has not been replayed yet.")]
    ResourceNotReplayed,
    #[error("Error: Trace log is empty.")]
    EmptyTraceLog,
    #[error("Error: {0}")]
    Host(#[from] HostError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_host_facing() {
        assert_eq!(
            InspectorError::WrongResourceId("abc".to_string()).to_string(),
            "Error: Wrong resource ID: abc"
        );
        assert_eq!(
            InspectorError::ReplayNotStarted.to_string(),
            "Error: Trace log replay has not started yet."
        );
    }
}
