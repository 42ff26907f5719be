//! Inspector configuration (`<config dir>/config.toml`)
//!
//! Handles loading, saving, and providing defaults for inspector settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Inspector configuration.
///
/// Contains all user-configurable settings organized into sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InspectorConfig {
    /// Call capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Trace log presentation settings
    #[serde(default)]
    pub trace_log: TraceLogConfig,
}

/// Call capture configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Attach a call-stack snapshot to each recorded call (default: true)
    #[serde(default = "default_true")]
    pub stack_traces: bool,
    /// Maximum number of frames kept per snapshot (default: 1)
    #[serde(default = "default_stack_trace_limit")]
    pub stack_trace_limit: usize,
}

/// Trace log presentation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TraceLogConfig {
    /// Calls returned per `traceLog` request when the caller gives no
    /// `maxLength` (default: unlimited)
    #[serde(default)]
    pub page_size: Option<usize>,
}

fn default_true() -> bool {
    true
}
fn default_stack_trace_limit() -> usize {
    1
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stack_traces: default_true(),
            stack_trace_limit: default_stack_trace_limit(),
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\CanvasInspector\config`
/// On macOS: `~/Library/Application Support/org.canvas-inspector.CanvasInspector`
/// On Linux: `~/.config/CanvasInspector`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org.canvas-inspector", "", "CanvasInspector")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> InspectorConfig {
    let Some(path) = config_dir().map(|dir| dir.join("config.toml")) else {
        return InspectorConfig::default();
    };
    if !path.exists() {
        return InspectorConfig::default();
    }
    match load_from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Falling back to default inspector config");
            InspectorConfig::default()
        }
    }
}

/// Loads the configuration from an explicit path.
pub fn load_from_file(path: &Path) -> Result<InspectorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Saves the configuration to an explicit path, creating parent directories.
pub fn save_to_file(config: &InspectorConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = InspectorConfig::default();
        assert!(config.capture.stack_traces);
        assert_eq!(config.capture.stack_trace_limit, 1);
        assert_eq!(config.trace_log.page_size, None);
    }

    #[test]
    fn test_config_deserialize_empty() {
        // Empty TOML should produce defaults
        let config: InspectorConfig = toml::from_str("").unwrap();
        assert_eq!(config, InspectorConfig::default());
    }

    #[test]
    fn test_config_deserialize_partial_capture() {
        let toml_str = r#"
[capture]
stack_traces = false
"#;
        let config: InspectorConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.capture.stack_traces);
        assert_eq!(config.capture.stack_trace_limit, 1); // default
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = InspectorConfig {
            capture: CaptureConfig {
                stack_traces: true,
                stack_trace_limit: 8,
            },
            trace_log: TraceLogConfig {
                page_size: Some(250),
            },
        };
        save_to_file(&config, &path).unwrap();

        let loaded = load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\nstack_trace_limit = \"many\"\n").unwrap();

        let err = load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
