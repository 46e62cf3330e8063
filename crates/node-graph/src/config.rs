//! Engine configuration
//!
//! All fields have defaults, so an empty JSON object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub canvas: CanvasConfig,
}

impl EngineConfig {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on nodes running at once within a level (None = unbounded)
    pub max_parallelism: Option<usize>,
}

/// Canvas mutation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Offer the target node a reconfiguration pass after connect/disconnect
    pub reconfigure_on_connect: bool,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            reconfigure_on_connect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.canvas.reconfigure_on_connect);
        assert_eq!(config.scheduler.max_parallelism, None);
    }

    #[test]
    fn test_partial_override() {
        let config =
            EngineConfig::from_json_str(r#"{"scheduler": {"max_parallelism": 2}}"#).unwrap();
        assert_eq!(config.scheduler.max_parallelism, Some(2));
        assert!(config.canvas.reconfigure_on_connect);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"canvas": {{"reconfigure_on_connect": false}}}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(!config.canvas.reconfigure_on_connect);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/engine.json").unwrap_err();
        assert!(matches!(err, crate::error::GraphError::Io(_)));
    }
}
