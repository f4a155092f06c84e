//! Configuration for the editing core

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub doc: DocConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocConfig {
    /// Pending edits that trigger an automatic flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Busy time in milliseconds before the scheduler yields to the host
    #[serde(default = "default_slice_ms")]
    pub slice_ms: u64,
    /// Length of the cooperative pause; 0 means a plain task yield
    #[serde(default)]
    pub pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Bound of the request and response channels
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

impl SchedulerConfig {
    pub fn slice(&self) -> Duration {
        Duration::from_millis(self.slice_ms)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slice_ms: default_slice_ms(),
            pause_ms: 0,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_flush_threshold() -> usize {
    16
}

fn default_slice_ms() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config.doc.flush_threshold, 16);
        assert_eq!(config.scheduler.slice(), Duration::from_millis(5));
        assert_eq!(config.scheduler.pause(), Duration::ZERO);
        assert_eq!(config.worker.queue_capacity, 64);
    }

    #[test]
    fn partial_sections_override_only_given_fields() {
        let config = CoreConfig::from_toml_str(
            r#"
            [scheduler]
            pause_ms = 2

            [worker]
            queue_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.slice_ms, 5);
        assert_eq!(config.scheduler.pause_ms, 2);
        assert_eq!(config.worker.queue_capacity, 8);
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let err = CoreConfig::from_toml_str("[doc]\nflush_threshold = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CoreConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
