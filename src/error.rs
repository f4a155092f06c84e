//! Error types for structural faults and configuration loading
//!
//! Out-of-range positions are programming errors: operations fail fast with a
//! precise fault instead of clamping. Stale tokenizer results are not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Faults raised by tree, marker and document operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("line {line} out of range (document has {count} lines)")]
    LineOutOfRange { line: usize, count: usize },

    #[error("offset {offset} out of range (document is {len} bytes)")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("invalid range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    #[error("offset {offset} is not on a character boundary")]
    NotCharBoundary { offset: usize },

    #[error("invalid utf-8 input")]
    InvalidUtf8,

    #[error("unknown marker {0}")]
    UnknownMarker(u64),

    #[error("marker {0} already exists")]
    DuplicateMarker(u64),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Failures while loading a [`crate::config::CoreConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
