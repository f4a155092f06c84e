//! Editing core: persistent text and marker trees, incremental tokenization
//! and styled line windows for presentation

pub mod config;
pub mod document;
pub mod error;
pub mod lines;
pub mod markers;
pub mod query;
pub mod scheduler;
pub mod shred; // Interval flattening of layered styles
pub mod syntax;
pub mod text_effects;
pub mod tree;
pub mod worker;

// Re-export core types
pub use config::{CoreConfig, DocConfig, SchedulerConfig, WorkerConfig};
pub use document::{Doc, Edit, Selection, Snapshot};
pub use error::{ConfigError, CoreError, Result};
pub use markers::{Marker, MarkerId, MarkerRef, MarkerTree};
pub use query::{query_window, window_changed, LineInfo, LineSpan};
pub use scheduler::TokenizerHandle;
pub use shred::{shred, shred_from, Pos, Run, RunLen, StyledRange};
pub use syntax::{tokenize_all, CLike, ContinuationState, PlainText, Token, TokenKind, Tokenizer};
pub use text_effects::{priority, Style};
pub use tree::Tree;
pub use worker::{spawn_worker, LexRequest, LexResponse, WorkerChannels};
