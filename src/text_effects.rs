//! Text styling shared by tokens, markers and the selection
//!
//! A [`Style`] is an immutable property map. Overlapping styles are resolved by
//! priority layer in [`crate::shred`]; higher layers win per property.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Property prefix routed to background runs
const BACKGROUND_PREFIX: &str = "background";

/// Immutable mapping of style property to value, cheap to clone
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Style(Arc<BTreeMap<String, String>>);

impl Style {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `key` set to `value`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.0).insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Split into (foreground, background) halves by property name
    pub fn split_background(&self) -> (Style, Style) {
        if self.is_empty() {
            return (self.clone(), self.clone());
        }
        let (background, foreground): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| k.starts_with(BACKGROUND_PREFIX));
        (Style(Arc::new(foreground)), Style(Arc::new(background)))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Style {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Style(Arc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

impl fmt::Debug for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

// === Built-in Priority Layers ===

pub mod priority {
    /// Base text styling and default marker layer
    pub const BASE: i32 = 0;
    /// Syntax highlighting
    pub const SYNTAX: i32 = 10;
    /// Search highlighting
    pub const SEARCH: i32 = 20;
    /// Error highlighting
    pub const ERROR: i32 = 30;
    /// Selection highlighting (highest priority)
    pub const SELECTION: i32 = 40;
}
