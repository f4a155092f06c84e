//! Versioned document snapshots and the single-writer handle that publishes them
//!
//! Every change produces a new immutable [`Snapshot`] sharing all untouched
//! structure with the previous one. [`Doc`] buffers edits, applies them in
//! batches and publishes the result with a compare-and-swap, so readers never
//! lock and never observe a half-applied batch.

use crate::config::{DocConfig, SchedulerConfig};
use crate::error::Result;
use crate::lines::{LineTable, LineTokens};
use crate::markers::{EditMap, Marker, MarkerId, MarkerTree};
use crate::scheduler::{self, TokenizerHandle};
use crate::syntax::ContinuationState;
use crate::tree::Tree;
use crate::worker::{LexRequest, LexResponse, WorkerChannels};
use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A change to the document
#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    Insert { pos: usize, text: String },
    Delete { range: Range<usize> },
    Replace { range: Range<usize>, text: String },
    AddMarker(Marker),
    RemoveMarker(MarkerId),
    SetSelection(Selection),
}

impl Edit {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        Edit::Insert {
            pos,
            text: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Edit::Delete { range }
    }

    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Edit::Replace {
            range,
            text: text.into(),
        }
    }
}

/// Caret and selection as byte offsets; `head` is the caret
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn cursor(pos: usize) -> Self {
        Self::new(pos, pos)
    }

    pub fn range(&self) -> Range<usize> {
        self.anchor.min(self.head)..self.anchor.max(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    /// Follow a text edit; text inserted at the caret ends up before it
    pub fn map(&self, edit: &EditMap) -> Self {
        Self {
            anchor: edit.map(self.anchor, true),
            head: edit.map(self.head, true),
        }
    }
}

/// Immutable state of the document at one point in time
#[derive(Clone, Debug)]
pub struct Snapshot {
    text: Tree,
    markers: MarkerTree,
    lines: LineTable,
    selection: Selection,
    timestamp: u64,
    revision: u64,
    first_invalid: usize,
}

impl Snapshot {
    pub fn new(text: Tree) -> Self {
        let lines = LineTable::new(text.line_count());
        Self {
            text,
            markers: MarkerTree::new(),
            lines,
            selection: Selection::default(),
            timestamp: 0,
            revision: 0,
            first_invalid: 0,
        }
    }

    pub fn text(&self) -> &Tree {
        &self.text
    }

    pub fn markers(&self) -> &MarkerTree {
        &self.markers
    }

    pub fn lines(&self) -> &LineTable {
        &self.lines
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Bumped by every text change
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Bumped by every publish
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// First line whose tokens are not known to be current
    pub fn first_invalid(&self) -> usize {
        self.first_invalid
    }

    pub fn line_count(&self) -> usize {
        self.text.line_count()
    }

    /// Current tokens of `line`, if it has been tokenized since its last change
    pub fn tokens(&self, line: usize) -> Option<&Arc<LineTokens>> {
        if line < self.first_invalid {
            self.lines.get(line)
        } else {
            None
        }
    }

    /// True when every line carries current tokens
    pub fn is_fully_tokenized(&self) -> bool {
        self.first_invalid >= self.line_count()
    }

    /// Apply a batch of edits as one new version; any invalid edit rejects the batch
    pub fn apply_edits(&self, edits: &[Edit]) -> Result<Snapshot> {
        let mut next = self.clone();
        let mut text_changed = false;
        for edit in edits {
            match edit {
                Edit::Insert { pos, text } => text_changed |= next.apply_text(*pos..*pos, text)?,
                Edit::Delete { range } => text_changed |= next.apply_text(range.clone(), "")?,
                Edit::Replace { range, text } => text_changed |= next.apply_text(range.clone(), text)?,
                Edit::AddMarker(marker) => next.markers = next.markers.insert(marker, &next.text)?,
                Edit::RemoveMarker(id) => next.markers = next.markers.remove(*id)?,
                Edit::SetSelection(selection) => {
                    next.text.check_offset(selection.anchor)?;
                    next.text.check_offset(selection.head)?;
                    next.selection = *selection;
                }
            }
        }
        if text_changed {
            next.timestamp += 1;
        }
        next.revision += 1;
        debug_assert_eq!(next.lines.len(), next.text.line_count());
        Ok(next)
    }

    fn apply_text(&mut self, range: Range<usize>, text: &str) -> Result<bool> {
        self.text.check_range(&range)?;
        if range.is_empty() && text.is_empty() {
            return Ok(false);
        }

        let first = self.text.byte_to_line(range.start)?;
        let last = self.text.byte_to_line(range.end)?;
        let new_text = self.text.replace(range.clone(), text)?;
        let added = bytecount::count(text.as_bytes(), b'\n');

        let edit = EditMap {
            start: range.start,
            removed: range.len(),
            inserted: text.len(),
        };
        self.lines = self.lines.splice(first..last + 1, added + 1);
        self.first_invalid = self.first_invalid.min(first);
        self.markers = self.markers.map_edit(edit, &new_text);
        self.selection = self.selection.map(&edit);
        self.text = new_text;
        Ok(true)
    }

    /// State at the start of `line`, assuming all earlier lines are tokenized
    pub fn state_before(&self, line: usize, initial: &ContinuationState) -> ContinuationState {
        match line.checked_sub(1).and_then(|prev| self.lines.get(prev)) {
            Some(prev) => prev.state_out.clone(),
            None => initial.clone(),
        }
    }

    /// Request for lexing `line` against this version
    pub fn lex_request(&self, line: usize, initial: &ContinuationState) -> Option<LexRequest> {
        let text = self.text.line_text(line).ok()?;
        Some(LexRequest {
            line,
            text,
            state: self.state_before(line, initial),
            timestamp: self.timestamp,
        })
    }

    /// Store a lexing result if it belongs to this version and to `first_invalid`
    ///
    /// Following lines whose cached input state equals the new output state keep
    /// their tokens, and `first_invalid` moves past them.
    pub fn apply_tokens(&self, response: &LexResponse, initial: &ContinuationState) -> Option<Snapshot> {
        let line = response.line;
        if response.timestamp != self.timestamp || line != self.first_invalid || line >= self.line_count() {
            return None;
        }

        let entry = Arc::new(LineTokens {
            tokens: response.tokens.clone(),
            state_in: self.state_before(line, initial),
            state_out: response.state.clone(),
        });
        let lines = self.lines.set(line, entry);

        let mut first_invalid = line + 1;
        let mut state = &response.state;
        while let Some(cached) = lines.get(first_invalid) {
            if cached.state_in != *state {
                break;
            }
            state = &cached.state_out;
            first_invalid += 1;
        }

        Some(Snapshot {
            lines,
            first_invalid,
            revision: self.revision + 1,
            ..self.clone()
        })
    }
}

/// Publish `f(current)` with compare-and-swap, retrying when another writer got in first
pub(crate) fn publish_with<E, F>(state: &ArcSwap<Snapshot>, mut f: F) -> std::result::Result<Option<Arc<Snapshot>>, E>
where
    F: FnMut(&Snapshot) -> std::result::Result<Option<Snapshot>, E>,
{
    loop {
        let current = state.load_full();
        let Some(next) = f(&current)? else {
            return Ok(None);
        };
        let next = Arc::new(next);
        let previous = state.compare_and_swap(&current, next.clone());
        if Arc::ptr_eq(&*previous, &current) {
            return Ok(Some(next));
        }
    }
}

// === Document Handle ===

/// Single-writer document with lock-free snapshot reads
pub struct Doc {
    state: Arc<ArcSwap<Snapshot>>,
    pending: SegQueue<Edit>,
    pending_count: AtomicUsize,
    /// Serializes flushes so batches apply in order
    writer: Mutex<()>,
    /// Timestamp of the latest text change, watched by tokenizer schedulers
    updates: watch::Sender<u64>,
    next_marker: AtomicU64,
    config: DocConfig,
}

impl Doc {
    pub fn new() -> Self {
        Self::with_config("", DocConfig::default())
    }

    pub fn from_str(text: &str) -> Self {
        Self::with_config(text, DocConfig::default())
    }

    pub fn with_config(text: &str, config: DocConfig) -> Self {
        Self::from_tree(Tree::from_str(text), config)
    }

    pub fn from_tree(text: Tree, config: DocConfig) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            state: Arc::new(ArcSwap::from_pointee(Snapshot::new(text))),
            pending: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            writer: Mutex::new(()),
            updates,
            next_marker: AtomicU64::new(1),
            config,
        }
    }

    /// Current snapshot (lock-free)
    pub fn read(&self) -> Arc<Snapshot> {
        self.state.load_full()
    }

    /// Buffer an edit, flushing once enough are pending
    pub fn edit(&self, edit: Edit) -> Result<()> {
        self.pending.push(edit);
        let count = self.pending_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.config.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Apply all pending edits as one snapshot
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock();

        let mut edits = Vec::new();
        while let Some(edit) = self.pending.pop() {
            edits.push(edit);
        }
        if edits.is_empty() {
            return Ok(());
        }
        self.pending_count.fetch_sub(edits.len(), Ordering::Relaxed);

        let published = match publish_with(&self.state, |current| current.apply_edits(&edits).map(Some)) {
            Ok(published) => published,
            Err(err) => {
                tracing::debug!(edits = edits.len(), error = %err, "edit batch rejected");
                return Err(err);
            }
        };

        if let Some(snapshot) = published {
            tracing::debug!(
                timestamp = snapshot.timestamp(),
                revision = snapshot.revision(),
                first_invalid = snapshot.first_invalid(),
                edits = edits.len(),
                "published snapshot"
            );
            let timestamp = snapshot.timestamp();
            self.updates.send_if_modified(|current| {
                if *current == timestamp {
                    return false;
                }
                *current = timestamp;
                true
            });
        }
        Ok(())
    }

    /// Buffer and flush a single edit
    pub fn apply(&self, edit: Edit) -> Result<()> {
        self.pending.push(edit);
        self.pending_count.fetch_add(1, Ordering::Relaxed);
        self.flush()
    }

    /// Fresh marker id, unique within this document
    pub fn next_marker_id(&self) -> MarkerId {
        MarkerId(self.next_marker.fetch_add(1, Ordering::Relaxed))
    }

    /// Buffer `marker` under a fresh id
    pub fn add_marker(&self, marker: Marker) -> Result<MarkerId> {
        let id = self.next_marker_id();
        self.edit(Edit::AddMarker(Marker { id, ..marker }))?;
        Ok(id)
    }

    /// Receiver notified with the timestamp of every text change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    /// Start a background scheduler keeping this document's tokens current
    ///
    /// Must be called inside a tokio runtime. Dropping the handle stops it.
    pub fn spawn_tokenizer(&self, worker: WorkerChannels, config: &SchedulerConfig) -> TokenizerHandle {
        scheduler::spawn(self.state.clone(), self.updates.subscribe(), worker, config.clone())
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}
