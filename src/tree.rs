//! Persistent text tree with summed metadata for O(log n) line and byte queries
//!
//! Nodes are shared between versions through `Arc`. An edit copies the path from
//! the root to the touched leaves and reuses every other subtree, so a reader
//! holding an older `Tree` keeps a consistent view while newer versions are built.

use crate::error::{CoreError, Result};
use bytecount::{count as bytecount_count, num_chars};
use memchr::{memchr, memchr_iter};
use simdutf8::basic::from_utf8;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Maximum children per internal node
const MAX_CHILDREN: usize = 16;

/// Chunk size used when building leaves
const CHUNK_SIZE: usize = 1024;

/// Leaves above this size are re-chunked after an edit
const MAX_LEAF: usize = 2 * CHUNK_SIZE;

/// Leaves below this size are merged into a neighbour after an edit
const MIN_LEAF: usize = CHUNK_SIZE / 4;

// === Core Types ===

/// Immutable text snapshot
#[derive(Clone)]
pub struct Tree {
    root: Arc<Node>,
}

/// Tree node - either a leaf holding a text chunk or internal with children
enum Node {
    Leaf { text: String, sums: Sums },
    Internal { children: Vec<Arc<Node>>, sums: Sums },
}

/// Aggregated metadata for O(log n) queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Sums {
    bytes: usize,
    newlines: usize,
    chars: usize,
}

impl Sums {
    fn of_text(text: &str) -> Self {
        let bytes = text.as_bytes();
        Self {
            bytes: bytes.len(),
            newlines: bytecount_count(bytes, b'\n'),
            chars: num_chars(bytes),
        }
    }

    fn add(&mut self, other: &Sums) {
        self.bytes += other.bytes;
        self.newlines += other.newlines;
        self.chars += other.chars;
    }
}

impl Node {
    fn leaf(text: String) -> Arc<Self> {
        Arc::new(Node::Leaf {
            sums: Sums::of_text(&text),
            text,
        })
    }

    fn internal(children: Vec<Arc<Node>>) -> Arc<Self> {
        let mut sums = Sums::default();
        for child in &children {
            sums.add(child.sums());
        }
        Arc::new(Node::Internal { children, sums })
    }

    #[inline]
    fn sums(&self) -> &Sums {
        match self {
            Node::Leaf { sums, .. } | Node::Internal { sums, .. } => sums,
        }
    }

    #[inline]
    fn byte_count(&self) -> usize {
        self.sums().bytes
    }

    fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

// === Tree Implementation ===

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Node::leaf(String::new()),
        }
    }

    pub fn from_str(text: &str) -> Self {
        Self::from_level(chunk_leaves(text))
    }

    /// Build a tree from raw bytes, rejecting invalid UTF-8
    pub fn from_utf8(bytes: &[u8]) -> Result<Self> {
        let text = from_utf8(bytes).map_err(|_| CoreError::InvalidUtf8)?;
        Ok(Self::from_str(text))
    }

    /// Stack sibling nodes of equal height into a single root
    fn from_level(mut nodes: Vec<Arc<Node>>) -> Self {
        if nodes.is_empty() {
            return Self::new();
        }

        while nodes.len() > 1 {
            nodes = group_children(nodes);
        }

        let mut root = nodes.remove(0);
        // Collapse single-child chains left behind by deletions
        loop {
            let next = match root.as_ref() {
                Node::Internal { children, .. } if children.len() == 1 => children[0].clone(),
                _ => break,
            };
            root = next;
        }

        Self { root }
    }

    pub fn byte_count(&self) -> usize {
        self.root.byte_count()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_count() == 0
    }

    pub fn char_count(&self) -> usize {
        self.root.sums().chars
    }

    pub fn newline_count(&self) -> usize {
        self.root.sums().newlines
    }

    /// Number of lines; the empty document has one empty line
    pub fn line_count(&self) -> usize {
        self.newline_count() + 1
    }

    // === Editing (copy-on-write) ===

    pub fn insert(&self, pos: usize, text: &str) -> Result<Tree> {
        self.replace(pos..pos, text)
    }

    pub fn delete(&self, range: Range<usize>) -> Result<Tree> {
        self.replace(range, "")
    }

    /// Replace a byte range, sharing every untouched subtree with `self`
    pub fn replace(&self, range: Range<usize>, text: &str) -> Result<Tree> {
        self.check_range(&range)?;
        if range.is_empty() && text.is_empty() {
            return Ok(self.clone());
        }

        let pieces = edit_node(&self.root, range, text);
        let tree = Self::from_level(pieces);
        debug_assert!(validate_tree_structure(&tree.root), "tree structure invalid after edit");
        Ok(tree)
    }

    /// Check that `range` is ordered, inside the document and on character boundaries
    pub fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end {
            return Err(CoreError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        self.check_offset(range.start)?;
        self.check_offset(range.end)
    }

    pub fn check_offset(&self, offset: usize) -> Result<()> {
        let len = self.byte_count();
        if offset > len {
            return Err(CoreError::OffsetOutOfRange { offset, len });
        }
        if !self.is_char_boundary(offset) {
            return Err(CoreError::NotCharBoundary { offset });
        }
        Ok(())
    }

    pub fn is_char_boundary(&self, offset: usize) -> bool {
        if offset > self.byte_count() {
            return false;
        }
        let (text, base) = self.leaf_at(offset);
        text.is_char_boundary(offset - base)
    }

    // === Navigation ===

    /// Byte offset where `line` starts - O(log n)
    pub fn line_to_byte(&self, line: usize) -> Result<usize> {
        let count = self.line_count();
        if line >= count {
            return Err(CoreError::LineOutOfRange { line, count });
        }
        if line == 0 {
            return Ok(0);
        }

        // Position just past the `line`-th newline
        let mut node = self.root.as_ref();
        let mut remaining = line;
        let mut base = 0;
        loop {
            match node {
                Node::Internal { children, .. } => {
                    let mut next = None;
                    for child in children {
                        let sums = child.sums();
                        if sums.newlines >= remaining {
                            next = Some(child.as_ref());
                            break;
                        }
                        remaining -= sums.newlines;
                        base += sums.bytes;
                    }
                    match next {
                        Some(child) => node = child,
                        None => return Err(CoreError::LineOutOfRange { line, count }),
                    }
                }
                Node::Leaf { text, .. } => {
                    return memchr_iter(b'\n', text.as_bytes())
                        .nth(remaining - 1)
                        .map(|pos| base + pos + 1)
                        .ok_or(CoreError::LineOutOfRange { line, count });
                }
            }
        }
    }

    /// Line containing `offset` - O(log n)
    pub fn byte_to_line(&self, offset: usize) -> Result<usize> {
        let len = self.byte_count();
        if offset > len {
            return Err(CoreError::OffsetOutOfRange { offset, len });
        }

        let mut node = self.root.as_ref();
        let mut target = offset;
        let mut line = 0;
        loop {
            match node {
                Node::Internal { children, .. } => {
                    let last = children.len() - 1;
                    for (i, child) in children.iter().enumerate() {
                        let sums = child.sums();
                        if target < sums.bytes || i == last {
                            node = child;
                            break;
                        }
                        target -= sums.bytes;
                        line += sums.newlines;
                    }
                }
                Node::Leaf { text, .. } => {
                    let end = target.min(text.len());
                    return Ok(line + bytecount_count(&text.as_bytes()[..end], b'\n'));
                }
            }
        }
    }

    /// Byte range of `line`, excluding its line break
    pub fn line_range(&self, line: usize) -> Result<Range<usize>> {
        let start = self.line_to_byte(line)?;
        let end = if line + 1 < self.line_count() {
            self.line_to_byte(line + 1)? - 1
        } else {
            self.byte_count()
        };
        Ok(start..end)
    }

    /// Offset of the line break ending the line that contains `pos`, or the document end
    pub fn line_end_at(&self, pos: usize) -> usize {
        self.find_next_newline(pos).unwrap_or_else(|| self.byte_count())
    }

    pub fn find_next_newline(&self, pos: usize) -> Option<usize> {
        let mut offset = pos;
        for chunk in self.chunks_at(pos) {
            if let Some(found) = memchr(b'\n', chunk.as_bytes()) {
                return Some(offset + found);
            }
            offset += chunk.len();
        }
        None
    }

    pub fn line_text(&self, line: usize) -> Result<String> {
        let range = self.line_range(line)?;
        self.get_text_slice(range)
    }

    // === Windowed reads ===

    /// Text in `range`, clamped to the document; cost follows the range length
    pub fn get_text_slice(&self, range: Range<usize>) -> Result<String> {
        if range.start > range.end {
            return Err(CoreError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        let end = range.end.min(self.byte_count());
        let start = range.start.min(end);
        if !self.is_char_boundary(start) {
            return Err(CoreError::NotCharBoundary { offset: start });
        }
        if !self.is_char_boundary(end) {
            return Err(CoreError::NotCharBoundary { offset: end });
        }

        let mut out = String::with_capacity(end - start);
        let mut remaining = end - start;
        for chunk in self.chunks_at(start) {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(chunk.len());
            out.push_str(&chunk[..take]);
            remaining -= take;
        }
        Ok(out)
    }

    /// Texts of the lines in `lines`, clamped to the document
    pub fn lines(&self, lines: Range<usize>) -> Vec<String> {
        let end = lines.end.min(self.line_count());
        let start = lines.start.min(end);
        if start == end {
            return Vec::new();
        }

        let (Ok(from), Ok(last)) = (self.line_to_byte(start), self.line_range(end - 1)) else {
            return Vec::new();
        };
        match self.get_text_slice(from..last.end) {
            Ok(text) => text.split('\n').map(str::to_owned).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Iterate text chunks starting at `pos`
    pub fn chunks_at(&self, pos: usize) -> Chunks<'_> {
        Chunks::new(self, pos)
    }

    /// Leaf text and its base offset for the leaf containing `offset`
    fn leaf_at(&self, offset: usize) -> (&str, usize) {
        let mut node = self.root.as_ref();
        let mut base = 0;
        loop {
            match node {
                Node::Internal { children, .. } => {
                    let last = children.len() - 1;
                    for (i, child) in children.iter().enumerate() {
                        let bytes = child.byte_count();
                        if offset < base + bytes || i == last {
                            node = child;
                            break;
                        }
                        base += bytes;
                    }
                }
                Node::Leaf { text, .. } => return (text, base),
            }
        }
    }

    /// Positional handle on the leaves under `range`
    ///
    /// Anchors from two versions compare equal only when both versions share the
    /// same leaves under the window, so the text there is identical.
    pub fn window_anchor(&self, range: Range<usize>) -> WindowAnchor {
        let end = range.end.min(self.byte_count());
        let start = range.start.min(end);
        let mut leaves = Vec::new();
        collect_leaves(&self.root, 0, start..end, &mut leaves);

        let offset_in_first = leaves.first().map(|(_, base)| start - base).unwrap_or(0);
        WindowAnchor {
            leaves: leaves.into_iter().map(|(leaf, _)| leaf).collect(),
            offset_in_first,
            len: end - start,
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.chunks_at(0) {
            f.write_str(chunk)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("bytes", &self.byte_count())
            .field("lines", &self.line_count())
            .finish()
    }
}

// === Window Anchors ===

/// Leaves covering a window of one tree version
#[derive(Clone)]
pub struct WindowAnchor {
    leaves: Vec<Arc<Node>>,
    offset_in_first: usize,
    len: usize,
}

impl WindowAnchor {
    /// True when both windows read the same shared leaves at the same relative offset
    pub fn same_content(&self, other: &WindowAnchor) -> bool {
        self.len == other.len
            && self.offset_in_first == other.offset_in_first
            && self.leaves.len() == other.leaves.len()
            && self
                .leaves
                .iter()
                .zip(&other.leaves)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

// === Chunk Iterator ===

/// Iterator over leaf text, left to right, starting inside the leaf holding `pos`
pub struct Chunks<'a> {
    stack: Vec<(&'a Node, usize)>,
    skip: usize,
}

impl<'a> Chunks<'a> {
    fn new(tree: &'a Tree, pos: usize) -> Self {
        let mut stack = Vec::new();
        let mut node = tree.root.as_ref();
        let mut target = pos;
        loop {
            match node {
                Node::Internal { children, .. } => {
                    let last = children.len() - 1;
                    let mut idx = last;
                    for (i, child) in children.iter().enumerate() {
                        let bytes = child.byte_count();
                        if target < bytes || i == last {
                            idx = i;
                            break;
                        }
                        target -= bytes;
                    }
                    stack.push((node, idx + 1));
                    node = &children[idx];
                }
                Node::Leaf { text, .. } => {
                    stack.push((node, 0));
                    return Self {
                        stack,
                        skip: target.min(text.len()),
                    };
                }
            }
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            let (node, next_child) = self.stack.pop()?;
            match node {
                Node::Leaf { text, .. } => {
                    let skip = std::mem::take(&mut self.skip);
                    let chunk = text.get(skip..).unwrap_or("");
                    if !chunk.is_empty() {
                        return Some(chunk);
                    }
                }
                Node::Internal { children, .. } => {
                    if next_child < children.len() {
                        self.stack.push((node, next_child + 1));
                        // Descend to the leftmost leaf of the next child
                        let mut child = children[next_child].as_ref();
                        loop {
                            match child {
                                Node::Internal { children, .. } => {
                                    self.stack.push((child, 1));
                                    child = &children[0];
                                }
                                Node::Leaf { .. } => {
                                    self.stack.push((child, 0));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

// === Helper Functions ===

/// Split text into leaves of roughly CHUNK_SIZE bytes on character boundaries
fn chunk_leaves(text: &str) -> Vec<Arc<Node>> {
    let mut leaves = Vec::with_capacity(text.len() / CHUNK_SIZE + 1);
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= MAX_LEAF {
            leaves.push(Node::leaf(rest.to_owned()));
            break;
        }
        let mut cut = CHUNK_SIZE;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        leaves.push(Node::leaf(head.to_owned()));
        rest = tail;
    }
    leaves
}

/// Pack nodes into parents of at most MAX_CHILDREN children
fn group_children(nodes: Vec<Arc<Node>>) -> Vec<Arc<Node>> {
    let mut parents = Vec::with_capacity(nodes.len() / MAX_CHILDREN + 1);
    let mut current = Vec::with_capacity(MAX_CHILDREN);
    for node in nodes {
        current.push(node);
        if current.len() == MAX_CHILDREN {
            parents.push(Node::internal(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        parents.push(Node::internal(current));
    }
    parents
}

/// Apply a replacement to `node`, returning replacement siblings of the same height
fn edit_node(node: &Arc<Node>, range: Range<usize>, insert: &str) -> Vec<Arc<Node>> {
    if range.is_empty() && insert.is_empty() {
        return vec![node.clone()];
    }
    match node.as_ref() {
        Node::Leaf { text, .. } => {
            let mut new_text = String::with_capacity(text.len() + insert.len());
            new_text.push_str(&text[..range.start]);
            new_text.push_str(insert);
            new_text.push_str(&text[range.end..]);
            chunk_leaves(&new_text)
        }
        Node::Internal { children, .. } => {
            // First child ending at or after the start (left bias at boundaries),
            // last child starting before the end
            let mut starts = Vec::with_capacity(children.len());
            let mut offset = 0;
            for child in children {
                starts.push(offset);
                offset += child.byte_count();
            }
            let ends = |i: usize| starts[i] + children[i].byte_count();

            let first = (0..children.len())
                .find(|&i| ends(i) >= range.start)
                .unwrap_or(children.len() - 1);
            let last = (first..children.len())
                .rev()
                .find(|&i| starts[i] < range.end)
                .unwrap_or(first)
                .max(first);

            let mut replaced = Vec::new();
            let first_end = range.end.min(ends(first)) - starts[first];
            replaced.extend(edit_node(
                &children[first],
                range.start - starts[first]..first_end,
                insert,
            ));
            // Children strictly between first and last are fully deleted
            if last > first {
                let tail = range.end - starts[last];
                replaced.extend(edit_node(&children[last], 0..tail, ""));
            }

            let edited = first..first + replaced.len();
            let mut new_children = Vec::with_capacity(children.len() + replaced.len());
            new_children.extend_from_slice(&children[..first]);
            new_children.extend(replaced);
            new_children.extend_from_slice(&children[last + 1..]);

            if new_children.first().is_some_and(|c| c.is_leaf()) {
                merge_small_leaves(&mut new_children, edited);
            }

            if new_children.len() <= MAX_CHILDREN {
                if new_children.is_empty() {
                    Vec::new()
                } else {
                    vec![Node::internal(new_children)]
                }
            } else {
                group_children(new_children)
            }
        }
    }
}

/// Merge undersized leaves around the edited window into their neighbours
fn merge_small_leaves(children: &mut Vec<Arc<Node>>, edited: Range<usize>) {
    // Only pairs holding an edited leaf; untouched neighbours keep their identity
    let mut i = edited.start.saturating_sub(1);
    let mut stop = edited.end;
    while i + 1 < children.len() && i < stop {
        let (a, b) = (&children[i], &children[i + 1]);
        let small = a.byte_count() < MIN_LEAF || b.byte_count() < MIN_LEAF;
        if small && a.byte_count() + b.byte_count() <= MAX_LEAF {
            if let (Node::Leaf { text: ta, .. }, Node::Leaf { text: tb, .. }) = (a.as_ref(), b.as_ref()) {
                let mut merged = String::with_capacity(ta.len() + tb.len());
                merged.push_str(ta);
                merged.push_str(tb);
                children.splice(i..i + 2, [Node::leaf(merged)]);
                stop -= 1;
                continue;
            }
        }
        i += 1;
    }
}

/// Collect leaves intersecting `range` (or holding its position when empty)
fn collect_leaves(node: &Arc<Node>, base: usize, range: Range<usize>, out: &mut Vec<(Arc<Node>, usize)>) {
    match node.as_ref() {
        Node::Leaf { .. } => out.push((node.clone(), base)),
        Node::Internal { children, .. } => {
            let last = children.len() - 1;
            let mut offset = base;
            for (i, child) in children.iter().enumerate() {
                let end = offset + child.byte_count();
                let hit = if range.is_empty() {
                    range.start < end || i == last
                } else {
                    offset < range.end && end > range.start
                };
                if hit {
                    collect_leaves(child, offset, range.clone(), out);
                    if range.is_empty() {
                        return;
                    }
                }
                if offset >= range.end && !range.is_empty() {
                    return;
                }
                offset = end;
            }
        }
    }
}

/// Validate tree structure invariants (debug builds only)
#[cfg(debug_assertions)]
fn validate_tree_structure(root: &Node) -> bool {
    fn depth(node: &Node) -> Option<usize> {
        match node {
            Node::Leaf { text, sums } => (Sums::of_text(text) == *sums).then_some(0),
            Node::Internal { children, sums } => {
                if children.is_empty() || children.len() > MAX_CHILDREN {
                    return None;
                }
                let mut computed = Sums::default();
                let mut child_depth = None;
                for child in children {
                    let d = depth(child)?;
                    if child_depth.is_some_and(|cd| cd != d) {
                        return None;
                    }
                    child_depth = Some(d);
                    computed.add(child.sums());
                }
                (computed == *sums).then(|| child_depth.map_or(1, |d| d + 1))
            }
        }
    }
    depth(root).is_some()
}

#[cfg(not(debug_assertions))]
fn validate_tree_structure(_root: &Node) -> bool {
    true
}
