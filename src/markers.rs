//! Persistent marker tree for decorations over the document
//!
//! Markers live in a B-tree ordered by start offset. Every node stores its
//! positions relative to a per-node `offset`, so a text edit shifts a whole
//! subtree by rewriting one offset and shares its body with the previous
//! version. Node summaries keep the smallest start and the largest reach of
//! the subtree, which bounds a range query to the markers it returns plus the
//! path down to them.

use crate::error::{CoreError, Result};
use crate::shred::Pos;
use crate::text_effects::{priority, Style};
use crate::tree::Tree;
use std::ops::Range;
use std::sync::Arc;

/// Maximum markers per leaf and children per internal node
const MAX_ENTRIES: usize = 16;

/// Unique identifier of a marker within a document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerId(pub u64);

/// A decoration as supplied by the caller
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    pub from: usize,
    pub to: Pos,
    pub layer: i32,
    pub style: Style,
    /// Text inserted exactly at `from` becomes part of the marker
    pub inclusive_start: bool,
    /// Text inserted exactly at `to` becomes part of the marker
    pub inclusive_end: bool,
}

impl Marker {
    pub fn new(from: usize, to: Pos, style: Style) -> Self {
        Self {
            id: MarkerId::default(),
            from,
            to,
            layer: priority::BASE,
            style,
            inclusive_start: false,
            inclusive_end: false,
        }
    }

    pub fn with_layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_inclusive(mut self, start: bool, end: bool) -> Self {
        self.inclusive_start = start;
        self.inclusive_end = end;
        self
    }
}

/// Position-independent part of a stored marker, shared by every version
#[derive(Debug, PartialEq)]
pub struct MarkerProps {
    pub id: MarkerId,
    pub layer: i32,
    pub style: Style,
    pub inclusive_start: bool,
    pub inclusive_end: bool,
    /// The marker runs to the end of the line holding `from`
    pub to_eol: bool,
}

/// A marker at absolute offsets in one document version
#[derive(Clone, Debug)]
pub struct MarkerRef {
    pub from: usize,
    /// Resolved end; for end-of-line markers the offset of the line break
    pub end: usize,
    pub props: Arc<MarkerProps>,
}

impl MarkerRef {
    pub fn id(&self) -> MarkerId {
        self.props.id
    }

    pub fn to(&self) -> Pos {
        if self.props.to_eol {
            Pos::Eol
        } else {
            Pos::At(self.end)
        }
    }

    /// Last offset the marker affects, exclusive; end-of-line markers cover the break
    pub fn reach(&self) -> usize {
        self.end + usize::from(self.props.to_eol)
    }

    /// Intersection with `[range.start, range.end)`; empty markers hit when inside
    pub fn intersects(&self, range: &Range<usize>) -> bool {
        let reach = self.reach();
        self.from < range.end && (reach > range.start || (reach == self.from && self.from >= range.start))
    }

    pub fn to_marker(&self) -> Marker {
        Marker {
            id: self.props.id,
            from: self.from,
            to: self.to(),
            layer: self.props.layer,
            style: self.props.style.clone(),
            inclusive_start: self.props.inclusive_start,
            inclusive_end: self.props.inclusive_end,
        }
    }
}

impl PartialEq for MarkerRef {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.end == other.end && Arc::ptr_eq(&self.props, &other.props)
    }
}

// === Tree Types ===

/// Immutable set of markers
#[derive(Clone)]
pub struct MarkerTree {
    root: MNode,
}

#[derive(Clone)]
struct MNode {
    offset: isize,
    body: Arc<Body>,
}

enum Body {
    Leaf { entries: Vec<Entry>, bounds: Option<Bounds> },
    Internal { children: Vec<MNode>, bounds: Option<Bounds> },
}

#[derive(Clone)]
struct Entry {
    from: isize,
    end: isize,
    props: Arc<MarkerProps>,
}

/// Subtree extent in body-local coordinates
#[derive(Clone, Copy)]
struct Bounds {
    min_from: isize,
    max_reach: isize,
    count: usize,
}

impl Entry {
    fn reach(&self) -> isize {
        self.end + isize::from(self.props.to_eol)
    }

    fn key(&self) -> (isize, MarkerId) {
        (self.from, self.props.id)
    }
}

impl Bounds {
    fn merge(a: Option<Bounds>, b: Option<Bounds>) -> Option<Bounds> {
        match (a, b) {
            (Some(a), Some(b)) => Some(Bounds {
                min_from: a.min_from.min(b.min_from),
                max_reach: a.max_reach.max(b.max_reach),
                count: a.count + b.count,
            }),
            (a, None) => a,
            (None, b) => b,
        }
    }

    fn shifted(self, by: isize) -> Bounds {
        Bounds {
            min_from: self.min_from + by,
            max_reach: self.max_reach + by,
            count: self.count,
        }
    }
}

impl Body {
    fn leaf(mut entries: Vec<Entry>) -> Arc<Self> {
        entries.sort_by_key(Entry::key);
        let bounds = entries.iter().fold(None, |acc, e| {
            Bounds::merge(
                acc,
                Some(Bounds {
                    min_from: e.from,
                    max_reach: e.reach(),
                    count: 1,
                }),
            )
        });
        Arc::new(Body::Leaf { entries, bounds })
    }

    fn internal(children: Vec<MNode>) -> Arc<Self> {
        let bounds = children
            .iter()
            .fold(None, |acc, child| Bounds::merge(acc, child.bounds()));
        Arc::new(Body::Internal { children, bounds })
    }

    fn bounds(&self) -> Option<Bounds> {
        match self {
            Body::Leaf { bounds, .. } | Body::Internal { bounds, .. } => *bounds,
        }
    }
}

impl MNode {
    fn empty() -> Self {
        Self {
            offset: 0,
            body: Body::leaf(Vec::new()),
        }
    }

    /// Bounds in the parent's coordinates
    fn bounds(&self) -> Option<Bounds> {
        self.body.bounds().map(|b| b.shifted(self.offset))
    }
}

/// Text edit expressed for position mapping
#[derive(Clone, Copy, Debug)]
pub struct EditMap {
    pub start: usize,
    pub removed: usize,
    pub inserted: usize,
}

impl EditMap {
    fn end(&self) -> usize {
        self.start + self.removed
    }

    fn delta(&self) -> isize {
        self.inserted as isize - self.removed as isize
    }

    /// Map a position through the edit; `right` moves it past inserted text
    pub fn map(&self, pos: usize, right: bool) -> usize {
        if pos < self.start {
            pos
        } else if pos > self.end() {
            (pos as isize + self.delta()) as usize
        } else if right {
            self.start + self.inserted
        } else {
            self.start
        }
    }
}

// === Marker Tree Implementation ===

impl MarkerTree {
    pub fn new() -> Self {
        Self { root: MNode::empty() }
    }

    pub fn len(&self) -> usize {
        self.root.bounds().map_or(0, |b| b.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `marker`, resolving an end-of-line `to` against `text`
    ///
    /// Ids are unique within a tree; adding an id that is already present fails.
    pub fn insert(&self, marker: &Marker, text: &Tree) -> Result<MarkerTree> {
        if self.contains(marker.id) {
            return Err(CoreError::DuplicateMarker(marker.id.0));
        }
        text.check_offset(marker.from)?;
        let (end, to_eol) = match marker.to {
            Pos::At(to) => {
                if to < marker.from {
                    return Err(CoreError::InvalidRange {
                        start: marker.from,
                        end: to,
                    });
                }
                text.check_offset(to)?;
                (to, false)
            }
            Pos::Eol => (text.line_end_at(marker.from), true),
        };

        let entry = Entry {
            from: marker.from as isize,
            end: end as isize,
            props: Arc::new(MarkerProps {
                id: marker.id,
                layer: marker.layer,
                style: marker.style.clone(),
                inclusive_start: marker.inclusive_start,
                inclusive_end: marker.inclusive_end,
                to_eol,
            }),
        };

        let mut pieces = insert_node(&self.root, 0, entry);
        let root = if pieces.len() == 1 {
            pieces.remove(0)
        } else {
            MNode {
                offset: 0,
                body: Body::internal(pieces),
            }
        };
        Ok(Self { root })
    }

    /// Remove the marker with `id`
    pub fn remove(&self, id: MarkerId) -> Result<MarkerTree> {
        match remove_node(&self.root, id) {
            Removal::NotFound => Err(CoreError::UnknownMarker(id.0)),
            Removal::Replaced(Some(root)) => Ok(Self { root }),
            Removal::Replaced(None) => Ok(Self::new()),
        }
    }

    pub fn contains(&self, id: MarkerId) -> bool {
        contains_node(&self.root, id)
    }

    pub fn get(&self, id: MarkerId) -> Option<MarkerRef> {
        self.iter().into_iter().find(|m| m.id() == id)
    }

    /// Markers intersecting `range`, ordered by start offset then id
    pub fn query(&self, range: Range<usize>) -> Vec<MarkerRef> {
        let mut out = Vec::new();
        query_node(&self.root, 0, &range, &mut out);
        out.sort_by_key(|m| (m.from, m.id()));
        out
    }

    /// All markers, ordered by start offset then id
    pub fn iter(&self) -> Vec<MarkerRef> {
        let mut out = Vec::with_capacity(self.len());
        collect_all(&self.root, 0, &mut out);
        out.sort_by_key(|m| (m.from, m.id()));
        out
    }

    /// Move markers through a text edit; `text` is the document after the edit
    ///
    /// Entries are re-sorted inside each rebuilt leaf only. Markers that land
    /// on the same offset from neighbouring leaves (mixed `inclusive_start`, or
    /// collapsed by a deletion) can leave adjacent leaves out of (from, id)
    /// order. Nothing depends on that order: pruning reads node bounds, lookups
    /// by id scan, and [`Self::query`] and [`Self::iter`] sort their output.
    pub fn map_edit(&self, edit: EditMap, text: &Tree) -> MarkerTree {
        Self {
            root: map_node(&self.root, 0, &edit, text),
        }
    }
}

impl Default for MarkerTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MarkerTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// === Helper Functions ===

fn split_in_two<T: Clone>(items: Vec<T>) -> (Vec<T>, Vec<T>) {
    let mid = items.len() / 2;
    let (l, r) = items.split_at(mid);
    (l.to_vec(), r.to_vec())
}

fn insert_node(node: &MNode, base: isize, mut entry: Entry) -> Vec<MNode> {
    let local = base + node.offset;
    match node.body.as_ref() {
        Body::Leaf { entries, .. } => {
            entry.from -= local;
            entry.end -= local;
            let mut entries = entries.clone();
            let at = entries.partition_point(|e| e.key() < entry.key());
            entries.insert(at, entry);
            if entries.len() <= MAX_ENTRIES {
                return vec![MNode {
                    offset: node.offset,
                    body: Body::leaf(entries),
                }];
            }
            let (l, r) = split_in_two(entries);
            vec![
                MNode {
                    offset: node.offset,
                    body: Body::leaf(l),
                },
                MNode {
                    offset: node.offset,
                    body: Body::leaf(r),
                },
            ]
        }
        Body::Internal { children, .. } => {
            // Last child whose first marker starts at or before the new one
            let target = children
                .iter()
                .rposition(|c| {
                    c.bounds()
                        .is_some_and(|b| b.min_from + local <= entry.from)
                })
                .unwrap_or(0);
            let replaced = insert_node(&children[target], local, entry);

            let mut children = children.clone();
            children.splice(target..=target, replaced);
            if children.len() <= MAX_ENTRIES {
                return vec![MNode {
                    offset: node.offset,
                    body: Body::internal(children),
                }];
            }
            let (l, r) = split_in_two(children);
            vec![
                MNode {
                    offset: node.offset,
                    body: Body::internal(l),
                },
                MNode {
                    offset: node.offset,
                    body: Body::internal(r),
                },
            ]
        }
    }
}

enum Removal {
    NotFound,
    Replaced(Option<MNode>),
}

fn remove_node(node: &MNode, id: MarkerId) -> Removal {
    match node.body.as_ref() {
        Body::Leaf { entries, .. } => {
            let Some(at) = entries.iter().position(|e| e.props.id == id) else {
                return Removal::NotFound;
            };
            let mut entries = entries.clone();
            entries.remove(at);
            if entries.is_empty() {
                return Removal::Replaced(None);
            }
            Removal::Replaced(Some(MNode {
                offset: node.offset,
                body: Body::leaf(entries),
            }))
        }
        Body::Internal { children, .. } => {
            for (i, child) in children.iter().enumerate() {
                if let Removal::Replaced(replacement) = remove_node(child, id) {
                    let mut children = children.clone();
                    match replacement {
                        Some(child) => children[i] = child,
                        None => {
                            children.remove(i);
                        }
                    }
                    if children.is_empty() {
                        return Removal::Replaced(None);
                    }
                    return Removal::Replaced(Some(MNode {
                        offset: node.offset,
                        body: Body::internal(children),
                    }));
                }
            }
            Removal::NotFound
        }
    }
}

fn contains_node(node: &MNode, id: MarkerId) -> bool {
    match node.body.as_ref() {
        Body::Leaf { entries, .. } => entries.iter().any(|e| e.props.id == id),
        Body::Internal { children, .. } => children.iter().any(|c| contains_node(c, id)),
    }
}

fn to_ref(entry: &Entry, local: isize) -> MarkerRef {
    MarkerRef {
        from: (entry.from + local) as usize,
        end: (entry.end + local) as usize,
        props: entry.props.clone(),
    }
}

fn query_node(node: &MNode, base: isize, range: &Range<usize>, out: &mut Vec<MarkerRef>) {
    let local = base + node.offset;
    let Some(bounds) = node.body.bounds() else {
        return;
    };
    let start = isize::try_from(range.start).unwrap_or(isize::MAX);
    let end = isize::try_from(range.end).unwrap_or(isize::MAX);
    if bounds.min_from + local >= end || bounds.max_reach + local < start {
        return;
    }

    match node.body.as_ref() {
        Body::Leaf { entries, .. } => {
            for entry in entries {
                let marker = to_ref(entry, local);
                if marker.intersects(range) {
                    out.push(marker);
                }
            }
        }
        Body::Internal { children, .. } => {
            for child in children {
                query_node(child, local, range, out);
            }
        }
    }
}

fn collect_all(node: &MNode, base: isize, out: &mut Vec<MarkerRef>) {
    let local = base + node.offset;
    match node.body.as_ref() {
        Body::Leaf { entries, .. } => out.extend(entries.iter().map(|e| to_ref(e, local))),
        Body::Internal { children, .. } => {
            for child in children {
                collect_all(child, local, out);
            }
        }
    }
}

fn map_node(node: &MNode, base: isize, edit: &EditMap, text: &Tree) -> MNode {
    let local = base + node.offset;
    let Some(bounds) = node.body.bounds() else {
        return node.clone();
    };

    // Entirely after the edit: shift the whole subtree
    if bounds.min_from + local > edit.end() as isize {
        return MNode {
            offset: node.offset + edit.delta(),
            body: node.body.clone(),
        };
    }
    // Entirely before the edit
    if bounds.max_reach + local < edit.start as isize {
        return node.clone();
    }

    match node.body.as_ref() {
        Body::Leaf { entries, .. } => {
            let entries = entries
                .iter()
                .map(|entry| {
                    let props = &entry.props;
                    let from = edit.map((entry.from + local) as usize, !props.inclusive_start);
                    let end = if props.to_eol {
                        text.line_end_at(from)
                    } else {
                        edit.map((entry.end + local) as usize, props.inclusive_end).max(from)
                    };
                    Entry {
                        from: from as isize - local,
                        end: end as isize - local,
                        props: props.clone(),
                    }
                })
                .collect();
            MNode {
                offset: node.offset,
                body: Body::leaf(entries),
            }
        }
        Body::Internal { children, .. } => MNode {
            offset: node.offset,
            body: Body::internal(
                children
                    .iter()
                    .map(|child| map_node(child, local, edit, text))
                    .collect(),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: u64, from: usize, to: usize) -> Marker {
        Marker {
            id: MarkerId(id),
            ..Marker::new(from, Pos::At(to), Style::new().with("class", "m"))
        }
    }

    #[test]
    fn shifted_subtrees_share_bodies() {
        let text = Tree::from_str(&"x".repeat(1000));
        let mut tree = MarkerTree::new();
        for i in 0..100 {
            tree = tree.insert(&marker(i, i as usize * 10, i as usize * 10 + 5), &text).unwrap();
        }
        let edited_text = text.insert(0, "abc").unwrap();
        let mapped = tree.map_edit(
            EditMap {
                start: 0,
                removed: 0,
                inserted: 3,
            },
            &edited_text,
        );
        let before = tree.iter();
        let after = mapped.iter();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert!(Arc::ptr_eq(&b.props, &a.props));
            assert_eq!(a.from, b.from + 3);
            assert_eq!(a.end, b.end + 3);
        }
    }

    #[test]
    fn inserting_an_existing_id_fails() {
        let text = Tree::from_str("hello world");
        let tree = MarkerTree::new().insert(&marker(7, 0, 5), &text).unwrap();
        assert_eq!(
            tree.insert(&marker(7, 6, 11), &text).unwrap_err(),
            CoreError::DuplicateMarker(7)
        );
        assert!(tree.contains(MarkerId(7)));
        assert!(!tree.contains(MarkerId(8)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn markers_split_at_an_insertion_point_stay_queryable() {
        let text = Tree::from_str(&"x".repeat(100));
        let mut tree = MarkerTree::new();
        // Enough markers on one offset to span several leaves
        for i in 0..40u64 {
            let m = marker(i, 10, 20).with_inclusive(i % 2 == 0, false);
            tree = tree.insert(&m, &text).unwrap();
        }
        let edited_text = text.insert(10, "abc").unwrap();
        let mapped = tree.map_edit(
            EditMap {
                start: 10,
                removed: 0,
                inserted: 3,
            },
            &edited_text,
        );

        let all = mapped.iter();
        assert_eq!(all.len(), 40);
        assert!(all.windows(2).all(|w| (w[0].from, w[0].id()) <= (w[1].from, w[1].id())));
        for m in &all {
            let expected = if m.id().0 % 2 == 0 { 10 } else { 13 };
            assert_eq!(m.from, expected, "marker {}", m.id().0);
            assert_eq!(m.end, 23);
        }

        let at_insert: Vec<u64> = mapped.query(10..11).iter().map(|m| m.id().0).collect();
        assert_eq!(at_insert, (0..40).step_by(2).collect::<Vec<_>>());

        // Further inserts and removals still land on a consistent tree
        let mapped = mapped.insert(&marker(100, 11, 12), &edited_text).unwrap();
        let mapped = mapped.remove(MarkerId(3)).unwrap();
        assert_eq!(mapped.len(), 40);
        assert_eq!(mapped.get(MarkerId(100)).map(|m| m.from), Some(11));
        let ids: Vec<u64> = mapped.query(11..12).iter().map(|m| m.id().0).collect();
        assert_eq!(ids.len(), 21);
        assert_eq!(ids[20], 100);
    }

    #[test]
    fn removing_last_marker_empties_tree() {
        let text = Tree::from_str("hello");
        let tree = MarkerTree::new().insert(&marker(1, 0, 2), &text).unwrap();
        let tree = tree.remove(MarkerId(1)).unwrap();
        assert!(tree.is_empty());
        assert!(matches!(tree.remove(MarkerId(1)), Err(CoreError::UnknownMarker(1))));
    }
}
