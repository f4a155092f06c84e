//! Per-line token cache shared between snapshots
//!
//! A persistent tree of line slots. Replacing a line range or filling in one
//! line copies the path to the touched leaves and shares everything else.

use crate::syntax::{ContinuationState, Token};
use std::ops::Range;
use std::sync::Arc;

const MAX_SLOTS: usize = 64;
const MAX_CHILDREN: usize = 16;

/// Tokens of one line together with the states around it
#[derive(Debug, PartialEq, Eq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    pub state_in: ContinuationState,
    pub state_out: ContinuationState,
}

pub type Slot = Option<Arc<LineTokens>>;

#[derive(Clone)]
pub struct LineTable {
    root: Arc<LNode>,
}

enum LNode {
    Leaf(Vec<Slot>),
    Internal { children: Vec<Arc<LNode>>, len: usize },
}

impl LNode {
    fn len(&self) -> usize {
        match self {
            LNode::Leaf(slots) => slots.len(),
            LNode::Internal { len, .. } => *len,
        }
    }

    fn internal(children: Vec<Arc<LNode>>) -> Arc<LNode> {
        let len = children.iter().map(|c| c.len()).sum();
        Arc::new(LNode::Internal { children, len })
    }
}

impl LineTable {
    /// Table of `lines` empty slots
    pub fn new(lines: usize) -> Self {
        let leaves = vec![None; lines]
            .chunks(MAX_SLOTS)
            .map(|chunk| Arc::new(LNode::Leaf(chunk.to_vec())))
            .collect();
        Self::from_level(leaves)
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, line: usize) -> Option<&Arc<LineTokens>> {
        let mut node = self.root.as_ref();
        let mut index = line;
        loop {
            match node {
                LNode::Leaf(slots) => return slots.get(index).and_then(Option::as_ref),
                LNode::Internal { children, .. } => {
                    let mut next = None;
                    for child in children {
                        let len = child.len();
                        if index < len {
                            next = Some(child.as_ref());
                            break;
                        }
                        index -= len;
                    }
                    node = next?;
                }
            }
        }
    }

    /// Store `value` for `line`; out-of-range lines leave the table unchanged
    pub fn set(&self, line: usize, value: Arc<LineTokens>) -> LineTable {
        if line >= self.len() {
            return self.clone();
        }
        Self {
            root: set_node(&self.root, line, value),
        }
    }

    /// Replace the slots in `range` with `count` empty slots
    pub fn splice(&self, range: Range<usize>, count: usize) -> LineTable {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        if start == end && count == 0 {
            return self.clone();
        }
        Self::from_level(splice_node(&self.root, start..end, count, true))
    }

    /// True when both tables hold the same entry (or both none) for `line`
    pub fn same_entry(&self, other: &LineTable, line: usize) -> bool {
        match (self.get(line), other.get(line)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn from_level(mut level: Vec<Arc<LNode>>) -> Self {
        if level.is_empty() {
            return Self {
                root: Arc::new(LNode::Leaf(Vec::new())),
            };
        }
        while level.len() > 1 {
            level = level.chunks(MAX_CHILDREN).map(|c| LNode::internal(c.to_vec())).collect();
        }
        Self { root: level.remove(0) }
    }
}

impl Default for LineTable {
    fn default() -> Self {
        Self::new(1)
    }
}

impl std::fmt::Debug for LineTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTable").field("len", &self.len()).finish()
    }
}

fn set_node(node: &Arc<LNode>, index: usize, value: Arc<LineTokens>) -> Arc<LNode> {
    match node.as_ref() {
        LNode::Leaf(slots) => {
            let mut slots = slots.clone();
            slots[index] = Some(value);
            Arc::new(LNode::Leaf(slots))
        }
        LNode::Internal { children, len } => {
            let mut children = children.clone();
            let mut index = index;
            for child in children.iter_mut() {
                let child_len = child.len();
                if index < child_len {
                    *child = set_node(child, index, value);
                    break;
                }
                index -= child_len;
            }
            Arc::new(LNode::Internal { children, len: *len })
        }
    }
}

/// Same-height replacements for `node`; the fill goes to the first child reaching `range.start`
fn splice_node(node: &Arc<LNode>, range: Range<usize>, count: usize, fill: bool) -> Vec<Arc<LNode>> {
    if range.is_empty() && (!fill || count == 0) {
        return vec![node.clone()];
    }
    match node.as_ref() {
        LNode::Leaf(slots) => {
            let mut slots = slots.clone();
            let inserted = if fill { count } else { 0 };
            slots.splice(range, std::iter::repeat(None).take(inserted));
            slots
                .chunks(MAX_SLOTS)
                .map(|chunk| Arc::new(LNode::Leaf(chunk.to_vec())))
                .collect()
        }
        LNode::Internal { children, len } => {
            let target = if range.start >= *len {
                children.len() - 1
            } else {
                let mut offset = 0;
                children
                    .iter()
                    .position(|c| {
                        offset += c.len();
                        range.start < offset
                    })
                    .unwrap_or(children.len() - 1)
            };

            let mut out = Vec::with_capacity(children.len() + 1);
            let mut offset = 0;
            for (i, child) in children.iter().enumerate() {
                let child_len = child.len();
                let (cs, ce) = (offset, offset + child_len);
                offset = ce;
                let here = fill && i == target;
                if !here && (ce <= range.start || cs >= range.end) {
                    out.push(child.clone());
                    continue;
                }
                let local = range.start.max(cs) - cs..range.end.min(ce).max(range.start.max(cs)) - cs;
                out.extend(splice_node(child, local, count, here));
            }
            out.retain(|c| c.len() > 0);
            out.chunks(MAX_CHILDREN).map(|c| LNode::internal(c.to_vec())).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u8) -> Arc<LineTokens> {
        Arc::new(LineTokens {
            tokens: Vec::new(),
            state_in: ContinuationState::from_bytes([n]),
            state_out: ContinuationState::default(),
        })
    }

    fn model(table: &LineTable) -> Vec<Option<u8>> {
        (0..table.len())
            .map(|i| table.get(i).map(|e| e.state_in.as_bytes()[0]))
            .collect()
    }

    #[test]
    fn splice_keeps_entries_outside_range() {
        let mut table = LineTable::new(500);
        for i in 0..500 {
            table = table.set(i, entry((i % 200) as u8));
        }
        let spliced = table.splice(100..103, 1);
        assert_eq!(spliced.len(), 498);
        assert_eq!(model(&spliced)[99], Some(99));
        assert_eq!(model(&spliced)[100], None);
        assert_eq!(model(&spliced)[101], Some(103));
        assert!(Arc::ptr_eq(table.get(499).unwrap(), spliced.get(497).unwrap()));
    }

    #[test]
    fn splice_at_end_appends() {
        let table = LineTable::new(3).set(2, entry(7));
        let grown = table.splice(3..3, 2);
        assert_eq!(model(&grown), vec![None, None, Some(7), None, None]);
        let shrunk = grown.splice(0..5, 1);
        assert_eq!(model(&shrunk), vec![None]);
    }

    #[test]
    fn set_does_not_touch_old_version() {
        let table = LineTable::new(10);
        let updated = table.set(4, entry(1));
        assert!(table.get(4).is_none());
        assert!(updated.get(4).is_some());
        assert!(!table.same_entry(&updated, 4));
        assert!(table.same_entry(&updated, 5));
    }
}
