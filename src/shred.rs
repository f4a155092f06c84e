//! Flatten overlapping, priority-layered styled ranges into non-overlapping runs
//!
//! Ranges are expanded into start and end events and swept in offset order. At
//! every event the styles of the open ranges are merged: for each property the
//! range on the strictly higher layer wins, and on equal layers the range that
//! opened first keeps its value. A run is closed whenever the merged style changes.
//!
//! Events at the same offset are ordered ends first, then starts; within each
//! group the input order decides. A range ending at `x` therefore never overlaps a
//! range starting at `x`.

use crate::text_effects::Style;
use std::collections::BTreeMap;

/// Offset within a line, or the end-of-line sentinel that sorts after every offset
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pos {
    At(usize),
    Eol,
}

/// Input to [`shred`]
#[derive(Clone, Debug, PartialEq)]
pub struct StyledRange {
    pub from: usize,
    pub to: Pos,
    pub layer: i32,
    pub style: Style,
}

impl StyledRange {
    pub fn new(from: usize, to: Pos, layer: i32, style: Style) -> Self {
        Self { from, to, layer, style }
    }

    fn is_empty(&self) -> bool {
        matches!(self.to, Pos::At(to) if to <= self.from)
    }
}

/// Length of an output run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunLen {
    Bytes(usize),
    ToEol,
}

/// One run of the shredded output; `style` is `None` for uncovered gaps
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub len: RunLen,
    pub style: Option<Style>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    End,
    Start,
}

#[derive(Clone, Copy)]
struct Event {
    offset: usize,
    kind: EventKind,
    index: usize,
}

/// Shred `ranges`; the first run starts at the smallest start offset
pub fn shred(ranges: &[StyledRange]) -> Vec<Run> {
    let origin = ranges
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| r.from)
        .min()
        .unwrap_or(0);
    shred_from(origin, ranges)
}

/// Shred `ranges` with output anchored at `origin`
///
/// When `origin` lies before the first covered offset, a leading unstyled run
/// fills the gap. An `origin` past the first start is ignored.
pub fn shred_from(origin: usize, ranges: &[StyledRange]) -> Vec<Run> {
    let mut events = Vec::with_capacity(ranges.len() * 2);
    for (index, range) in ranges.iter().enumerate() {
        if range.is_empty() {
            continue;
        }
        events.push(Event {
            offset: range.from,
            kind: EventKind::Start,
            index,
        });
        // Ranges ending at the sentinel stay open and are flushed at the end
        if let Pos::At(to) = range.to {
            events.push(Event {
                offset: to,
                kind: EventKind::End,
                index,
            });
        }
    }
    if events.is_empty() {
        return Vec::new();
    }
    events.sort_by_key(|e| (e.offset, e.kind, e.index));

    let mut runs = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut boundary = origin.min(events[0].offset);
    let mut current: Option<Style> = None;

    for event in events {
        match event.kind {
            EventKind::Start => open.push(event.index),
            EventKind::End => open.retain(|&i| i != event.index),
        }

        let merged = merge_open(&open, ranges);
        if merged == current {
            continue;
        }
        if event.offset > boundary {
            push_run(&mut runs, RunLen::Bytes(event.offset - boundary), current);
            boundary = event.offset;
        }
        current = merged;
    }

    if current.is_some() {
        push_run(&mut runs, RunLen::ToEol, current);
    }
    runs
}

/// Reinterpret runs starting at `origin` as layer-0 ranges; unstyled runs become gaps
pub fn ranges_from_runs(origin: usize, runs: &[Run]) -> Vec<StyledRange> {
    let mut ranges = Vec::with_capacity(runs.len());
    let mut offset = origin;
    for run in runs {
        let to = match run.len {
            RunLen::Bytes(len) => Pos::At(offset + len),
            RunLen::ToEol => Pos::Eol,
        };
        if let Some(style) = &run.style {
            ranges.push(StyledRange::new(offset, to, 0, style.clone()));
        }
        if let Pos::At(end) = to {
            offset = end;
        }
    }
    ranges
}

/// Append a run, extending the previous one when the style is unchanged
fn push_run(runs: &mut Vec<Run>, len: RunLen, style: Option<Style>) {
    if let Some(last) = runs.last_mut() {
        if last.style == style {
            last.len = match (last.len, len) {
                (RunLen::Bytes(a), RunLen::Bytes(b)) => RunLen::Bytes(a + b),
                _ => RunLen::ToEol,
            };
            return;
        }
    }
    runs.push(Run { len, style });
}

/// Merge the styles of the open ranges, in the order they opened
fn merge_open(open: &[usize], ranges: &[StyledRange]) -> Option<Style> {
    match open {
        [] => None,
        [only] => Some(ranges[*only].style.clone()),
        _ => {
            let mut props: BTreeMap<&str, (i32, &str)> = BTreeMap::new();
            for &i in open {
                let range = &ranges[i];
                for (key, value) in range.style.iter() {
                    match props.get(key) {
                        Some(&(layer, _)) if layer >= range.layer => {}
                        _ => {
                            props.insert(key, (range.layer, value));
                        }
                    }
                }
            }
            Some(props.into_iter().map(|(k, (_, v))| (k, v)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(name: &str) -> Style {
        Style::new().with("color", name)
    }

    #[test]
    fn zero_length_changes_are_suppressed() {
        // Abutting ranges with an equal style coalesce into one run
        let ranges = vec![
            StyledRange::new(0, Pos::At(2), 0, color("a")),
            StyledRange::new(2, Pos::At(4), 0, color("a")),
        ];
        assert_eq!(
            shred(&ranges),
            vec![Run {
                len: RunLen::Bytes(4),
                style: Some(color("a"))
            }]
        );
    }

    #[test]
    fn origin_before_first_range_adds_gap() {
        let ranges = vec![StyledRange::new(3, Pos::At(5), 0, color("a"))];
        assert_eq!(
            shred_from(0, &ranges),
            vec![
                Run {
                    len: RunLen::Bytes(3),
                    style: None
                },
                Run {
                    len: RunLen::Bytes(2),
                    style: Some(color("a"))
                },
            ]
        );
    }

    #[test]
    fn higher_layer_wins_only_its_own_properties() {
        let low = Style::new().with("color", "red").with("weight", "bold");
        let high = Style::new().with("color", "blue");
        let ranges = vec![
            StyledRange::new(0, Pos::At(4), 0, low),
            StyledRange::new(0, Pos::At(4), 5, high),
        ];
        let runs = shred(&ranges);
        assert_eq!(runs.len(), 1);
        let style = runs[0].style.clone().unwrap();
        assert_eq!(style.get("color"), Some("blue"));
        assert_eq!(style.get("weight"), Some("bold"));
    }
}
