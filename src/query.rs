//! Presentation queries over a snapshot
//!
//! [`query_window`] materializes a line window: text, caret, selection and the
//! shredded foreground and background runs of tokens, markers and selection.
//! [`window_changed`] tells the renderer whether a window can be reused between
//! two snapshots without recomputing it.

use crate::document::{Selection, Snapshot};
use crate::error::{CoreError, Result};
use crate::markers::MarkerRef;
use crate::shred::{shred_from, Pos, Run, StyledRange};
use crate::text_effects::{priority, Style};
use std::ops::Range;
use std::sync::Arc;

/// Span within one line; `to` is [`Pos::Eol`] when it runs through the line break
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineSpan {
    pub from: usize,
    pub to: Pos,
}

/// Everything the renderer needs for one line; offsets are relative to the line start
#[derive(Clone, Debug, PartialEq)]
pub struct LineInfo {
    pub line: usize,
    pub text: String,
    pub caret_offset: Option<usize>,
    pub selection_range: Option<LineSpan>,
    pub foreground_runs: Vec<Run>,
    pub background_runs: Vec<Run>,
}

/// Style of the selection highlight
pub fn selection_style() -> Style {
    Style::new().with("background", "selection")
}

/// Lines `from..to` of `snapshot`; the window is clamped to the document
pub fn query_window(snapshot: &Snapshot, from: usize, to: usize) -> Result<Vec<LineInfo>> {
    if from > to {
        return Err(CoreError::InvalidRange { start: from, end: to });
    }
    let to = to.min(snapshot.line_count());
    let from = from.min(to);
    (from..to).map(|line| line_info(snapshot, line)).collect()
}

fn line_info(snapshot: &Snapshot, line: usize) -> Result<LineInfo> {
    let text_tree = snapshot.text();
    let range = text_tree.line_range(line)?;
    let text = text_tree.get_text_slice(range.clone())?;
    let len = range.len();

    let mut styled = Vec::new();

    if let Some(entry) = snapshot.tokens(line) {
        let mut offset = 0;
        for token in &entry.tokens {
            if offset >= len {
                break;
            }
            let end = (offset + token.len).min(len);
            styled.push(StyledRange::new(offset, Pos::At(end), priority::SYNTAX, token.kind.style()));
            offset = end;
        }
    }

    for marker in snapshot.markers().query(range.start..range.end + 1) {
        let (from, to) = clip(marker.from, marker.reach(), &range);
        styled.push(StyledRange::new(from, to, marker.props.layer, marker.props.style.clone()));
    }

    let selection = snapshot.selection();
    let selection_range = clip_selection(selection, &range);
    if let Some(span) = selection_range {
        styled.push(StyledRange::new(span.from, span.to, priority::SELECTION, selection_style()));
    }

    let (foreground, background) = split_layers(&styled);
    Ok(LineInfo {
        line,
        text,
        caret_offset: (range.start..=range.end)
            .contains(&selection.head)
            .then(|| selection.head - range.start),
        selection_range,
        foreground_runs: shred_from(0, &foreground),
        background_runs: shred_from(0, &background),
    })
}

/// Line-relative span of `[from, reach)`; reaching past the line end means end of line
fn clip(from: usize, reach: usize, line: &Range<usize>) -> (usize, Pos) {
    let local_from = from.clamp(line.start, line.end) - line.start;
    let to = if reach > line.end {
        Pos::Eol
    } else {
        Pos::At(reach.max(line.start) - line.start)
    };
    (local_from, to)
}

fn clip_selection(selection: Selection, line: &Range<usize>) -> Option<LineSpan> {
    let range = selection.range();
    if range.is_empty() || range.start > line.end || range.end <= line.start {
        return None;
    }
    let (from, to) = clip(range.start, range.end, line);
    if to == Pos::At(from) {
        return None;
    }
    Some(LineSpan { from, to })
}

/// Route each range's properties to the foreground or background set
fn split_layers(ranges: &[StyledRange]) -> (Vec<StyledRange>, Vec<StyledRange>) {
    let mut foreground = Vec::with_capacity(ranges.len());
    let mut background = Vec::new();
    for range in ranges {
        let (fg, bg) = range.style.split_background();
        if !fg.is_empty() {
            foreground.push(StyledRange { style: fg, ..range.clone() });
        }
        if !bg.is_empty() {
            background.push(StyledRange { style: bg, ..range.clone() });
        }
    }
    (foreground, background)
}

// === Window Comparison ===

/// Byte span of lines `lines`, including the break after the last one
fn window_span(snapshot: &Snapshot, lines: &Range<usize>) -> Option<Range<usize>> {
    let text = snapshot.text();
    let start = text.line_to_byte(lines.start).ok()?;
    let end = if lines.end < snapshot.line_count() {
        text.line_to_byte(lines.end).ok()?
    } else {
        text.byte_count() + 1
    };
    Some(start..end)
}

/// Markers in the window, relative to its start and clipped to it
fn window_markers(snapshot: &Snapshot, span: &Range<usize>) -> Vec<(usize, usize, MarkerRef)> {
    snapshot
        .markers()
        .query(span.clone())
        .into_iter()
        .map(|m| {
            let from = m.from.clamp(span.start, span.end) - span.start;
            let reach = m.reach().clamp(span.start, span.end) - span.start;
            (from, reach, m)
        })
        .collect()
}

fn window_selection(selection: Selection, span: &Range<usize>) -> (Option<usize>, Option<Range<usize>>) {
    let caret = span.contains(&selection.head).then(|| selection.head - span.start);
    let range = selection.range();
    let clipped = (!range.is_empty() && range.start < span.end && range.end > span.start).then(|| {
        range.start.max(span.start) - span.start..range.end.min(span.end) - span.start
    });
    (caret, clipped)
}

/// False only when lines `lines` render identically from `a` and `b`
///
/// Compares shared text leaves, the markers in the window, the token entries of
/// each line and the clipped selection. It may report a change that turns out to
/// render the same, never the reverse.
pub fn window_changed(a: &Snapshot, b: &Snapshot, lines: Range<usize>) -> bool {
    let lines_a = lines.start..lines.end.min(a.line_count());
    let lines_b = lines.start..lines.end.min(b.line_count());
    if lines_a != lines_b {
        return true;
    }
    if lines_a.is_empty() {
        return false;
    }
    let (Some(span_a), Some(span_b)) = (window_span(a, &lines_a), window_span(b, &lines_b)) else {
        return true;
    };

    let text_a = a.text().window_anchor(span_a.start..span_a.end.min(a.text().byte_count()));
    let text_b = b.text().window_anchor(span_b.start..span_b.end.min(b.text().byte_count()));
    if !text_a.same_content(&text_b) {
        return true;
    }

    let tokens_same = lines_a.clone().all(|line| match (a.tokens(line), b.tokens(line)) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    });
    if !tokens_same {
        return true;
    }

    let markers_a = window_markers(a, &span_a);
    let markers_b = window_markers(b, &span_b);
    let markers_same = markers_a.len() == markers_b.len()
        && markers_a.iter().zip(&markers_b).all(|(x, y)| {
            x.0 == y.0 && x.1 == y.1 && Arc::ptr_eq(&x.2.props, &y.2.props)
        });
    if !markers_same {
        return true;
    }

    let selection_a = window_selection(a.selection(), &span_a);
    let selection_b = window_selection(b.selection(), &span_b);
    selection_a != selection_b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Edit;
    use crate::markers::Marker;
    use crate::shred::RunLen;
    use crate::tree::Tree;

    fn snapshot(text: &str) -> Snapshot {
        Snapshot::new(Tree::from_str(text))
    }

    #[test]
    fn window_is_clamped() {
        let s = snapshot("a\nb");
        assert_eq!(query_window(&s, 1, 10).unwrap().len(), 1);
        assert!(query_window(&s, 5, 10).unwrap().is_empty());
        assert!(matches!(query_window(&s, 2, 1), Err(CoreError::InvalidRange { .. })));
    }

    #[test]
    fn selection_spans_lines() {
        let s = snapshot("abc\ndef\nghi")
            .apply_edits(&[Edit::SetSelection(Selection::new(1, 5))])
            .unwrap();
        let info = query_window(&s, 0, 3).unwrap();
        assert_eq!(info[0].selection_range, Some(LineSpan { from: 1, to: Pos::Eol }));
        assert_eq!(info[0].caret_offset, None);
        assert_eq!(info[1].selection_range, Some(LineSpan { from: 0, to: Pos::At(1) }));
        assert_eq!(info[1].caret_offset, Some(1));
        assert_eq!(info[2].selection_range, None);
        assert_eq!(
            info[0].background_runs,
            vec![
                Run { len: RunLen::Bytes(1), style: None },
                Run { len: RunLen::ToEol, style: Some(selection_style()) },
            ]
        );
    }

    #[test]
    fn marker_properties_split_by_background() {
        let style = Style::new().with("color", "red").with("background", "pink");
        let s = snapshot("hello world")
            .apply_edits(&[Edit::AddMarker(Marker::new(6, Pos::At(11), style))])
            .unwrap();
        let info = &query_window(&s, 0, 1).unwrap()[0];
        assert_eq!(info.foreground_runs[1].style, Some(Style::new().with("color", "red")));
        assert_eq!(info.background_runs[1].style, Some(Style::new().with("background", "pink")));
        assert_eq!(info.foreground_runs[0].len, RunLen::Bytes(6));
    }

    #[test]
    fn edit_above_window_leaves_it_unchanged() {
        let text: String = (0..2000).map(|i| format!("line {i}\n")).collect();
        let a = snapshot(&text);
        let b = a.apply_edits(&[Edit::insert(0, "x")]).unwrap();
        assert!(!window_changed(&a, &b, 1500..1510));
        assert!(window_changed(&a, &b, 0..10));
    }
}
