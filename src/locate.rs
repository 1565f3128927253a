//! Anchor-disambiguated block location.
//!
//! A block is the span of a buffer that starts with a start marker and ends
//! with an end marker. The same marker pair usually wraps several unrelated
//! blocks, so the target is pinned by an anchor: a substring that occurs
//! inside the intended block. The start marker resolves to the nearest
//! occurrence lying wholly before the anchor, the end marker to the nearest
//! occurrence after it.
//!
//! Everything here is pure: no I/O, no state kept between calls.

use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Minimum similarity for a line to be suggested as a replacement anchor.
const HINT_THRESHOLD: f64 = 0.6;

/// The three search strings that identify one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMarkers<'a> {
    /// Substring expected inside the target block
    pub anchor: &'a str,
    /// Opening delimiter, included in the replaced span
    pub start_marker: &'a str,
    /// Closing delimiter, included in the replaced span
    pub end_marker: &'a str,
}

impl<'a> BlockMarkers<'a> {
    pub fn new(anchor: &'a str, start_marker: &'a str, end_marker: &'a str) -> Self {
        Self {
            anchor,
            start_marker,
            end_marker,
        }
    }

    fn check_patterns(&self) -> Result<(), LocateError> {
        let fields = [
            ("anchor", self.anchor),
            ("start marker", self.start_marker),
            ("end marker", self.end_marker),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(LocateError::EmptyPattern { field });
            }
        }
        Ok(())
    }
}

/// Byte offsets of a located block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Offset of the start marker (inclusive)
    pub start: usize,
    /// Offset just past the end marker (exclusive)
    pub end: usize,
    /// Offset of the anchor that pinned the block
    pub anchor: usize,
}

impl BlockSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Text of the block within the buffer it was located in.
    pub fn text<'b>(&self, buffer: &'b str) -> &'b str {
        &buffer[self.range()]
    }

    /// 1-based line of the start marker.
    pub fn start_line(&self, buffer: &str) -> usize {
        line_number(buffer, self.start)
    }

    /// 1-based line of the end marker.
    pub fn end_line(&self, buffer: &str) -> usize {
        line_number(buffer, self.end.saturating_sub(1))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("anchor {anchor:?} not found")]
    AnchorNotFound { anchor: String },

    #[error("no start marker {marker:?} precedes the anchor on line {anchor_line}")]
    StartMarkerNotFound { marker: String, anchor_line: usize },

    #[error("no end marker {marker:?} follows the anchor on line {anchor_line}")]
    EndMarkerNotFound { marker: String, anchor_line: usize },

    #[error("anchor {anchor:?} occurs {count} times, expected exactly 1")]
    AmbiguousAnchor { anchor: String, count: usize },

    #[error("{field} must not be empty")]
    EmptyPattern { field: &'static str },
}

/// Locate the block around the first occurrence of the anchor.
pub fn locate_block(buffer: &str, markers: &BlockMarkers<'_>) -> Result<BlockSpan, LocateError> {
    markers.check_patterns()?;

    let anchor = buffer
        .find(markers.anchor)
        .ok_or_else(|| LocateError::AnchorNotFound {
            anchor: markers.anchor.to_string(),
        })?;
    debug!(offset = anchor, "anchor located");

    // The whole start marker must end at or before the anchor.
    let start = buffer[..anchor]
        .rfind(markers.start_marker)
        .ok_or_else(|| LocateError::StartMarkerNotFound {
            marker: markers.start_marker.to_string(),
            anchor_line: line_number(buffer, anchor),
        })?;
    debug!(offset = start, "start marker resolved");

    let search_from = anchor + markers.anchor.len();
    let end_marker = buffer[search_from..]
        .find(markers.end_marker)
        .map(|offset| search_from + offset)
        .ok_or_else(|| LocateError::EndMarkerNotFound {
            marker: markers.end_marker.to_string(),
            anchor_line: line_number(buffer, anchor),
        })?;
    debug!(offset = end_marker, "end marker resolved");

    Ok(BlockSpan {
        start,
        end: end_marker + markers.end_marker.len(),
        anchor,
    })
}

/// Like [`locate_block`], but refuses to pick between several anchors.
pub fn locate_unique_block(
    buffer: &str,
    markers: &BlockMarkers<'_>,
) -> Result<BlockSpan, LocateError> {
    markers.check_patterns()?;

    let count = count_occurrences(buffer, markers.anchor);
    if count > 1 {
        return Err(LocateError::AmbiguousAnchor {
            anchor: markers.anchor.to_string(),
            count,
        });
    }

    locate_block(buffer, markers)
}

/// Count every start offset of `needle`, overlapping hits included.
fn count_occurrences(buffer: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(offset) = buffer[from..].find(needle) {
        count += 1;
        let hit = from + offset;
        from = hit + buffer[hit..].chars().next().map_or(1, char::len_utf8);
    }
    count
}

/// Build a new buffer with `span` swapped for `replacement`.
pub fn replace_span(buffer: &str, span: &BlockSpan, replacement: &str) -> String {
    let mut out = String::with_capacity(buffer.len() - span.len() + replacement.len());
    out.push_str(&buffer[..span.start]);
    out.push_str(replacement);
    out.push_str(&buffer[span.end..]);
    out
}

/// Locate the block pinned by `anchor` and replace it with `replacement`.
pub fn locate_and_replace(
    buffer: &str,
    anchor: &str,
    start_marker: &str,
    end_marker: &str,
    replacement: &str,
) -> Result<String, LocateError> {
    let markers = BlockMarkers::new(anchor, start_marker, end_marker);
    let span = locate_block(buffer, &markers)?;
    Ok(replace_span(buffer, &span, replacement))
}

/// Text of the block pinned by the anchor, markers included.
pub fn extract_block<'b>(
    buffer: &'b str,
    markers: &BlockMarkers<'_>,
) -> Result<&'b str, LocateError> {
    let span = locate_block(buffer, markers)?;
    Ok(span.text(buffer))
}

/// 1-based line number of a byte offset.
pub fn line_number(buffer: &str, offset: usize) -> usize {
    let offset = offset.min(buffer.len());
    buffer.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// A line that closely resembles a missing anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorHint {
    pub line: usize,
    pub text: String,
    pub similarity: f64,
}

/// Find the line most similar to the first line of `anchor`.
///
/// Returns `None` when nothing clears the similarity threshold.
pub fn suggest_anchor(buffer: &str, anchor: &str) -> Option<AnchorHint> {
    let needle = anchor.lines().map(str::trim).find(|l| !l.is_empty())?;

    buffer
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            let similarity = strsim::normalized_levenshtein(needle, trimmed);
            (similarity >= HINT_THRESHOLD).then(|| AnchorHint {
                line: idx + 1,
                text: trimmed.to_string(),
                similarity,
            })
        })
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: &str = "X <box> keep anchor end </box> Y";

    #[test]
    fn test_replace_single_block() {
        let result =
            locate_and_replace(BOX, "anchor", "<box>", "</box>", "<box>NEW</box>").unwrap();
        assert_eq!(result, "X <box>NEW</box> Y");
    }

    #[test]
    fn test_missing_anchor() {
        let err =
            locate_and_replace(BOX, "missing", "<box>", "</box>", "<box>NEW</box>").unwrap_err();
        assert_eq!(
            err,
            LocateError::AnchorNotFound {
                anchor: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_nearest_start_marker_wins() {
        let buffer = "<box>A</box> <box> anchor </box>";
        let span = locate_block(buffer, &BlockMarkers::new("anchor", "<box>", "</box>")).unwrap();
        assert_eq!(span.start, 13);
        assert_eq!(span.text(buffer), "<box> anchor </box>");
    }

    #[test]
    fn test_two_open_markers_before_anchor() {
        let buffer = "<box> outer <box> inner anchor </box> tail </box>";
        let markers = BlockMarkers::new("anchor", "<box>", "</box>");
        let span = locate_block(buffer, &markers).unwrap();
        assert_eq!(span.text(buffer), "<box> inner anchor </box>");
    }

    #[test]
    fn test_nearest_end_marker_wins() {
        let buffer = "<a> anchor </a> <a> other </a>";
        let block = extract_block(buffer, &BlockMarkers::new("anchor", "<a>", "</a>")).unwrap();
        assert_eq!(block, "<a> anchor </a>");
    }

    #[test]
    fn test_first_anchor_occurrence_is_used() {
        let buffer = "[ anchor ] [ anchor ]";
        let span = locate_block(buffer, &BlockMarkers::new("anchor", "[", "]")).unwrap();
        assert_eq!(span.range(), 0..10);
    }

    #[test]
    fn test_start_marker_after_anchor_only() {
        let buffer = "line one\nanchor <box> </box>";
        let err = locate_block(buffer, &BlockMarkers::new("anchor", "<box>", "</box>")).unwrap_err();
        assert_eq!(
            err,
            LocateError::StartMarkerNotFound {
                marker: "<box>".to_string(),
                anchor_line: 2
            }
        );
    }

    #[test]
    fn test_start_marker_overlapping_anchor_is_ignored() {
        // "<bo" + "x>" straddles the anchor start, so it cannot be the start marker
        let buffer = "<box>";
        let err = locate_block(buffer, &BlockMarkers::new("x>", "<box>", ">")).unwrap_err();
        assert!(matches!(err, LocateError::StartMarkerNotFound { .. }));
    }

    #[test]
    fn test_end_marker_before_anchor_only() {
        let buffer = "<box> </box> anchor";
        let err = locate_block(buffer, &BlockMarkers::new("anchor", "<box>", "</box>")).unwrap_err();
        assert_eq!(
            err,
            LocateError::EndMarkerNotFound {
                marker: "</box>".to_string(),
                anchor_line: 1
            }
        );
    }

    #[test]
    fn test_end_marker_inside_anchor_is_skipped() {
        let buffer = "<a> x</a>y </a> z";
        let span = locate_block(buffer, &BlockMarkers::new("x</a>y", "<a>", "</a>")).unwrap();
        assert_eq!(span.text(buffer), "<a> x</a>y </a>");
    }

    #[test]
    fn test_anchor_lies_strictly_inside_span() {
        let buffer = "aa <s>--anchor--</e> bb";
        let markers = BlockMarkers::new("anchor", "<s>", "</e>");
        let span = locate_block(buffer, &markers).unwrap();
        assert!(span.start < span.anchor);
        assert!(span.anchor + markers.anchor.len() <= span.end - markers.end_marker.len());
    }

    #[test]
    fn test_empty_patterns_rejected() {
        let err = locate_block(BOX, &BlockMarkers::new("", "<box>", "</box>")).unwrap_err();
        assert_eq!(err, LocateError::EmptyPattern { field: "anchor" });

        let err = locate_block(BOX, &BlockMarkers::new("anchor", "", "</box>")).unwrap_err();
        assert_eq!(err, LocateError::EmptyPattern { field: "start marker" });

        let err = locate_block(BOX, &BlockMarkers::new("anchor", "<box>", "")).unwrap_err();
        assert_eq!(err, LocateError::EmptyPattern { field: "end marker" });
    }

    #[test]
    fn test_unique_anchor() {
        let buffer = "[ anchor ] [ anchor ]";
        let markers = BlockMarkers::new("anchor", "[", "]");
        let err = locate_unique_block(buffer, &markers).unwrap_err();
        assert_eq!(
            err,
            LocateError::AmbiguousAnchor {
                anchor: "anchor".to_string(),
                count: 2
            }
        );

        assert!(locate_unique_block(BOX, &BlockMarkers::new("anchor", "<box>", "</box>")).is_ok());
    }

    #[test]
    fn test_unique_anchor_overlapping() {
        let err = locate_unique_block("<a>aaa</a>", &BlockMarkers::new("aa", "<a>", "</a>"))
            .unwrap_err();
        assert_eq!(
            err,
            LocateError::AmbiguousAnchor {
                anchor: "aa".to_string(),
                count: 2
            }
        );
        assert_eq!(count_occurrences("前aa前aa", "aa"), 2);
    }

    #[test]
    fn test_unique_anchor_missing() {
        let err = locate_unique_block(BOX, &BlockMarkers::new("nope", "<box>", "</box>")).unwrap_err();
        assert!(matches!(err, LocateError::AnchorNotFound { .. }));
    }

    #[test]
    fn test_multibyte_text_is_preserved() {
        let buffer = "前 <box> 持仓 anchor </box> 后";
        let result = locate_and_replace(buffer, "anchor", "<box>", "</box>", "<box>新</box>").unwrap();
        assert_eq!(result, "前 <box>新</box> 后");
    }

    #[test]
    fn test_line_numbers() {
        let buffer = "one\ntwo\n<box>\nanchor\n</box>\n";
        let span = locate_block(buffer, &BlockMarkers::new("anchor", "<box>", "</box>")).unwrap();
        assert_eq!(span.start_line(buffer), 3);
        assert_eq!(line_number(buffer, span.anchor), 4);
        assert_eq!(span.end_line(buffer), 5);
        assert_eq!(line_number(buffer, buffer.len() + 10), 6);
    }

    #[test]
    fn test_suggest_anchor_close_line() {
        let buffer = "<ul>\n  {items.map((item) => {\n  })}\n</ul>\n";
        let hint = suggest_anchor(buffer, "{items.map((item) => (").unwrap();
        assert_eq!(hint.line, 2);
        assert_eq!(hint.text, "{items.map((item) => {");
    }

    #[test]
    fn test_suggest_anchor_nothing_similar() {
        assert!(suggest_anchor("alpha\nbeta\n", "completely different text").is_none());
        assert!(suggest_anchor("alpha\n", "   ").is_none());
    }
}
