// crates/core/src/position.rs
//! Span algebra over the document's character stream.
//!
//! All offsets count Unicode scalar values. Spans are half-open
//! `[start, end)`; see `redline_types::Span` for the record type — this
//! module owns the arithmetic.

use redline_types::Span;

/// An edit that has been applied to the document, for translating
/// positions recorded against the pre-edit text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedEdit {
    /// Replaced range in the pre-edit document.
    pub range: Span,
    /// Characters inserted in place of `range`.
    pub inserted_len: u64,
}

impl AppliedEdit {
    pub fn new(range: Span, inserted_len: u64) -> Self {
        Self {
            range,
            inserted_len,
        }
    }

    /// Net character shift this edit applies to everything after it.
    pub fn delta(&self) -> i64 {
        self.inserted_len as i64 - self.range.len() as i64
    }
}

/// Result of translating a span across applied edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Shifted(Span),
    /// The span fell strictly inside a replaced range; it must be
    /// re-anchored by the producer or dropped.
    Invalidated,
}

/// Whether two spans share at least one position. Zero-width spans
/// overlap a range when the caret sits strictly inside it.
pub fn overlaps(a: Span, b: Span) -> bool {
    if a.is_empty() && b.is_empty() {
        return a.start == b.start;
    }
    if a.is_empty() {
        return b.contains(a.start);
    }
    if b.is_empty() {
        return a.contains(b.start);
    }
    a.start < b.end && b.start < a.end
}

/// Whether two non-overlapping spans sit within `tolerance` characters of
/// each other. Overlapping spans are not adjacent.
pub fn adjacent(a: Span, b: Span, tolerance: u64) -> bool {
    !overlaps(a, b) && distance(a, b) <= tolerance
}

/// Gap in characters between two spans; zero when they overlap or touch.
pub fn distance(a: Span, b: Span) -> u64 {
    if overlaps(a, b) {
        return 0;
    }
    if a.end <= b.start {
        b.start - a.end
    } else {
        a.start - b.end
    }
}

/// Shift a span by a signed delta, saturating at zero.
pub fn shift(span: Span, delta: i64) -> Span {
    let move_by = |v: u64| -> u64 {
        if delta >= 0 {
            v.saturating_add(delta as u64)
        } else {
            v.saturating_sub(delta.unsigned_abs())
        }
    };
    Span {
        start: move_by(span.start),
        end: move_by(span.end),
    }
}

/// Smallest span covering both inputs.
pub fn hull(a: Span, b: Span) -> Span {
    Span {
        start: a.start.min(b.start),
        end: a.end.max(b.end),
    }
}

/// Hull over any number of spans. `None` for an empty set.
pub fn hull_all(spans: impl IntoIterator<Item = Span>) -> Option<Span> {
    spans.into_iter().reduce(hull)
}

/// Translate `span` across a sequence of already-applied edits.
///
/// For each edit `[s, e)` with inserted length `L`: positions at or past
/// `e` shift by `L - (e - s)`; positions strictly inside `[s, e)` are
/// invalidated. Edits must be given in application order, each expressed
/// against the document state it was applied to.
pub fn translate(span: Span, applied: &[AppliedEdit]) -> Translation {
    let mut current = span;
    for edit in applied {
        let s = edit.range.start;
        let e = edit.range.end;

        let strictly_inside =
            |p: u64| -> bool { !edit.range.is_empty() && p > s && p < e };

        // Straddling counts as inside: the replaced text is gone.
        if strictly_inside(current.start)
            || strictly_inside(current.end)
            || (current.start < s && current.end > e)
        {
            return Translation::Invalidated;
        }

        let delta = edit.delta();
        let move_point = |p: u64| -> u64 {
            if p >= e {
                if delta >= 0 {
                    p + delta as u64
                } else {
                    p.saturating_sub(delta.unsigned_abs())
                }
            } else {
                p
            }
        };
        current = Span {
            start: move_point(current.start),
            end: move_point(current.end),
        };
    }
    Translation::Shifted(current)
}
