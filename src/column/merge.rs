//! Partial-column merge shared by data and render columns

use std::cmp::Reverse;

use super::{Datapoint, RenderPoint};
use crate::core::error::Result;

/// A vertical span word that can be re-cut to a new range
pub trait ColumnSpan: Copy {
    fn span_y(self) -> u32;
    fn span_depth(self) -> u32;
    fn resized(self, y: u32, depth: u32) -> Result<Self>;

    fn span_top(self) -> u32 {
        self.span_y() + self.span_depth()
    }
}

impl ColumnSpan for Datapoint {
    fn span_y(self) -> u32 {
        self.y()
    }

    fn span_depth(self) -> u32 {
        self.depth()
    }

    fn resized(self, y: u32, depth: u32) -> Result<Self> {
        self.with_span(y, depth)
    }
}

impl ColumnSpan for RenderPoint {
    fn span_y(self) -> u32 {
        self.y()
    }

    fn span_depth(self) -> u32 {
        self.depth()
    }

    fn resized(self, y: u32, depth: u32) -> Result<Self> {
        self.with_span(y, depth)
    }
}

/// Replace everything inside `[lo, hi)` with `incoming`, keep the rest of `existing`
///
/// Spans crossing a bound are trimmed, a span crossing both is split in two.
/// Incoming spans are clipped to the range. The result is ordered top to bottom.
pub fn merge_column<S: ColumnSpan>(existing: &[S], lo: u32, hi: u32, incoming: &[S]) -> Result<Vec<S>> {
    let mut out = Vec::with_capacity(existing.len() + incoming.len());

    for &span in existing {
        let bottom = span.span_y();
        let top = span.span_top();
        if top <= lo || bottom >= hi {
            out.push(span);
            continue;
        }
        if top > hi {
            out.push(span.resized(hi, top - hi)?);
        }
        if bottom < lo {
            out.push(span.resized(bottom, lo - bottom)?);
        }
    }

    for &span in incoming {
        let bottom = span.span_y().max(lo);
        let top = span.span_top().min(hi);
        if top > bottom {
            if bottom == span.span_y() && top == span.span_top() {
                out.push(span);
            } else {
                out.push(span.resized(bottom, top - bottom)?);
            }
        }
    }

    out.sort_by_key(|s| Reverse(s.span_y()));
    Ok(out)
}
