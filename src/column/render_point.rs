//! Colourised span used by render sources
//!
//! Same vertical layout as [`Datapoint`](super::Datapoint) with the id
//! replaced by a 32-bit ARGB colour.

use bytemuck::{Pod, Zeroable};

use super::datapoint::{
    validate_span, DEPTH_MASK, DEPTH_OFFSET, LIGHT_MASK, LIGHT_OFFSET, MAX_Y, Y_MASK, Y_OFFSET,
};
use crate::core::error::Result;

const COLOR_MASK: u64 = 0xFFFF_FFFF;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RenderPoint(pub u64);

impl RenderPoint {
    pub fn encode(color: u32, depth: u32, y: u32, light: u8) -> Result<Self> {
        validate_span(y as i64, depth as i64)?;
        Ok(Self(
            (color as u64 & COLOR_MASK)
                | ((depth as u64 & DEPTH_MASK) << DEPTH_OFFSET)
                | ((y as u64 & Y_MASK) << Y_OFFSET)
                | ((light as u64 & LIGHT_MASK) << LIGHT_OFFSET),
        ))
    }

    /// ARGB colour
    #[inline]
    pub fn color(self) -> u32 {
        (self.0 & COLOR_MASK) as u32
    }

    #[inline]
    pub fn alpha(self) -> u8 {
        (self.color() >> 24) as u8
    }

    #[inline]
    pub fn depth(self) -> u32 {
        ((self.0 >> DEPTH_OFFSET) & DEPTH_MASK) as u32
    }

    #[inline]
    pub fn y(self) -> u32 {
        ((self.0 >> Y_OFFSET) & Y_MASK) as u32
    }

    #[inline]
    pub fn light(self) -> u8 {
        ((self.0 >> LIGHT_OFFSET) & LIGHT_MASK) as u8
    }

    pub fn top(self) -> u32 {
        self.y() + self.depth()
    }

    pub fn is_transparent(self) -> bool {
        self.alpha() < 255
    }

    pub fn with_span(self, y: u32, depth: u32) -> Result<Self> {
        Self::encode(self.color(), depth, y, self.light())
    }
}

/// Drop invisible spans and merge touching spans of identical colour and light
///
/// Input and output are ordered top to bottom. Spans whose joined depth would
/// not fit the depth field stay separate.
pub fn simplify_column(points: &[RenderPoint]) -> Result<Vec<RenderPoint>> {
    let mut out: Vec<RenderPoint> = Vec::with_capacity(points.len());
    for &p in points {
        if p.alpha() == 0 {
            continue;
        }
        if let Some(last) = out.last_mut() {
            let joinable = last.color() == p.color()
                && last.light() == p.light()
                && p.top() == last.y()
                && p.depth() + last.depth() < MAX_Y;
            if joinable {
                *last = last.with_span(p.y(), p.depth() + last.depth())?;
                continue;
            }
        }
        out.push(p);
    }
    Ok(out)
}
