//! Quad-tree addressable positions
//!
//! A [`QuadPos`] names a square region of the world whose side length is
//! `2^detail` blocks. Coordinates are always relative to their own detail
//! level, so `(detail 4, x 1, z 0)` covers blocks `16..32` on the x axis.

use std::fmt;

use glam::{DVec2, IVec2};

use super::morton::encode_morton_2d;
use super::rect::BlockRect;
use crate::core::error::{LodError, Result};

/// Highest supported detail level; a region of `2^30` blocks is far beyond any world border
pub const MAX_DETAIL: u8 = 30;

/// Position in the LOD quad-tree
///
/// Ordering is by `(detail, x, z)`, which is the field order below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadPos {
    pub detail: u8,
    pub x: i32,
    pub z: i32,
}

impl QuadPos {
    pub const fn new(detail: u8, x: i32, z: i32) -> Self {
        Self { detail, x, z }
    }

    /// Position at `detail` containing the block `(x, z)`
    pub fn from_block(detail: u8, x: i32, z: i32) -> Self {
        Self::new(detail, x >> detail, z >> detail)
    }

    /// Chunk-sized position (detail 4) for chunk coordinates
    pub fn from_chunk(chunk: IVec2) -> Self {
        Self::new(4, chunk.x, chunk.y)
    }

    /// Side length in blocks
    pub fn width(&self) -> i64 {
        1i64 << self.detail
    }

    /// Minimum corner in block coordinates
    pub fn min_block(&self) -> IVec2 {
        IVec2::new(self.x << self.detail, self.z << self.detail)
    }

    /// Block footprint of this region
    pub fn block_rect(&self) -> BlockRect {
        let min = self.min_block();
        let w = self.width() as i32;
        BlockRect::new(min, min + IVec2::splat(w))
    }

    /// Minimum corner of this region expressed at `detail`
    ///
    /// Finer levels multiply the coordinates, coarser levels floor them.
    pub fn corner_at(&self, detail: u8) -> QuadPos {
        if detail <= self.detail {
            let shift = self.detail - detail;
            QuadPos::new(detail, self.x << shift, self.z << shift)
        } else {
            let shift = detail - self.detail;
            QuadPos::new(detail, self.x >> shift, self.z >> shift)
        }
    }

    /// Center of the region in block units
    pub fn center(&self) -> DVec2 {
        let w = self.width() as f64;
        DVec2::new(self.x as f64 * w + w * 0.5, self.z as f64 * w + w * 0.5)
    }

    /// Coarsen to `new_detail`, flooring toward negative infinity
    pub fn convert_up(&self, new_detail: u8) -> Result<QuadPos> {
        if new_detail < self.detail {
            return Err(LodError::InvalidLevel(format!(
                "cannot convert {} up to finer detail {}",
                self, new_detail
            )));
        }
        if new_detail > MAX_DETAIL {
            return Err(LodError::InvalidLevel(format!(
                "detail {} exceeds maximum {}",
                new_detail, MAX_DETAIL
            )));
        }
        let shift = new_detail - self.detail;
        // arithmetic shift floors negative coordinates
        Ok(QuadPos::new(new_detail, self.x >> shift, self.z >> shift))
    }

    /// Child one detail level finer; bit0 of `index` is x parity, bit1 is z parity
    pub fn convert_down_child(&self, index: u8) -> Result<QuadPos> {
        if self.detail == 0 {
            return Err(LodError::InvalidLevel(format!("{} has no children", self)));
        }
        if index > 3 {
            return Err(LodError::InvalidLevel(format!("child index {} out of 0..4", index)));
        }
        Ok(QuadPos::new(
            self.detail - 1,
            self.x * 2 + (index & 1) as i32,
            self.z * 2 + ((index >> 1) & 1) as i32,
        ))
    }

    /// Index of this position among its parent's four children
    pub fn child_index_within_parent(&self) -> u8 {
        ((self.x & 1) | ((self.z & 1) << 1)) as u8
    }

    /// Parent one detail level coarser
    pub fn parent(&self) -> Result<QuadPos> {
        self.convert_up(self.detail + 1)
    }

    /// All four children in index order
    pub fn children(&self) -> Result<[QuadPos; 4]> {
        Ok([
            self.convert_down_child(0)?,
            self.convert_down_child(1)?,
            self.convert_down_child(2)?,
            self.convert_down_child(3)?,
        ])
    }

    /// True if `other` lies entirely within this region (including equality)
    pub fn contains(&self, other: &QuadPos) -> bool {
        other.detail <= self.detail
            && other
                .convert_up(self.detail)
                .map(|p| p == *self)
                .unwrap_or(false)
    }

    /// True if one region contains the other
    pub fn overlaps(&self, other: &QuadPos) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Distance in blocks from `point` to the nearest edge of this region (0 inside)
    pub fn distance_to(&self, point: DVec2) -> f64 {
        let rect = self.block_rect();
        let min = rect.min.as_dvec2();
        let max = rect.max.as_dvec2();
        let dx = (min.x - point.x).max(0.0).max(point.x - max.x);
        let dz = (min.y - point.y).max(0.0).max(point.y - max.y);
        (dx * dx + dz * dz).sqrt()
    }

    /// Z-order key within a detail level, used to keep disk writes spatially coherent
    pub fn morton_key(&self) -> u64 {
        // bias into unsigned space so negative coordinates interleave correctly
        let bias = |v: i32| (v as i64 + (1i64 << 31)) as u32;
        encode_morton_2d(bias(self.x), bias(self.z))
    }
}

impl fmt::Display for QuadPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{},{}]", self.detail, self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_positions() -> Vec<QuadPos> {
        let mut out = Vec::new();
        for detail in [1u8, 2, 4, 7] {
            for x in [-9, -2, -1, 0, 1, 5, 12] {
                for z in [-4, -1, 0, 3] {
                    out.push(QuadPos::new(detail, x, z));
                }
            }
        }
        out
    }

    #[test]
    fn test_convert_up_floors_negative() {
        let p = QuadPos::new(0, -1, -17);
        let up = p.convert_up(4).unwrap();
        assert_eq!(up, QuadPos::new(4, -1, -2));

        let p = QuadPos::new(2, -4, 3);
        assert_eq!(p.convert_up(3).unwrap(), QuadPos::new(3, -2, 1));
    }

    #[test]
    fn test_convert_up_identity_and_errors() {
        let p = QuadPos::new(5, 3, -7);
        assert_eq!(p.convert_up(5).unwrap(), p);
        assert!(matches!(p.convert_up(4), Err(LodError::InvalidLevel(_))));
        assert!(p.convert_up(MAX_DETAIL + 1).is_err());
    }

    #[test]
    fn test_convert_down_child_at_zero_fails() {
        let p = QuadPos::new(0, 1, 1);
        assert!(matches!(p.convert_down_child(0), Err(LodError::InvalidLevel(_))));
        assert!(QuadPos::new(3, 0, 0).convert_down_child(4).is_err());
    }

    #[test]
    fn test_child_parent_inverse() {
        for p in sample_positions() {
            for i in 0..4u8 {
                let child = p.convert_down_child(i).unwrap();
                assert_eq!(child.child_index_within_parent(), i, "child {} of {}", i, p);
                assert_eq!(child.convert_up(p.detail).unwrap(), p);
            }
        }
    }

    #[test]
    fn test_overlap_symmetry() {
        let positions = sample_positions();
        for a in &positions {
            for b in &positions {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_overlaps() {
        let parent = QuadPos::new(4, -1, 0);
        let inside = QuadPos::new(0, -3, 15);
        let outside = QuadPos::new(0, 0, 15);
        assert!(parent.overlaps(&inside));
        assert!(!parent.overlaps(&outside));
        assert!(parent.overlaps(&parent));
        // same level, different coordinates never overlap
        assert!(!parent.overlaps(&QuadPos::new(4, 0, 0)));
    }

    #[test]
    fn test_corner_at() {
        let p = QuadPos::new(4, -2, 3);
        assert_eq!(p.corner_at(0), QuadPos::new(0, -32, 48));
        assert_eq!(p.corner_at(4), p);
        assert_eq!(p.corner_at(5), QuadPos::new(5, -1, 1));
        assert_eq!(p.min_block(), IVec2::new(-32, 48));
    }

    #[test]
    fn test_center() {
        let p = QuadPos::new(4, 0, -1);
        assert_eq!(p.center(), DVec2::new(8.0, -8.0));
        let block = QuadPos::new(0, 3, 3);
        assert_eq!(block.center(), DVec2::new(3.5, 3.5));
    }

    #[test]
    fn test_ordering() {
        let mut v = vec![
            QuadPos::new(2, 0, 0),
            QuadPos::new(1, 5, 5),
            QuadPos::new(1, 5, -1),
            QuadPos::new(1, -3, 9),
        ];
        v.sort();
        assert_eq!(
            v,
            vec![
                QuadPos::new(1, -3, 9),
                QuadPos::new(1, 5, -1),
                QuadPos::new(1, 5, 5),
                QuadPos::new(2, 0, 0),
            ]
        );
    }

    #[test]
    fn test_distance_to() {
        let p = QuadPos::new(4, 0, 0);
        assert_eq!(p.distance_to(DVec2::new(8.0, 8.0)), 0.0);
        assert_eq!(p.distance_to(DVec2::new(20.0, 8.0)), 4.0);
        assert_eq!(p.distance_to(DVec2::new(-3.0, -4.0)), 5.0);
    }

    #[test]
    fn test_from_block() {
        assert_eq!(QuadPos::from_block(4, -1, 16), QuadPos::new(4, -1, 1));
        assert_eq!(QuadPos::from_chunk(IVec2::new(2, -3)), QuadPos::new(4, 2, -3));
    }
}
