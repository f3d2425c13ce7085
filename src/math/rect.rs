//! Axis-aligned block rectangle on the horizontal plane

use glam::IVec2;

/// Half-open rectangle `[min, max)` in block coordinates (`y` of the vector is world z)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl BlockRect {
    /// Create rectangle from min (inclusive) and max (exclusive) corners
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    /// Square of side `width` centered on `center`
    pub fn centered(center: IVec2, width: i32) -> Self {
        let min = center - IVec2::splat(width / 2);
        Self::new(min, min + IVec2::splat(width))
    }

    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    /// Check if a block lies inside
    pub fn contains_block(&self, block: IVec2) -> bool {
        block.x >= self.min.x && block.x < self.max.x
            && block.y >= self.min.y && block.y < self.max.y
    }

    /// Check if two rectangles share at least one block
    pub fn intersects(&self, other: &BlockRect) -> bool {
        self.min.x < other.max.x && self.max.x > other.min.x
            && self.min.y < other.max.y && self.max.y > other.min.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_half_open() {
        let r = BlockRect::new(IVec2::new(0, 0), IVec2::new(16, 16));
        assert!(r.contains_block(IVec2::new(0, 0)));
        assert!(r.contains_block(IVec2::new(15, 15)));
        assert!(!r.contains_block(IVec2::new(16, 0)));
        assert!(!r.contains_block(IVec2::new(-1, 3)));
    }

    #[test]
    fn test_intersects_edges() {
        let a = BlockRect::new(IVec2::new(0, 0), IVec2::new(16, 16));
        let touching = BlockRect::new(IVec2::new(16, 0), IVec2::new(32, 16));
        let overlapping = BlockRect::new(IVec2::new(15, 15), IVec2::new(20, 20));
        assert!(!a.intersects(&touching));
        assert!(a.intersects(&overlapping));
        assert!(!a.intersects(&BlockRect::new(IVec2::new(0, 16), IVec2::new(16, 32))));
    }

    #[test]
    fn test_centered() {
        let r = BlockRect::centered(IVec2::new(0, 0), 64);
        assert_eq!(r.min, IVec2::new(-32, -32));
        assert_eq!(r.max, IVec2::new(32, 32));
    }
}
