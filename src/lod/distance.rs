//! Distance-based detail selection
//!
//! Detail bands double in width: with a unit of 64 blocks the finest level
//! covers 0-64, the next 64-128, then 128-256 and so on up to the coarsest
//! level, which covers everything beyond.

use glam::DVec2;

use crate::math::QuadPos;

/// Detail level wanted at `distance` blocks from the viewer
///
/// # Examples
/// ```
/// use terralod::lod::detail_for_distance;
///
/// assert_eq!(detail_for_distance(32.0, 64.0, 4, 10), 4);
/// assert_eq!(detail_for_distance(96.0, 64.0, 4, 10), 5);
/// assert_eq!(detail_for_distance(200.0, 64.0, 4, 10), 6);
/// assert_eq!(detail_for_distance(1.0e9, 64.0, 4, 10), 10);
/// ```
pub fn detail_for_distance(distance: f64, unit: f64, min_detail: u8, max_detail: u8) -> u8 {
    let mut band = unit;
    let mut detail = min_detail;
    while detail < max_detail && distance >= band {
        band *= 2.0;
        detail += 1;
    }
    detail
}

/// True if `pos` is too coarse for its distance to `viewer` and should be split
pub fn should_split(pos: QuadPos, viewer: DVec2, unit: f64, min_detail: u8, max_detail: u8) -> bool {
    if pos.detail <= min_detail {
        return false;
    }
    detail_for_distance(pos.distance_to(viewer), unit, min_detail, max_detail) < pos.detail
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Outer edge of the band served by `detail`; the coarsest level is unbounded
    fn band_limit(detail: u8, unit: f64, min_detail: u8, max_detail: u8) -> f64 {
        if detail >= max_detail {
            return f64::INFINITY;
        }
        unit * (1u64 << detail.saturating_sub(min_detail)) as f64
    }

    #[test]
    fn test_detail_bands() {
        assert_eq!(detail_for_distance(0.0, 64.0, 4, 10), 4);
        assert_eq!(detail_for_distance(63.9, 64.0, 4, 10), 4);
        assert_eq!(detail_for_distance(64.0, 64.0, 4, 10), 5);
        assert_eq!(detail_for_distance(127.9, 64.0, 4, 10), 5);
        assert_eq!(detail_for_distance(128.0, 64.0, 4, 10), 6);
        assert_eq!(detail_for_distance(4095.0, 64.0, 4, 10), 10);
        // clamped to the coarsest level
        assert_eq!(detail_for_distance(4.0e6, 64.0, 4, 7), 7);
    }

    #[test]
    fn test_band_limit_matches_selection() {
        for detail in 4..10u8 {
            let edge = band_limit(detail, 64.0, 4, 10);
            assert_eq!(detail_for_distance(edge - 0.5, 64.0, 4, 10), detail);
            assert_eq!(detail_for_distance(edge, 64.0, 4, 10), detail + 1);
        }
        assert!(band_limit(10, 64.0, 4, 10).is_infinite());
    }

    #[test]
    fn test_should_split() {
        let viewer = DVec2::new(8.0, 8.0);
        // a section containing the viewer always splits down to the finest level
        assert!(should_split(QuadPos::new(8, 0, 0), viewer, 64.0, 4, 10));
        assert!(!should_split(QuadPos::new(4, 0, 0), viewer, 64.0, 4, 10));
        // 2048 blocks away a detail 8 section is fine
        let far = QuadPos::from_block(8, 2048 + 16, 0);
        assert!(!should_split(far, viewer, 64.0, 4, 10));
    }
}
