//! Viewer-driven level-of-detail selection

pub mod distance;
pub mod lod_quad_tree;

pub use distance::{detail_for_distance, should_split};
pub use lod_quad_tree::{LodQuadTree, SectionState};
