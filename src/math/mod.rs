//! Position algebra for the LOD quad-tree

pub mod quad_pos;
pub mod rect;
pub mod morton;

pub use quad_pos::{QuadPos, MAX_DETAIL};
pub use rect::BlockRect;
