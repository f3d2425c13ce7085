//! Terralod - level-of-detail terrain storage for voxel worlds

pub mod core;
pub mod math;
pub mod column;
pub mod quadtree;
pub mod source;
pub mod streaming;
pub mod render;
pub mod lod;

pub use crate::core::error::{LodError, Result};
