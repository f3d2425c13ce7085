//! Generic sparse quad-tree addressed by detail level and position

pub mod node;
pub mod tree;

pub use node::QuadNode;
pub use tree::{Iter, QuadTree};
