//! CPU-side geometry built from render columns

use bytemuck::{Pod, Zeroable};

use crate::math::QuadPos;

/// One drawable column span (32 bytes, uploaded as is)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ColumnVertex {
    /// Minimum world x of the column
    pub x: f32,
    /// Minimum world z of the column
    pub z: f32,
    /// Column width in blocks
    pub width: f32,
    /// Absolute bottom y
    pub bottom: f32,
    /// Absolute top y
    pub top: f32,
    /// ARGB colour
    pub color: u32,
    pub light: u32,
    pub _pad: u32,
}

/// Geometry of one section for one pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderBuffer {
    pub pos: Option<QuadPos>,
    pub vertices: Vec<ColumnVertex>,
}

impl RenderBuffer {
    pub fn new(pos: QuadPos, vertices: Vec<ColumnVertex>) -> Self {
        Self { pos: Some(pos), vertices }
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Opaque and transparent geometry, always swapped together
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferPair {
    pub opaque: RenderBuffer,
    pub transparent: RenderBuffer,
}

impl BufferPair {
    pub fn new(opaque: RenderBuffer, transparent: RenderBuffer) -> Self {
        Self { opaque, transparent }
    }

    /// Total spans over both passes
    pub fn span_count(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }
}
