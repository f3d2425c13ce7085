//! Render-side hand-off of section geometry

pub mod handler;

pub use handler::{DiscardSink, RenderBufferHandler, RenderBufferSlot, RenderSink, Swapped};
