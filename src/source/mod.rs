//! Per-section column containers
//!
//! A [`DataSource`] holds the authoritative raw columns of a section, a
//! [`RenderSource`] the derived colourised columns that get drawn. Both merge
//! terrain granules incrementally and serialize themselves into a meta file
//! body.

pub mod terrain;
pub mod color;
pub mod archive;
pub mod data_source;
pub mod render_source;
pub mod render_buffer;

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::{LodError, Result};
use crate::math::QuadPos;

pub use terrain::{ChunkUpdate, LevelContext, TerrainChunk, TerrainSpan, CHUNK_WIDTH};
pub use color::{ColorResolver, PaletteColors};
pub use data_source::{DataSource, DATA_VERSION};
pub use render_source::{RenderSource, RENDER_VERSION};
pub use render_buffer::{BufferPair, ColumnVertex, RenderBuffer};

/// Detail levels between a section and its columns
pub const SECTION_DETAIL_OFFSET: u8 = 4;

/// Columns per section side
pub const SECTION_WIDTH: usize = 1 << SECTION_DETAIL_OFFSET;

/// Columns per section
pub const SECTION_COLUMNS: usize = SECTION_WIDTH * SECTION_WIDTH;

/// Which kind of source a file holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Data,
    Render,
}

impl SourceKind {
    /// Directory name under the storage root
    pub fn dir_name(self) -> &'static str {
        match self {
            SourceKind::Data => "data",
            SourceKind::Render => "render",
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            SourceKind::Data => 0,
            SourceKind::Render => 1,
        }
    }
}

/// Shared inputs every source needs to build or load itself
#[derive(Clone)]
pub struct SourceContext {
    pub level: LevelContext,
    pub colors: Arc<dyn ColorResolver>,
}

impl SourceContext {
    pub fn new(level: LevelContext, colors: Arc<dyn ColorResolver>) -> Self {
        Self { level, colors }
    }
}

/// Validity, disposal and dirtiness of a source
///
/// Every change bumps the revision; a source is dirty while its revision is
/// ahead of the last one written to disk.
#[derive(Debug)]
pub struct Lifecycle {
    valid: AtomicBool,
    disposed: AtomicBool,
    revision: AtomicU64,
    saved: AtomicU64,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            saved: AtomicU64::new(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) && !self.disposed.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Mark superseded
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub fn ensure_live(&self, pos: QuadPos) -> Result<()> {
        if self.is_disposed() {
            return Err(LodError::Disposed(pos));
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.revision.load(Ordering::Acquire) > self.saved.load(Ordering::Acquire)
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that `revision` reached the disk; later changes stay dirty
    pub fn mark_saved(&self, revision: u64) {
        self.saved.fetch_max(revision, Ordering::AcqRel);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Loader for one on-disk version of a source type
pub type SourceLoader<S> = fn(&mut dyn Read, QuadPos, &SourceContext) -> Result<S>;

/// Behaviour the file provider needs from a section source
pub trait LodSource: Send + Sync + Sized + 'static {
    const KIND: SourceKind;

    /// Version tag written for newly saved sources
    const CURRENT_VERSION: u8;

    /// Empty source for a section that has no file yet
    fn create_empty(pos: QuadPos, ctx: &SourceContext) -> Self;

    /// Loader for `CURRENT_VERSION`
    fn current_loader() -> SourceLoader<Self>;

    fn pos(&self) -> QuadPos;

    /// Version tag this source was loaded or created with
    fn version(&self) -> u8;

    /// Merge a terrain granule; returns whether anything changed
    fn update(&mut self, chunk: &dyn TerrainChunk, ctx: &SourceContext) -> Result<bool>;

    /// Serialize into `out`; the sink stays owned by the caller
    fn save(&self, out: &mut dyn Write) -> Result<()>;

    fn lifecycle(&self) -> &Lifecycle;

    fn is_valid(&self) -> bool {
        self.lifecycle().is_valid()
    }

    fn dispose(&self) {
        self.lifecycle().dispose();
    }
}

/// Column index of `(x, z)` inside a section
#[inline]
pub fn column_index(x: usize, z: usize) -> usize {
    z * SECTION_WIDTH + x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let life = Lifecycle::new();
        let pos = QuadPos::new(4, 0, 0);
        assert!(life.is_valid());
        assert!(life.ensure_live(pos).is_ok());

        life.invalidate();
        assert!(!life.is_valid());
        assert!(life.ensure_live(pos).is_ok());

        life.dispose();
        assert!(matches!(life.ensure_live(pos), Err(LodError::Disposed(_))));
    }

    #[test]
    fn test_dirty_flag() {
        let life = Lifecycle::new();
        assert!(!life.is_dirty());
        life.mark_dirty();
        assert!(life.is_dirty());
        life.mark_saved(life.revision());
        assert!(!life.is_dirty());
    }

    #[test]
    fn test_save_of_older_revision_keeps_later_change_dirty() {
        let life = Lifecycle::new();
        life.mark_dirty();
        let encoded = life.revision();
        // a change lands while the encoded bytes are being written
        life.mark_dirty();
        life.mark_saved(encoded);
        assert!(life.is_dirty());

        // a late save of the older bytes cannot undo a newer one
        life.mark_saved(life.revision());
        life.mark_saved(encoded);
        assert!(!life.is_dirty());
    }
}
