//! Terrain-update granules consumed from the world-generation collaborator

use glam::IVec2;

use crate::column::{IdTable, MAX_Y};
use crate::core::error::{LodError, Result};
use crate::math::BlockRect;

/// Width of a terrain granule (one chunk) in blocks
pub const CHUNK_WIDTH: i32 = 16;

/// Height bounds of the world the terrain belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelContext {
    /// Lowest block y
    pub min_y: i32,
    /// Number of blocks above `min_y`
    pub height: u32,
}

impl LevelContext {
    pub fn new(min_y: i32, height: u32) -> Result<Self> {
        if height == 0 || height > MAX_Y {
            return Err(LodError::EncodingRange {
                field: "level height",
                value: height as i64,
                reason: "outside 1..=MAX_Y",
            });
        }
        Ok(Self { min_y, height })
    }

    /// Exclusive top block y
    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    /// Absolute y to column-relative y, clamped to the level
    pub fn clamp_relative(&self, y: i32) -> u32 {
        (y as i64 - self.min_y as i64).clamp(0, self.height as i64) as u32
    }
}

impl Default for LevelContext {
    fn default() -> Self {
        Self { min_y: -64, height: 384 }
    }
}

/// One vertical span of raw terrain, in absolute block coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerrainSpan {
    /// Index into the granule's palette
    pub id: u32,
    /// Bottom block y
    pub y: i32,
    pub depth: u32,
    /// Packed block/sky light
    pub light: u8,
}

/// Read-only view of a chunk-sized terrain update
///
/// This is the only contract the engine needs from the host world.
pub trait TerrainChunk: Send + Sync {
    /// Chunk coordinates (blocks / 16)
    fn chunk_pos(&self) -> IVec2;

    /// Palette that span ids index into
    fn palette(&self) -> &IdTable;

    /// Absolute y range `[lo, hi)` the update covers; spans outside it are ignored
    fn vertical_range(&self) -> (i32, i32);

    /// Spans of the column at `(local_x, local_z)`, top to bottom
    fn spans(&self, local_x: usize, local_z: usize) -> &[TerrainSpan];

    /// Horizontal footprint in blocks
    fn footprint(&self) -> BlockRect {
        let min = self.chunk_pos() * CHUNK_WIDTH;
        BlockRect::new(min, min + IVec2::splat(CHUNK_WIDTH))
    }
}

/// Owned terrain granule
#[derive(Clone, Debug)]
pub struct ChunkUpdate {
    pos: IVec2,
    palette: IdTable,
    range: (i32, i32),
    columns: Vec<Vec<TerrainSpan>>,
}

impl ChunkUpdate {
    /// Empty update covering `[min_y, max_y)` of chunk `pos`
    pub fn new(pos: IVec2, min_y: i32, max_y: i32) -> Self {
        Self {
            pos,
            palette: IdTable::new(),
            range: (min_y, max_y),
            columns: vec![Vec::new(); (CHUNK_WIDTH * CHUNK_WIDTH) as usize],
        }
    }

    /// Empty update covering the whole level height
    pub fn full_height(pos: IVec2, level: &LevelContext) -> Self {
        Self::new(pos, level.min_y, level.max_y())
    }

    fn index(local_x: usize, local_z: usize) -> usize {
        local_z * CHUNK_WIDTH as usize + local_x
    }

    /// Append a span to a column; callers push from top to bottom
    pub fn push_span(&mut self, local_x: usize, local_z: usize, material: &str, y: i32, depth: u32, light: u8) {
        let id = self.palette.get_or_insert(material);
        self.columns[Self::index(local_x, local_z)].push(TerrainSpan { id, y, depth, light });
    }

    /// Put the same span in every column
    pub fn fill(&mut self, material: &str, y: i32, depth: u32, light: u8) {
        for z in 0..CHUNK_WIDTH as usize {
            for x in 0..CHUNK_WIDTH as usize {
                self.push_span(x, z, material, y, depth, light);
            }
        }
    }
}

impl TerrainChunk for ChunkUpdate {
    fn chunk_pos(&self) -> IVec2 {
        self.pos
    }

    fn palette(&self) -> &IdTable {
        &self.palette
    }

    fn vertical_range(&self) -> (i32, i32) {
        self.range
    }

    fn spans(&self, local_x: usize, local_z: usize) -> &[TerrainSpan] {
        self.columns
            .get(Self::index(local_x, local_z))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_context() {
        let level = LevelContext::new(-64, 384).unwrap();
        assert_eq!(level.max_y(), 320);
        assert_eq!(level.clamp_relative(-64), 0);
        assert_eq!(level.clamp_relative(64), 128);
        assert_eq!(level.clamp_relative(1000), 384);
        assert!(LevelContext::new(0, MAX_Y + 1).is_err());
    }

    #[test]
    fn test_chunk_update_footprint() {
        let update = ChunkUpdate::new(IVec2::new(-1, 2), 0, 256);
        let rect = update.footprint();
        assert_eq!(rect.min, IVec2::new(-16, 32));
        assert_eq!(rect.max, IVec2::new(0, 48));
    }

    #[test]
    fn test_fill_shares_palette_entry() {
        let mut update = ChunkUpdate::new(IVec2::ZERO, 0, 256);
        update.fill("stone", 0, 64, 0);
        assert_eq!(update.palette().len(), 1);
        assert_eq!(update.spans(15, 15).len(), 1);
        assert_eq!(update.spans(3, 4)[0].depth, 64);
    }
}
