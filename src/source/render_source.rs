//! Colourised columns ready to be turned into geometry

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use glam::IVec2;
use rayon::prelude::*;

use super::archive::SectionArchive;
use super::data_source::DataSource;
use super::render_buffer::{BufferPair, ColumnVertex, RenderBuffer};
use super::{
    column_index, ColorResolver, LevelContext, Lifecycle, LodSource, SourceContext, SourceKind,
    SourceLoader, TerrainChunk, SECTION_COLUMNS, SECTION_DETAIL_OFFSET, SECTION_WIDTH,
};
use crate::column::{merge_column, simplify_column, RenderPoint};
use crate::core::error::{LodError, Result};
use crate::math::QuadPos;

/// On-disk version of render sources written by this build
pub const RENDER_VERSION: u8 = 1;

pub struct RenderSource {
    pos: QuadPos,
    version: u8,
    columns: Vec<Vec<RenderPoint>>,
    lifecycle: Lifecycle,
    swap_pending: AtomicBool,
    staged: Mutex<Option<BufferPair>>,
}

impl RenderSource {
    pub fn new(pos: QuadPos) -> Self {
        Self::with_columns(pos, RENDER_VERSION, vec![Vec::new(); SECTION_COLUMNS])
    }

    fn with_columns(pos: QuadPos, version: u8, columns: Vec<Vec<RenderPoint>>) -> Self {
        Self {
            pos,
            version,
            columns,
            lifecycle: Lifecycle::new(),
            swap_pending: AtomicBool::new(false),
            staged: Mutex::new(None),
        }
    }

    /// Derive render columns from raw data
    ///
    /// The result is dirty so it gets written on the next flush.
    pub fn from_data_source(data: &DataSource, colors: &dyn ColorResolver) -> Result<Self> {
        let columns = data
            .columns()
            .par_iter()
            .map(|column| {
                let points = column
                    .iter()
                    .map(|&dp| {
                        let color = data.material(dp).map(|key| colors.color(key)).unwrap_or(0);
                        RenderPoint::encode(color, dp.depth(), dp.y(), dp.light())
                    })
                    .collect::<Result<Vec<_>>>()?;
                simplify_column(&points)
            })
            .collect::<Result<Vec<_>>>()?;

        let source = Self::with_columns(data.pos(), RENDER_VERSION, columns);
        source.lifecycle.mark_dirty();
        Ok(source)
    }

    pub fn column(&self, x: usize, z: usize) -> &[RenderPoint] {
        &self.columns[column_index(x, z)]
    }

    /// Build opaque and transparent geometry for the whole section
    pub fn build_buffers(&self, level: &LevelContext) -> BufferPair {
        let width = 1i32 << (self.pos.detail - SECTION_DETAIL_OFFSET);
        let origin = self.pos.min_block();
        let min_y = level.min_y as f32;

        let per_column: Vec<(Vec<ColumnVertex>, Vec<ColumnVertex>)> = self
            .columns
            .par_iter()
            .enumerate()
            .map(|(index, column)| {
                let cx = (index % SECTION_WIDTH) as i32;
                let cz = (index / SECTION_WIDTH) as i32;
                let corner = origin + IVec2::new(cx, cz) * width;
                let mut opaque = Vec::new();
                let mut transparent = Vec::new();
                for point in column {
                    let vertex = ColumnVertex {
                        x: corner.x as f32,
                        z: corner.y as f32,
                        width: width as f32,
                        bottom: min_y + point.y() as f32,
                        top: min_y + point.top() as f32,
                        color: point.color(),
                        light: point.light() as u32,
                        _pad: 0,
                    };
                    if point.is_transparent() {
                        transparent.push(vertex);
                    } else {
                        opaque.push(vertex);
                    }
                }
                (opaque, transparent)
            })
            .collect();

        let mut opaque = Vec::new();
        let mut transparent = Vec::new();
        for (o, t) in per_column {
            opaque.extend(o);
            transparent.extend(t);
        }
        BufferPair::new(
            RenderBuffer::new(self.pos, opaque),
            RenderBuffer::new(self.pos, transparent),
        )
    }

    /// Stage a buffer pair unless a swap is already pending; never blocks
    pub fn try_swap_render_buffer(&self, opaque: RenderBuffer, transparent: RenderBuffer) -> bool {
        if self
            .swap_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        *staged = Some(BufferPair::new(opaque, transparent));
        true
    }

    pub fn has_pending_swap(&self) -> bool {
        self.swap_pending.load(Ordering::Acquire)
    }

    /// Take the staged pair and reopen staging
    ///
    /// Returns `None` when nothing was staged.
    pub fn take_staged(&self) -> Option<BufferPair> {
        if !self.has_pending_swap() {
            return None;
        }
        let pair = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // a concurrent stager may have set the flag but not filled the slot yet
        let pair = pair?;
        self.swap_pending.store(false, Ordering::Release);
        Some(pair)
    }

    /// Load a version 1 body
    pub fn load_v1(input: &mut dyn Read, pos: QuadPos, _ctx: &SourceContext) -> Result<Self> {
        let archive = SectionArchive::read_from(input, SourceKind::Render, pos)?;
        let columns = archive
            .columns()
            .into_iter()
            .map(|words| words.iter().map(|&w| RenderPoint(w)).collect())
            .collect();
        Ok(Self::with_columns(pos, archive.version, columns))
    }
}

impl LodSource for RenderSource {
    const KIND: SourceKind = SourceKind::Render;
    const CURRENT_VERSION: u8 = RENDER_VERSION;

    fn create_empty(pos: QuadPos, _ctx: &SourceContext) -> Self {
        Self::new(pos)
    }

    fn current_loader() -> SourceLoader<Self> {
        RenderSource::load_v1
    }

    fn pos(&self) -> QuadPos {
        self.pos
    }

    fn version(&self) -> u8 {
        self.version
    }

    fn update(&mut self, chunk: &dyn TerrainChunk, ctx: &SourceContext) -> Result<bool> {
        self.lifecycle.ensure_live(self.pos)?;

        let section = self.pos.block_rect();
        let footprint = chunk.footprint();
        if !section.intersects(&footprint) {
            return Ok(false);
        }
        let (range_lo, range_hi) = chunk.vertical_range();
        let lo = ctx.level.clamp_relative(range_lo);
        let hi = ctx.level.clamp_relative(range_hi);
        if hi <= lo {
            return Ok(false);
        }

        let palette = chunk.palette();
        let width = 1i32 << (self.pos.detail - SECTION_DETAIL_OFFSET);
        let mut staged = Vec::new();

        for cz in 0..SECTION_WIDTH {
            for cx in 0..SECTION_WIDTH {
                let sample = section.min + IVec2::new(cx as i32 * width, cz as i32 * width);
                if !footprint.contains_block(sample) {
                    continue;
                }
                let local = sample - footprint.min;
                let mut incoming = Vec::new();
                for span in chunk.spans(local.x as usize, local.y as usize) {
                    let color = palette.get(span.id).map(|key| ctx.colors.color(key)).unwrap_or(0);
                    if color >> 24 == 0 {
                        continue;
                    }
                    let y = span.y as i64 - ctx.level.min_y as i64;
                    if y < 0 {
                        return Err(LodError::EncodingRange {
                            field: "y",
                            value: y,
                            reason: "below level minimum",
                        });
                    }
                    incoming.push(RenderPoint::encode(color, span.depth, y as u32, span.light)?);
                }

                let index = column_index(cx, cz);
                let merged = merge_column(&self.columns[index], lo, hi, &incoming)?;
                let simplified = simplify_column(&merged)?;
                if simplified != self.columns[index] {
                    staged.push((index, simplified));
                }
            }
        }

        // nothing is committed unless every column encoded
        if staged.is_empty() {
            return Ok(false);
        }
        for (index, column) in staged {
            self.columns[index] = column;
        }
        self.lifecycle.mark_dirty();
        Ok(true)
    }

    fn save(&self, out: &mut dyn Write) -> Result<()> {
        self.lifecycle.ensure_live(self.pos)?;
        let archive = SectionArchive::from_columns(
            SourceKind::Render,
            RENDER_VERSION,
            self.pos,
            Vec::new(),
            self.columns.iter().map(|c| bytemuck::cast_slice::<RenderPoint, u64>(c)),
        )?;
        archive.write_to(out)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChunkUpdate, PaletteColors};
    use std::sync::Arc;
    use std::thread;

    const STONE: u32 = 0xFF80_8080;
    const WATER: u32 = 0x8020_40FF;

    fn ctx() -> SourceContext {
        let colors = PaletteColors::new()
            .with_color("stone", STONE)
            .with_color("water", WATER);
        SourceContext::new(LevelContext::default(), Arc::new(colors))
    }

    fn terrain(ctx: &SourceContext, chunk: IVec2) -> ChunkUpdate {
        let mut update = ChunkUpdate::full_height(chunk, &ctx.level);
        for z in 0..16 {
            for x in 0..16 {
                update.push_span(x, z, "air", 70, 50, 0);
                update.push_span(x, z, "water", 62, 8, 0);
                update.push_span(x, z, "stone", 40, 22, 0);
                update.push_span(x, z, "stone", -64, 104, 0);
            }
        }
        update
    }

    #[test]
    fn test_update_drops_air_and_merges() {
        let ctx = ctx();
        let mut source = RenderSource::new(QuadPos::new(4, 0, 0));
        assert!(source.update(&terrain(&ctx, IVec2::ZERO), &ctx).unwrap());

        let column = source.column(7, 7);
        assert_eq!(column.len(), 2);
        assert_eq!(column[0].color(), WATER);
        // both stone spans touch and become one
        assert_eq!((column[1].color(), column[1].y(), column[1].depth()), (STONE, 0, 126));
        assert!(source.lifecycle().is_dirty());
    }

    #[test]
    fn test_from_data_source_matches_direct_update() {
        let ctx = ctx();
        let pos = QuadPos::new(4, 0, 0);
        let mut data = DataSource::new(pos);
        data.update(&terrain(&ctx, IVec2::ZERO), &ctx).unwrap();

        let derived = RenderSource::from_data_source(&data, ctx.colors.as_ref()).unwrap();
        let mut direct = RenderSource::new(pos);
        direct.update(&terrain(&ctx, IVec2::ZERO), &ctx).unwrap();

        assert_eq!(derived.column(3, 9), direct.column(3, 9));
        assert!(derived.lifecycle().is_dirty());
    }

    #[test]
    fn test_build_buffers_splits_passes() {
        let ctx = ctx();
        let mut source = RenderSource::new(QuadPos::new(4, 1, 0));
        let update = terrain(&ctx, IVec2::new(1, 0));
        source.update(&update, &ctx).unwrap();

        let pair = source.build_buffers(&ctx.level);
        assert_eq!(pair.opaque.len(), 256);
        assert_eq!(pair.transparent.len(), 256);

        let first = pair.opaque.vertices[0];
        assert_eq!((first.x, first.z, first.width), (16.0, 0.0, 1.0));
        assert_eq!((first.bottom, first.top), (-64.0, 62.0));
        let water = pair.transparent.vertices[17];
        assert_eq!((water.x, water.z), (17.0, 1.0));
        assert_eq!((water.bottom, water.top), (62.0, 70.0));
    }

    #[test]
    fn test_swap_is_exclusive_until_taken() {
        let source = RenderSource::new(QuadPos::new(4, 0, 0));

        assert!(source.try_swap_render_buffer(RenderBuffer::default(), RenderBuffer::default()));
        assert!(!source.try_swap_render_buffer(RenderBuffer::default(), RenderBuffer::default()));

        assert!(source.take_staged().is_some());
        assert!(!source.has_pending_swap());
        assert!(source.take_staged().is_none());

        assert!(source.try_swap_render_buffer(RenderBuffer::default(), RenderBuffer::default()));
        assert!(source.has_pending_swap());
    }

    #[test]
    fn test_concurrent_swaps_stage_once() {
        let source = Arc::new(RenderSource::new(QuadPos::new(4, 0, 0)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    source.try_swap_render_buffer(RenderBuffer::default(), RenderBuffer::default())
                })
            })
            .collect();
        let staged = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(staged, 1);
        assert!(source.has_pending_swap());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let ctx = ctx();
        let pos = QuadPos::new(4, 0, 0);
        let mut source = RenderSource::new(pos);
        source.update(&terrain(&ctx, IVec2::ZERO), &ctx).unwrap();

        let mut bytes = Vec::new();
        source.save(&mut bytes).unwrap();
        let loaded = RenderSource::load_v1(&mut bytes.as_slice(), pos, &ctx).unwrap();
        assert_eq!(loaded.column(0, 0), source.column(0, 0));
        assert_eq!(loaded.version(), RENDER_VERSION);

        // a data file body is rejected as a render body
        let data = DataSource::new(pos);
        let mut data_bytes = Vec::new();
        data.save(&mut data_bytes).unwrap();
        assert!(RenderSource::load_v1(&mut data_bytes.as_slice(), pos, &ctx).is_err());
    }
}
