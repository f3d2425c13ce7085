//! Authoritative raw terrain columns of one section

use std::io::{Read, Write};

use glam::IVec2;

use super::archive::SectionArchive;
use super::{
    column_index, Lifecycle, LodSource, SourceContext, SourceKind, SourceLoader, TerrainChunk,
    SECTION_COLUMNS, SECTION_DETAIL_OFFSET, SECTION_WIDTH,
};
use crate::column::{merge_column, Datapoint, IdTable, MaterialKey};
use crate::core::error::{LodError, Result};
use crate::math::QuadPos;

/// On-disk version of data sources written by this build
pub const DATA_VERSION: u8 = 1;

/// Raw columns, one per `2^(detail - 4)` blocks
///
/// Columns are row-major by `(z, x)`, each ordered top to bottom.
pub struct DataSource {
    pos: QuadPos,
    version: u8,
    palette: IdTable,
    columns: Vec<Vec<Datapoint>>,
    lifecycle: Lifecycle,
}

impl DataSource {
    /// Empty section
    pub fn new(pos: QuadPos) -> Self {
        Self {
            pos,
            version: DATA_VERSION,
            palette: IdTable::new(),
            columns: vec![Vec::new(); SECTION_COLUMNS],
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn palette(&self) -> &IdTable {
        &self.palette
    }

    /// Column at `(x, z)` in section-local column coordinates
    pub fn column(&self, x: usize, z: usize) -> &[Datapoint] {
        &self.columns[column_index(x, z)]
    }

    /// All columns, row-major by `(z, x)`
    pub fn columns(&self) -> &[Vec<Datapoint>] {
        &self.columns
    }

    /// Width of one column in blocks
    pub fn column_width(&self) -> i32 {
        1 << (self.pos.detail - SECTION_DETAIL_OFFSET)
    }

    /// Material of a datapoint
    pub fn material(&self, point: Datapoint) -> Option<&MaterialKey> {
        self.palette.get(point.id())
    }

    /// True if no column holds any span
    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Vec::is_empty)
    }

    /// Load a version 1 body
    pub fn load_v1(input: &mut dyn Read, pos: QuadPos, _ctx: &SourceContext) -> Result<Self> {
        let archive = SectionArchive::read_from(input, SourceKind::Data, pos)?;
        let palette = IdTable::from_keys(&archive.palette);
        let mut columns = Vec::with_capacity(SECTION_COLUMNS);
        for words in archive.columns() {
            let column: Vec<Datapoint> = words.iter().map(|&w| Datapoint(w)).collect();
            if let Some(bad) = column.iter().find(|dp| dp.id() as usize >= palette.len()) {
                return Err(LodError::corrupt("", format!("datapoint id {} outside palette", bad.id())));
            }
            columns.push(column);
        }
        Ok(Self {
            pos,
            version: archive.version,
            palette,
            columns,
            lifecycle: Lifecycle::new(),
        })
    }
}

impl LodSource for DataSource {
    const KIND: SourceKind = SourceKind::Data;
    const CURRENT_VERSION: u8 = DATA_VERSION;

    fn create_empty(pos: QuadPos, _ctx: &SourceContext) -> Self {
        Self::new(pos)
    }

    fn current_loader() -> SourceLoader<Self> {
        DataSource::load_v1
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

        // merge into staging copies so a rejected span leaves the source untouched
        let mut palette = self.palette.clone();
        let table = chunk.palette().remap_table_into(&mut palette);
        let cw = self.column_width();
        let origin = section.min;
        let mut staged = Vec::new();

        for cz in 0..SECTION_WIDTH {
            for cx in 0..SECTION_WIDTH {
                // each column samples the block at its minimum corner
                let sample = origin + IVec2::new(cx as i32 * cw, cz as i32 * cw);
                if !footprint.contains_block(sample) {
                    continue;
                }
                let local = sample - footprint.min;
                let mut incoming = Vec::new();
                for span in chunk.spans(local.x as usize, local.y as usize) {
                    let y = span.y as i64 - ctx.level.min_y as i64;
                    if y < 0 {
                        return Err(LodError::EncodingRange {
                            field: "y",
                            value: y,
                            reason: "below level minimum",
                        });
                    }
                    let point = Datapoint::encode(span.id, span.depth, y as u32, span.light)?;
                    incoming.push(point.remap(&table)?);
                }

                let index = column_index(cx, cz);
                let merged = merge_column(&self.columns[index], lo, hi, &incoming)?;
                if merged != self.columns[index] {
                    staged.push((index, merged));
                }
            }
        }

        if staged.is_empty() {
            return Ok(false);
        }
        self.palette = palette;
        for (index, column) in staged {
            self.columns[index] = column;
        }
        self.lifecycle.mark_dirty();
        Ok(true)
    }

    fn save(&self, out: &mut dyn Write) -> Result<()> {
        self.lifecycle.ensure_live(self.pos)?;
        let palette = self.palette.keys().iter().map(|k| k.as_str().to_string()).collect();
        let archive = SectionArchive::from_columns(
            SourceKind::Data,
            DATA_VERSION,
            self.pos,
            palette,
            self.columns.iter().map(|c| bytemuck::cast_slice::<Datapoint, u64>(c)),
        )?;
        archive.write_to(out)
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}
