//! Bit-packed terrain span
//!
//! Layout of the 64-bit word (least significant bit first):
//!
//! | field | offset | width |
//! |-------|--------|-------|
//! | id    | 0      | 32    |
//! | depth | 32     | 12    |
//! | y     | 44     | 12    |
//! | light | 56     | 8     |
//!
//! The id field is 32 bits wide but only the low 31 bits are usable.

use bytemuck::{Pod, Zeroable};

use crate::core::error::{LodError, Result};

/// Exclusive ceiling for `y + depth`, relative to the world's minimum height
pub const MAX_Y: u32 = 4096;

pub const ID_WIDTH: u32 = 32;
pub const DEPTH_WIDTH: u32 = 12;
pub const Y_WIDTH: u32 = 12;
pub const LIGHT_WIDTH: u32 = 8;

pub const ID_OFFSET: u32 = 0;
pub const DEPTH_OFFSET: u32 = ID_OFFSET + ID_WIDTH;
pub const Y_OFFSET: u32 = DEPTH_OFFSET + DEPTH_WIDTH;
pub const LIGHT_OFFSET: u32 = Y_OFFSET + Y_WIDTH;

/// Usable id bits, one narrower than `ID_WIDTH`
pub const ID_MASK: u64 = 0x7FFF_FFFF;
pub const DEPTH_MASK: u64 = (1 << DEPTH_WIDTH) - 1;
pub const Y_MASK: u64 = (1 << Y_WIDTH) - 1;
pub const LIGHT_MASK: u64 = (1 << LIGHT_WIDTH) - 1;

const ID_CLEAR: u64 = !(((1u64 << ID_WIDTH) - 1) << ID_OFFSET);

/// Decoded form of a [`Datapoint`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DecodedDatapoint {
    pub id: u32,
    pub depth: u32,
    pub y: u32,
    pub light: u8,
}

/// One vertical span of terrain, packed into a single word
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Datapoint(pub u64);

impl Datapoint {
    /// Pack a span, rejecting out-of-range fields
    pub fn encode(id: u32, depth: u32, y: u32, light: u8) -> Result<Self> {
        if id as u64 > ID_MASK {
            return Err(LodError::EncodingRange {
                field: "id",
                value: id as i64,
                reason: "exceeds 31 usable bits",
            });
        }
        validate_span(y as i64, depth as i64)?;

        Ok(Self(
            ((id as u64 & ID_MASK) << ID_OFFSET)
                | ((depth as u64 & DEPTH_MASK) << DEPTH_OFFSET)
                | ((y as u64 & Y_MASK) << Y_OFFSET)
                | ((light as u64 & LIGHT_MASK) << LIGHT_OFFSET),
        ))
    }

    /// Unpack all four fields
    pub fn decode(self) -> DecodedDatapoint {
        DecodedDatapoint {
            id: self.id(),
            depth: self.depth(),
            y: self.y(),
            light: self.light(),
        }
    }

    #[inline]
    pub fn id(self) -> u32 {
        ((self.0 >> ID_OFFSET) & ID_MASK) as u32
    }

    #[inline]
    pub fn depth(self) -> u32 {
        ((self.0 >> DEPTH_OFFSET) & DEPTH_MASK) as u32
    }

    #[inline]
    pub fn y(self) -> u32 {
        ((self.0 >> Y_OFFSET) & Y_MASK) as u32
    }

    #[inline]
    pub fn light(self) -> u8 {
        ((self.0 >> LIGHT_OFFSET) & LIGHT_MASK) as u8
    }

    /// Exclusive top of the span
    #[inline]
    pub fn top(self) -> u32 {
        self.y() + self.depth()
    }

    pub fn block_light(self) -> u8 {
        self.light() >> 4
    }

    pub fn sky_light(self) -> u8 {
        self.light() & 0x0F
    }

    /// Replace the id bits through `table`, leaving depth, y and light untouched
    #[inline]
    pub fn remap(self, table: &[u32]) -> Result<Self> {
        let old = self.id();
        let new = *table.get(old as usize).ok_or_else(|| LodError::EncodingRange {
            field: "id",
            value: old as i64,
            reason: "missing from remap table",
        })?;
        if new as u64 > ID_MASK {
            return Err(LodError::EncodingRange {
                field: "id",
                value: new as i64,
                reason: "remapped id exceeds 31 usable bits",
            });
        }
        Ok(Self((self.0 & ID_CLEAR) | ((new as u64) << ID_OFFSET)))
    }

    /// Same id and light over a different vertical span
    pub fn with_span(self, y: u32, depth: u32) -> Result<Self> {
        Self::encode(self.id(), depth, y, self.light())
    }
}

/// Pack block and sky light (0-15 each) into the light byte
pub fn pack_light(block_light: u8, sky_light: u8) -> u8 {
    ((block_light & 0x0F) << 4) | (sky_light & 0x0F)
}

/// Shared span bounds check for every column word format
pub(crate) fn validate_span(y: i64, depth: i64) -> Result<()> {
    let max = MAX_Y as i64;
    if y < 0 || y >= max {
        return Err(LodError::EncodingRange {
            field: "y",
            value: y,
            reason: "outside 0..MAX_Y",
        });
    }
    if depth <= 0 || depth >= max {
        return Err(LodError::EncodingRange {
            field: "depth",
            value: depth,
            reason: "outside 1..MAX_Y",
        });
    }
    if y + depth > max {
        return Err(LodError::EncodingRange {
            field: "y + depth",
            value: y + depth,
            reason: "exceeds MAX_Y",
        });
    }
    Ok(())
}
