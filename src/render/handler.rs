//! Per-section buffer slots shared with the renderer
//!
//! A slot only ever holds a whole [`BufferPair`], so readers never see the
//! opaque buffer of one build next to the transparent buffer of another.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::math::QuadPos;
use crate::source::{BufferPair, LodSource, RenderSource};

/// Receives buffers the engine no longer shows
///
/// The handler never frees geometry itself; the sink owns disposal.
pub trait RenderSink: Send + Sync {
    /// `previous` was replaced by a new pair for `pos`
    fn on_swap(&self, pos: QuadPos, previous: Option<Arc<BufferPair>>);

    /// `pos` left the view; `previous` was its last pair
    fn on_unload(&self, pos: QuadPos, previous: Option<Arc<BufferPair>>);
}

/// Sink that drops everything it is given
#[derive(Debug, Default)]
pub struct DiscardSink;

impl RenderSink for DiscardSink {
    fn on_swap(&self, _pos: QuadPos, _previous: Option<Arc<BufferPair>>) {}

    fn on_unload(&self, _pos: QuadPos, _previous: Option<Arc<BufferPair>>) {}
}

/// Result of completing a staged swap
#[derive(Debug)]
pub struct Swapped {
    pub pos: QuadPos,
    /// Pair that was visible before the swap
    pub previous: Option<Arc<BufferPair>>,
}

/// Current geometry of one section
#[derive(Debug, Default)]
pub struct RenderBufferSlot {
    pair: RwLock<Option<Arc<BufferPair>>>,
}

impl RenderBufferSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both buffers under one write lock
    pub fn swap(&self, pair: BufferPair) -> Option<Arc<BufferPair>> {
        let mut slot = self.pair.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(Arc::new(pair))
    }

    pub fn current(&self) -> Option<Arc<BufferPair>> {
        self.pair.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Option<Arc<BufferPair>> {
        self.pair.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// All visible sections
#[derive(Debug, Default)]
pub struct RenderBufferHandler {
    slots: RwLock<HashMap<QuadPos, Arc<RenderBufferSlot>>>,
}

impl RenderBufferHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, pos: QuadPos) -> Arc<RenderBufferSlot> {
        if let Some(slot) = self.slots.read().unwrap_or_else(PoisonError::into_inner).get(&pos) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(pos).or_default())
    }

    /// Install `pair` for `pos`, returning the pair it replaces
    pub fn swap_in(&self, pos: QuadPos, pair: BufferPair) -> Option<Arc<BufferPair>> {
        let previous = self.slot(pos).swap(pair);
        log::debug!("Swapped render buffers for {}", pos);
        previous
    }

    /// Move the pair staged on `source` into its slot
    ///
    /// Returns `None` when nothing was staged. The previous pair, if any, is
    /// handed back inside [`Swapped`] for the caller to dispose.
    pub fn apply_pending_swap(&self, source: &RenderSource) -> Option<Swapped> {
        let pair = source.take_staged()?;
        let pos = source.pos();
        let previous = self.swap_in(pos, pair);
        Some(Swapped { pos, previous })
    }

    pub fn current(&self, pos: QuadPos) -> Option<Arc<BufferPair>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&pos).and_then(|slot| slot.current())
    }

    /// Drop the slot of `pos` and hand back its last pair
    pub fn remove(&self, pos: QuadPos) -> Option<Arc<BufferPair>> {
        let slot = self.slots.write().unwrap_or_else(PoisonError::into_inner).remove(&pos)?;
        slot.take()
    }

    /// Sections that currently have a slot
    pub fn sections(&self) -> Vec<QuadPos> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<QuadPos> = slots.keys().copied().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
