//! Glyph and shape caches.

pub mod glyph;
pub mod shape;

pub use glyph::{GlyphCache, GlyphCacheEntry, GlyphState, RasterPath, RequestResult};
pub use shape::{ShapeCache, ShapeEntry, ShapeKey, ShapedGlyph};

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Fixed-capacity slab of per-slot glyph states shared with the loader
/// thread.
///
/// The state byte is the only cache field the loader may write; together
/// with the upload-queue mutex it publishes the loader's metric and pixel
/// writes to the owner thread. Everything else about a slot is owned by the
/// owner thread exclusively.
pub struct StateSlab {
    states: Box<[AtomicU8]>,
}

impl StateSlab {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        let states = (0..capacity).map(|_| AtomicU8::new(GlyphState::Empty as u8)).collect();
        Arc::new(Self { states })
    }

    pub(crate) fn get(&self, slot: u32) -> GlyphState {
        let raw = self.states[slot as usize].load(Ordering::Acquire);
        GlyphState::from_u8(raw)
    }

    pub(crate) fn set(&self, slot: u32, state: GlyphState) {
        self.states[slot as usize].store(state as u8, Ordering::Release);
    }
}
