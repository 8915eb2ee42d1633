//! A single atlas: one GPU texture's worth of packed glyph regions.

use crate::packer::{AtlasPacker, PackHeuristic, SplitRule};
use crate::types::{AtlasId, AtlasKey, Rect};

/// One atlas instance: packing state plus identity. The backing texture
/// lives in the [`crate::gpu::AtlasBackend`], keyed by [`AtlasId`].
#[derive(Debug)]
pub struct AtlasInstance {
    id: AtlasId,
    key: AtlasKey,
    packer: AtlasPacker,
    glyph_count: u32,
}

impl AtlasInstance {
    pub(crate) fn new(id: AtlasId, key: AtlasKey, size: u32) -> Self {
        Self {
            id,
            key,
            packer: AtlasPacker::new(size, size),
            glyph_count: 0,
        }
    }

    pub fn id(&self) -> AtlasId {
        self.id
    }

    pub fn key(&self) -> AtlasKey {
        self.key
    }

    /// Side length in pixels (square, power of two).
    pub fn size(&self) -> u32 {
        self.packer.width()
    }

    pub fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    pub fn utilization(&self) -> f32 {
        self.packer.utilization()
    }

    pub fn fragmentation(&self) -> f32 {
        self.packer.fragmentation()
    }

    pub fn free_rect_count(&self) -> usize {
        self.packer.free_rect_count()
    }

    pub(crate) fn alloc(
        &mut self,
        w: u32,
        h: u32,
        heuristic: PackHeuristic,
        split: SplitRule,
    ) -> Option<(u32, u32)> {
        let pos = self.packer.pack(w, h, heuristic, split)?;
        self.glyph_count += 1;
        Some(pos)
    }

    pub(crate) fn release(&mut self, rect: Rect) {
        self.packer.release(rect);
        self.glyph_count = self.glyph_count.saturating_sub(1);
    }

    /// Swap in a grown packer that keeps the old square occupied.
    pub(crate) fn grow_packer(&mut self, new_size: u32) {
        self.packer = self.packer.resized_preserving(new_size);
    }

    /// Replace packing state wholesale (defragmentation handoff).
    pub(crate) fn install_packer(&mut self, packer: AtlasPacker) {
        self.packer = packer;
    }

    pub(crate) fn reset(&mut self) {
        self.packer.reset();
        self.glyph_count = 0;
    }

    pub(crate) fn packer(&self) -> &AtlasPacker {
        &self.packer
    }
}
