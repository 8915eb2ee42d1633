//! Keyed multi-atlas management: allocation, growth, and lookup across a
//! bounded set of atlas instances.
//!
//! Atlases are partitioned by [`AtlasKey`] so pixels with different color
//! spaces, formats, or subpixel modes never share a texture. When a key's
//! atlas fills up the manager grows it in place (utilization permitting) or
//! allocates a sibling atlas under the same key.

use crate::config::AtlasConfig;
use crate::gpu::AtlasBackend;
use crate::types::{AtlasId, AtlasKey, Rect};

use super::instance::AtlasInstance;

/// Result of a successful atlas allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasAllocation {
    pub atlas: AtlasId,
    pub x: u32,
    pub y: u32,
}

/// Ordered collection of atlas instances with per-key allocation.
pub struct AtlasManager {
    atlases: Vec<AtlasInstance>,
    next_id: u32,
    config: AtlasConfig,
    total_allocations: u64,
    failed_allocations: u64,
    resize_count: u32,
    last_resize: Option<(AtlasId, u32)>,
}

impl AtlasManager {
    pub fn new(mut config: AtlasConfig) -> Self {
        // Keep the size ladder well-formed even for odd configurations.
        config.max_size = config.max_size.max(1);
        config.initial_size = config.initial_size.clamp(1, config.max_size);
        Self {
            atlases: Vec::new(),
            next_id: 0,
            config,
            total_allocations: 0,
            failed_allocations: 0,
            resize_count: 0,
            last_resize: None,
        }
    }

    /// Allocate a `w × h` region in an atlas matching `key`.
    ///
    /// Tries, in order: existing atlases for the key, growing the fullest
    /// matching atlas (when utilization has crossed the resize threshold
    /// and the atlas is below its size ceiling), then a sibling atlas under
    /// the same key. Returns `None` when every path is exhausted.
    pub fn alloc(
        &mut self,
        backend: &mut dyn AtlasBackend,
        key: AtlasKey,
        w: u32,
        h: u32,
    ) -> Option<AtlasAllocation> {
        if w == 0 || h == 0 || w > self.config.max_size || h > self.config.max_size {
            return None;
        }

        let heuristic = self.config.heuristic;
        let split = self.config.split_rule;

        // Existing atlases for this key, in creation order.
        for atlas in self.atlases.iter_mut().filter(|a| a.key() == key) {
            if let Some((x, y)) = atlas.alloc(w, h, heuristic, split) {
                self.total_allocations += 1;
                return Some(AtlasAllocation { atlas: atlas.id(), x, y });
            }
        }

        // Grow a matching atlas in place when it is genuinely full rather
        // than fragmented.
        let grow_candidate = self
            .atlases
            .iter()
            .filter(|a| {
                a.key() == key
                    && a.size() < self.config.max_size
                    && a.utilization() >= self.config.resize_threshold
            })
            .map(AtlasInstance::id)
            .next();
        if let Some(id) = grow_candidate {
            if self.grow(backend, id) {
                let atlas = self.get_mut(id).expect("grown atlas exists");
                if let Some((x, y)) = atlas.alloc(w, h, heuristic, split) {
                    self.total_allocations += 1;
                    return Some(AtlasAllocation { atlas: id, x, y });
                }
            }
        }

        // Sibling atlas under the same key.
        if let Some(id) = self.create_atlas(backend, key, w.max(h)) {
            let atlas = self.get_mut(id).expect("created atlas exists");
            if let Some((x, y)) = atlas.alloc(w, h, heuristic, split) {
                self.total_allocations += 1;
                return Some(AtlasAllocation { atlas: id, x, y });
            }
        }

        self.failed_allocations += 1;
        log::warn!("atlas manager: allocation {w}x{h} failed for {key:?}");
        None
    }

    /// First atlas matching `key`, if any. Lookup only — never allocates.
    pub fn atlas_by_key(&self, key: AtlasKey) -> Option<&AtlasInstance> {
        self.atlases.iter().find(|a| a.key() == key)
    }

    pub fn get(&self, id: AtlasId) -> Option<&AtlasInstance> {
        self.atlases.iter().find(|a| a.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: AtlasId) -> Option<&mut AtlasInstance> {
        self.atlases.iter_mut().find(|a| a.id() == id)
    }

    pub fn instances(&self) -> &[AtlasInstance] {
        &self.atlases
    }

    /// Return a region to its atlas (cache eviction path).
    pub fn release(&mut self, id: AtlasId, rect: Rect) {
        if let Some(atlas) = self.get_mut(id) {
            atlas.release(rect);
        }
    }

    /// Double an atlas up to the configured ceiling, preserving content.
    pub fn grow(&mut self, backend: &mut dyn AtlasBackend, id: AtlasId) -> bool {
        let Some(atlas) = self.get_mut(id) else {
            return false;
        };
        let old_size = atlas.size();
        if old_size >= self.config.max_size {
            return false;
        }
        let new_size = (old_size * 2).min(self.config.max_size);
        if !backend.resize_texture(id, new_size) {
            log::warn!("atlas manager: backend refused resize of atlas {} to {new_size}", id.0);
            return false;
        }
        let atlas = self.get_mut(id).expect("atlas still present");
        atlas.grow_packer(new_size);
        self.resize_count += 1;
        self.last_resize = Some((id, new_size));
        log::debug!("atlas manager: grew atlas {} from {old_size} to {new_size}", id.0);
        true
    }

    /// Destroy all atlases; the next allocation starts from scratch.
    pub fn reset(&mut self, backend: &mut dyn AtlasBackend) {
        for atlas in &self.atlases {
            backend.destroy_texture(atlas.id());
        }
        self.atlases.clear();
    }

    /// Allocation efficiency across every atlas, in `[0, 1]`.
    pub fn efficiency(&self) -> f32 {
        let mut allocated = 0u64;
        let mut capacity = 0u64;
        for a in &self.atlases {
            allocated += a.packer().allocated_area();
            capacity += u64::from(a.size()) * u64::from(a.size());
        }
        if capacity == 0 {
            return 0.0;
        }
        allocated as f32 / capacity as f32
    }

    pub fn atlas_count(&self) -> usize {
        self.atlases.len()
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn failed_allocations(&self) -> u64 {
        self.failed_allocations
    }

    pub fn resize_count(&self) -> u32 {
        self.resize_count
    }

    /// The most recent growth event, consumed by the grow callback.
    pub(crate) fn take_last_resize(&mut self) -> Option<(AtlasId, u32)> {
        self.last_resize.take()
    }

    /// Create an atlas sized to hold at least `min_dim`, bounded by the
    /// configured limits. Fails at the instance cap or on backend refusal.
    fn create_atlas(
        &mut self,
        backend: &mut dyn AtlasBackend,
        key: AtlasKey,
        min_dim: u32,
    ) -> Option<AtlasId> {
        if self.atlases.len() >= self.config.max_atlases {
            return None;
        }
        let size = min_dim
            .next_power_of_two()
            .clamp(self.config.initial_size, self.config.max_size);
        let id = AtlasId(self.next_id);
        if !backend.create_texture(id, size, key.format) {
            log::warn!("atlas manager: texture creation failed for {key:?}");
            return None;
        }
        self.next_id += 1;
        self.atlases.push(AtlasInstance::new(id, key, size));
        log::debug!("atlas manager: created atlas {} ({size}x{size}, {key:?})", id.0);
        Some(id)
    }
}
