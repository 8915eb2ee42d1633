//! Virtual glyph cache: fingerprint → atlas location, metrics, and state.
//!
//! Open-addressed hash table (FNV-1a, linear probing) over a fixed
//! power-of-two slot array, threaded by an array-index LRU list. Slots are
//! reserved and evicted on the owner thread only; the loader thread's sole
//! write is the per-slot state byte in the shared [`StateSlab`].

use std::sync::Arc;

use crate::atlas::{AtlasManager, GlyphMove};
use crate::gpu::AtlasBackend;
use crate::types::{AtlasId, GlyphFingerprint, GlyphMetrics, Rect};
use crate::upload::{UploadItem, UploadQueue, pad_with_border};

use super::StateSlab;

const INVALID: u32 = u32::MAX;

/// Attempts to free atlas space through LRU eviction before an allocation
/// is declared failed.
const MAX_EVICTIONS_PER_REQUEST: u32 = 32;

/// Lifecycle of one cached glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GlyphState {
    /// Slot unused or invalidated.
    Empty = 0,
    /// Rasterization in flight (loader thread or pending compute job).
    Loading = 1,
    /// Pixels produced, waiting in the upload queue.
    Ready = 2,
    /// Region written on the GPU; safe to reference from draws submitted
    /// after the upload.
    Uploaded = 3,
}

impl GlyphState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Uploaded,
            _ => Self::Empty,
        }
    }
}

/// How a glyph's pixels reach the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterPath {
    /// CPU pixels staged through the upload queue.
    #[default]
    Staged,
    /// Compute shader writes the atlas region directly; the entry skips
    /// `Ready` and becomes `Uploaded` when the job flush resolves.
    ComputeDirect,
}

/// One live glyph: atlas placement, metrics, and bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct GlyphCacheEntry {
    pub fingerprint: GlyphFingerprint,
    pub atlas: AtlasId,
    /// Allocated rectangle including the 1 px zeroed border.
    pub rect: Rect,
    /// UV rectangle `[s0, t0, s1, t1]` over the glyph interior, inset half
    /// a texel for bilinear safety.
    pub uv: [f32; 4],
    pub metrics: GlyphMetrics,
    pub path: RasterPath,
    /// Cache generation at insert time; stale once the cache resets.
    pub generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: GlyphCacheEntry,
    atlas_size: u32,
    /// Insert/evict sequence number; stale loader results are recognized
    /// and dropped by comparing this.
    seq: u32,
    occupied: bool,
    /// A previously occupied slot keeps probe chains intact.
    tombstone: bool,
    lru_prev: u32,
    lru_next: u32,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            entry: GlyphCacheEntry {
                fingerprint: GlyphFingerprint {
                    font: crate::types::FontId(0),
                    glyph_index: 0,
                    size: 0,
                    hinting: crate::types::HintingMode::None,
                    subpixel: crate::types::SubpixelMode::Grayscale,
                    var_state_id: 0,
                    src_color_space: crate::types::ColorSpace::Srgb,
                    dst_color_space: crate::types::ColorSpace::Srgb,
                    format: crate::types::PixelFormat::R8,
                },
                atlas: AtlasId(0),
                rect: Rect::new(0, 0, 0, 0),
                uv: [0.0; 4],
                metrics: GlyphMetrics::default(),
                path: RasterPath::Staged,
                generation: 0,
            },
            atlas_size: 0,
            seq: 0,
            occupied: false,
            tombstone: false,
            lru_prev: INVALID,
            lru_next: INVALID,
        }
    }
}

/// Outcome of a cache request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    /// Already cached; slot index.
    Hit(u32),
    /// Slot reserved and atlas space allocated; the caller dispatches
    /// rasterization (loader enqueue or compute job).
    Inserted(u32),
    /// No slot or no atlas space.
    Failed,
}

/// Aggregate cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlyphCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub uploads: u64,
    pub live: u32,
}

pub struct GlyphCache {
    slots: Box<[Slot]>,
    states: Arc<StateSlab>,
    mask: u32,
    lru_head: u32,
    lru_tail: u32,
    live: u32,
    generation: u32,
    stats: GlyphCacheStats,
}

impl GlyphCache {
    /// `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            slots: vec![Slot::vacant(); capacity].into_boxed_slice(),
            states: StateSlab::new(capacity),
            mask: (capacity - 1) as u32,
            lru_head: INVALID,
            lru_tail: INVALID,
            live: 0,
            generation: 0,
            stats: GlyphCacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn stats(&self) -> GlyphCacheStats {
        GlyphCacheStats { live: self.live, ..self.stats }
    }

    pub(crate) fn states(&self) -> Arc<StateSlab> {
        Arc::clone(&self.states)
    }

    /// Current state of a slot.
    pub fn state(&self, slot: u32) -> GlyphState {
        self.states.get(slot)
    }

    /// Entry view for a slot; `None` when the slot is vacant.
    pub fn entry(&self, slot: u32) -> Option<&GlyphCacheEntry> {
        let s = &self.slots[slot as usize];
        s.occupied.then_some(&s.entry)
    }

    pub(crate) fn slot_seq(&self, slot: u32) -> u32 {
        self.slots[slot as usize].seq
    }

    /// Find a cached glyph. Every hit touches the LRU list.
    pub fn lookup(&mut self, fp: &GlyphFingerprint) -> Option<u32> {
        let slot = self.probe(fp)?;
        self.touch(slot);
        self.stats.hits += 1;
        Some(slot)
    }

    /// Look up or reserve a slot plus atlas space for `glyph_w × glyph_h`
    /// interior pixels (the 1 px border is added here). Newly inserted
    /// entries start in `Loading`.
    pub fn request(
        &mut self,
        fp: GlyphFingerprint,
        glyph_w: u32,
        glyph_h: u32,
        manager: &mut AtlasManager,
        backend: &mut dyn AtlasBackend,
    ) -> RequestResult {
        if let Some(slot) = self.probe(&fp) {
            self.touch(slot);
            self.stats.hits += 1;
            return RequestResult::Hit(slot);
        }
        self.stats.misses += 1;

        if glyph_w == 0 || glyph_h == 0 {
            return RequestResult::Failed;
        }
        let full_w = glyph_w + 2;
        let full_h = glyph_h + 2;

        let Some(slot) = self.reserve_slot(&fp, manager) else {
            return RequestResult::Failed;
        };

        // Atlas allocation, evicting least-recently-used glyphs when the
        // packer is out of room.
        let resizes_before = manager.resize_count();
        let mut alloc = manager.alloc(backend, fp.atlas_key(), full_w, full_h);
        let mut evictions = 0;
        while alloc.is_none() && evictions < MAX_EVICTIONS_PER_REQUEST && self.live > 0 {
            if !self.evict_tail(manager) {
                break;
            }
            evictions += 1;
            alloc = manager.alloc(backend, fp.atlas_key(), full_w, full_h);
        }
        let Some(alloc) = alloc else {
            log::warn!("glyph cache: atlas space exhausted for {fp:?}");
            return RequestResult::Failed;
        };

        let atlas_size = manager.get(alloc.atlas).map_or(0, |a| a.size());
        if manager.resize_count() != resizes_before {
            // The atlas grew under us: every previously computed UV for it
            // is now against the wrong denominator.
            self.refresh_uvs(alloc.atlas, atlas_size);
        }

        let rect = Rect::new(alloc.x, alloc.y, full_w, full_h);
        let s = &mut self.slots[slot as usize];
        s.entry = GlyphCacheEntry {
            fingerprint: fp,
            atlas: alloc.atlas,
            rect,
            uv: uv_rect(rect, atlas_size),
            metrics: GlyphMetrics::default(),
            path: RasterPath::Staged,
            generation: self.generation,
        };
        s.atlas_size = atlas_size;
        s.seq = s.seq.wrapping_add(1);
        s.occupied = true;
        s.tombstone = false;
        self.states.set(slot, GlyphState::Loading);
        self.live += 1;
        self.push_front(slot);
        RequestResult::Inserted(slot)
    }

    /// Insert a glyph with caller-supplied pixels (tight `w × h` rows),
    /// bypassing the loader: the entry goes straight to `Ready` and its
    /// padded pixels join the upload queue.
    pub fn add_direct(
        &mut self,
        fp: GlyphFingerprint,
        pixels: &[u8],
        glyph_w: u32,
        glyph_h: u32,
        metrics: GlyphMetrics,
        manager: &mut AtlasManager,
        backend: &mut dyn AtlasBackend,
        uploads: &UploadQueue,
    ) -> Option<u32> {
        match self.request(fp, glyph_w, glyph_h, manager, backend) {
            RequestResult::Hit(slot) => Some(slot),
            RequestResult::Failed => None,
            RequestResult::Inserted(slot) => {
                let s = &mut self.slots[slot as usize];
                s.entry.metrics = metrics;
                let item = UploadItem {
                    atlas: s.entry.atlas,
                    rect: s.entry.rect,
                    pixels: Some(pad_with_border(
                        pixels,
                        glyph_w,
                        glyph_h,
                        fp.format.bytes_per_pixel(),
                    )),
                    slot,
                    seq: s.seq,
                    metrics,
                    format: fp.format,
                };
                self.states.set(slot, GlyphState::Ready);
                if uploads.push(item) {
                    Some(slot)
                } else {
                    // Queue full: without pixels in flight the entry can
                    // never become renderable.
                    log::warn!("glyph cache: upload queue full, dropping direct insert");
                    self.fail_slot(slot, manager);
                    None
                }
            }
        }
    }

    /// Reserve a slot for the compute write-through path. The entry keeps
    /// `Loading` until the job flush resolves, then skips `Ready` entirely.
    pub fn add_gpu_direct(
        &mut self,
        fp: GlyphFingerprint,
        glyph_w: u32,
        glyph_h: u32,
        metrics: GlyphMetrics,
        manager: &mut AtlasManager,
        backend: &mut dyn AtlasBackend,
    ) -> RequestResult {
        let result = self.request(fp, glyph_w, glyph_h, manager, backend);
        if let RequestResult::Inserted(slot) = result {
            let s = &mut self.slots[slot as usize];
            s.entry.path = RasterPath::ComputeDirect;
            s.entry.metrics = metrics;
        }
        result
    }

    /// Upload drain: apply loader metrics and mark the region written.
    pub(crate) fn complete_staged(&mut self, slot: u32, metrics: GlyphMetrics) {
        let s = &mut self.slots[slot as usize];
        if !s.occupied {
            return;
        }
        s.entry.metrics = metrics;
        self.states.set(slot, GlyphState::Uploaded);
        self.stats.uploads += 1;
    }

    /// Compute flush resolved: write-through entries become `Uploaded`.
    pub(crate) fn complete_compute(&mut self, slot: u32) {
        if self.slots[slot as usize].occupied {
            self.states.set(slot, GlyphState::Uploaded);
            self.stats.uploads += 1;
        }
    }

    /// Drop a slot whose rasterization failed or whose pixels were lost,
    /// returning its rectangle to the packer.
    pub(crate) fn fail_slot(&mut self, slot: u32, manager: &mut AtlasManager) {
        let s = &mut self.slots[slot as usize];
        if !s.occupied {
            return;
        }
        let atlas = s.entry.atlas;
        let rect = s.entry.rect;
        s.occupied = false;
        s.tombstone = true;
        s.seq = s.seq.wrapping_add(1);
        self.states.set(slot, GlyphState::Empty);
        self.unlink(slot);
        self.live -= 1;
        manager.release(atlas, rect);
    }

    /// Invalidate everything and bump the generation so external
    /// references can detect staleness. Atlas-side cleanup (packer resets)
    /// is the manager's job.
    pub fn reset(&mut self) {
        for (i, s) in self.slots.iter_mut().enumerate() {
            s.occupied = false;
            s.tombstone = false;
            s.seq = s.seq.wrapping_add(1);
            s.lru_prev = INVALID;
            s.lru_next = INVALID;
            self.states.set(i as u32, GlyphState::Empty);
        }
        self.lru_head = INVALID;
        self.lru_tail = INVALID;
        self.live = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// All live rectangles in one atlas, for defrag planning.
    pub fn live_rects_in(&self, atlas: AtlasId) -> Vec<(u32, Rect)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied && s.entry.atlas == atlas)
            .map(|(i, s)| (i as u32, s.entry.rect))
            .collect()
    }

    /// Rewrite atlas coordinates after defragmentation moves.
    pub fn apply_defrag_moves(&mut self, atlas: AtlasId, moves: &[GlyphMove]) {
        for m in moves {
            let s = &mut self.slots[m.slot as usize];
            if !s.occupied || s.entry.atlas != atlas {
                continue;
            }
            s.entry.rect.x = m.dst.0;
            s.entry.rect.y = m.dst.1;
            s.entry.uv = uv_rect(s.entry.rect, s.atlas_size);
        }
    }

    fn refresh_uvs(&mut self, atlas: AtlasId, new_size: u32) {
        for s in self.slots.iter_mut() {
            if s.occupied && s.entry.atlas == atlas {
                s.atlas_size = new_size;
                s.entry.uv = uv_rect(s.entry.rect, new_size);
            }
        }
    }

    /// Linear probe for an existing fingerprint. Tombstones keep the chain
    /// alive; a never-used slot ends the search.
    fn probe(&self, fp: &GlyphFingerprint) -> Option<u32> {
        let start = fp.hash() & self.mask;
        for i in 0..=self.mask {
            let idx = (start + i) & self.mask;
            let s = &self.slots[idx as usize];
            if s.occupied {
                if s.entry.fingerprint == *fp {
                    return Some(idx);
                }
            } else if !s.tombstone {
                return None;
            }
        }
        None
    }

    /// Find a vacant slot for `fp`, evicting the LRU tail if the table is
    /// completely full.
    fn reserve_slot(&mut self, fp: &GlyphFingerprint, manager: &mut AtlasManager) -> Option<u32> {
        let start = fp.hash() & self.mask;
        for round in 0..2 {
            for i in 0..=self.mask {
                let idx = (start + i) & self.mask;
                if !self.slots[idx as usize].occupied {
                    return Some(idx);
                }
            }
            if round == 0 && !self.evict_tail(manager) {
                return None;
            }
        }
        None
    }

    fn evict_tail(&mut self, manager: &mut AtlasManager) -> bool {
        let victim = self.lru_tail;
        if victim == INVALID {
            return false;
        }
        log::trace!("glyph cache: evicting slot {victim}");
        self.stats.evictions += 1;
        self.fail_slot(victim, manager);
        true
    }

    // LRU list management: index links, head = most recent.

    fn touch(&mut self, slot: u32) {
        if self.lru_head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn unlink(&mut self, slot: u32) {
        let (prev, next) = {
            let s = &self.slots[slot as usize];
            (s.lru_prev, s.lru_next)
        };
        if prev != INVALID {
            self.slots[prev as usize].lru_next = next;
        } else if self.lru_head == slot {
            self.lru_head = next;
        }
        if next != INVALID {
            self.slots[next as usize].lru_prev = prev;
        } else if self.lru_tail == slot {
            self.lru_tail = prev;
        }
        let s = &mut self.slots[slot as usize];
        s.lru_prev = INVALID;
        s.lru_next = INVALID;
    }

    fn push_front(&mut self, slot: u32) {
        let old_head = self.lru_head;
        {
            let s = &mut self.slots[slot as usize];
            s.lru_prev = INVALID;
            s.lru_next = old_head;
        }
        if old_head != INVALID {
            self.slots[old_head as usize].lru_prev = slot;
        }
        self.lru_head = slot;
        if self.lru_tail == INVALID {
            self.lru_tail = slot;
        }
    }
}

impl crate::atlas::DefragCache for GlyphCache {
    fn live_rects(&self, atlas: AtlasId) -> Vec<(u32, Rect)> {
        self.live_rects_in(atlas)
    }

    fn apply_moves(&mut self, atlas: AtlasId, moves: &[GlyphMove]) {
        self.apply_defrag_moves(atlas, moves);
    }
}

/// UV rectangle over a glyph's interior (inside the 1 px border), inset
/// half a texel; degenerate 1 px interiors fall back to a quarter-texel
/// inset so `s0 < s1` always holds.
fn uv_rect(rect: Rect, atlas_size: u32) -> [f32; 4] {
    if atlas_size == 0 || rect.w < 2 || rect.h < 2 {
        return [0.0; 4];
    }
    let size = atlas_size as f32;
    let gx = (rect.x + 1) as f32;
    let gy = (rect.y + 1) as f32;
    let gw = (rect.w - 2) as f32;
    let gh = (rect.h - 2) as f32;
    let inset_x = (gw * 0.25).min(0.5);
    let inset_y = (gh * 0.25).min(0.5);
    [
        (gx + inset_x) / size,
        (gy + inset_y) / size,
        (gx + gw - inset_x) / size,
        (gy + gh - inset_y) / size,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtlasConfig;
    use crate::gpu::MemoryBackend;
    use crate::types::{ColorSpace, FontId, HintingMode, PixelFormat, SubpixelMode, size_q6};

    fn fp(glyph_index: u32) -> GlyphFingerprint {
        GlyphFingerprint {
            font: FontId(0),
            glyph_index,
            size: size_q6(16.0),
            hinting: HintingMode::Slight,
            subpixel: SubpixelMode::Grayscale,
            var_state_id: 0,
            src_color_space: ColorSpace::Srgb,
            dst_color_space: ColorSpace::Srgb,
            format: PixelFormat::R8,
        }
    }

    fn setup(atlas_size: u32) -> (AtlasManager, MemoryBackend) {
        (
            AtlasManager::new(AtlasConfig {
                initial_size: atlas_size,
                max_size: atlas_size,
                max_atlases: 1,
                ..AtlasConfig::default()
            }),
            MemoryBackend::new(),
        )
    }

    #[test]
    fn request_then_lookup_round_trip() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(64);
        let RequestResult::Inserted(slot) = cache.request(fp(1), 10, 12, &mut mgr, &mut backend)
        else {
            panic!("expected insert");
        };
        assert_eq!(cache.state(slot), GlyphState::Loading);
        assert_eq!(cache.lookup(&fp(1)), Some(slot));
        assert_eq!(cache.request(fp(1), 10, 12, &mut mgr, &mut backend), RequestResult::Hit(slot));
        let entry = cache.entry(slot).expect("entry");
        // Border accounted for.
        assert_eq!((entry.rect.w, entry.rect.h), (12, 14));
    }

    #[test]
    fn fingerprint_is_complete() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(256);
        let base = fp(7);
        assert!(matches!(cache.request(base, 8, 8, &mut mgr, &mut backend), RequestResult::Inserted(_)));

        let variants = [
            GlyphFingerprint { font: FontId(9), ..base },
            GlyphFingerprint { glyph_index: 8, ..base },
            GlyphFingerprint { size: size_q6(17.0), ..base },
            GlyphFingerprint { hinting: HintingMode::Full, ..base },
            GlyphFingerprint { subpixel: SubpixelMode::HorizontalRgb, ..base },
            GlyphFingerprint { var_state_id: 3, ..base },
            GlyphFingerprint { src_color_space: ColorSpace::DisplayP3, ..base },
            GlyphFingerprint { dst_color_space: ColorSpace::LinearSrgb, ..base },
            GlyphFingerprint { format: PixelFormat::Rgba8, ..base },
        ];
        for v in variants {
            assert_eq!(cache.lookup(&v), None, "lookup must miss for {v:?}");
        }
        assert!(cache.lookup(&base).is_some(), "base entry still present");
    }

    #[test]
    fn live_rects_never_overlap() {
        let (mut mgr, mut backend) = setup(512);
        let mut cache = GlyphCache::new(256);
        for i in 0..100 {
            cache.request(fp(i), 5 + i % 17, 5 + i % 11, &mut mgr, &mut backend);
        }
        let atlas = mgr.instances()[0].id();
        let rects = cache.live_rects_in(atlas);
        assert!(rects.len() > 50);
        for (i, (_, a)) in rects.iter().enumerate() {
            for (_, b) in &rects[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn uv_rect_is_inset_and_ordered() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(64);
        let RequestResult::Inserted(slot) = cache.request(fp(1), 20, 10, &mut mgr, &mut backend)
        else {
            panic!("insert");
        };
        let e = cache.entry(slot).expect("entry");
        let [s0, t0, s1, t1] = e.uv;
        assert!(s0 < s1 && t0 < t1);
        assert!(s0 > 0.0 && t0 > 0.0 && s1 < 1.0 && t1 < 1.0);
        // Half-texel inset around the interior.
        let size = 256.0;
        assert!((s0 - (e.rect.x as f32 + 1.0 + 0.5) / size).abs() < 1e-6);
        assert!((s1 - ((e.rect.x + e.rect.w - 1) as f32 - 0.5) / size).abs() < 1e-6);
    }

    #[test]
    fn lru_evicts_least_recently_touched() {
        let (mut mgr, mut backend) = setup(1024);
        // Table of exactly 4 slots; the 5th insert forces an LRU eviction.
        let mut cache = GlyphCache::new(4);
        for i in 0..4 {
            assert!(matches!(
                cache.request(fp(i), 8, 8, &mut mgr, &mut backend),
                RequestResult::Inserted(_)
            ));
        }
        // Touch 0 so 1 becomes the LRU tail.
        assert!(cache.lookup(&fp(0)).is_some());
        assert!(matches!(cache.request(fp(99), 8, 8, &mut mgr, &mut backend), RequestResult::Inserted(_)));
        assert_eq!(cache.lookup(&fp(1)), None, "least-recently-touched entry evicted");
        for keep in [0, 2, 3, 99] {
            assert!(cache.lookup(&fp(keep)).is_some(), "glyph {keep} survives");
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn atlas_pressure_evicts_and_reuses_space() {
        let (mut mgr, mut backend) = setup(64);
        let mut cache = GlyphCache::new(256);
        // 30x30 interiors → 32x32 rects; a 64x64 atlas holds 4.
        for i in 0..4 {
            assert!(matches!(
                cache.request(fp(i), 30, 30, &mut mgr, &mut backend),
                RequestResult::Inserted(_)
            ));
        }
        let result = cache.request(fp(4), 30, 30, &mut mgr, &mut backend);
        assert!(matches!(result, RequestResult::Inserted(_)), "eviction made room");
        assert!(cache.stats().evictions >= 1);
        assert_eq!(cache.lookup(&fp(0)), None, "oldest glyph gave up its space");
    }

    #[test]
    fn eviction_returns_rectangle_to_packer() {
        let (mut mgr, mut backend) = setup(64);
        let mut cache = GlyphCache::new(16);
        let RequestResult::Inserted(slot) = cache.request(fp(0), 62, 62, &mut mgr, &mut backend)
        else {
            panic!("insert");
        };
        assert_eq!(mgr.instances()[0].glyph_count(), 1);
        cache.fail_slot(slot, &mut mgr);
        assert_eq!(mgr.instances()[0].glyph_count(), 0);
        // Freed space is immediately reusable.
        assert!(matches!(cache.request(fp(1), 62, 62, &mut mgr, &mut backend), RequestResult::Inserted(_)));
    }

    #[test]
    fn tombstones_keep_probe_chains_intact() {
        let (mut mgr, mut backend) = setup(1024);
        let mut cache = GlyphCache::new(8);
        // Fill several slots, then evict one in the middle of a probe chain
        // and verify later entries are still reachable.
        for i in 0..6 {
            cache.request(fp(i), 8, 8, &mut mgr, &mut backend);
        }
        let victim = cache.lookup(&fp(2)).expect("present");
        cache.fail_slot(victim, &mut mgr);
        for i in [0, 1, 3, 4, 5] {
            assert!(cache.lookup(&fp(i)).is_some(), "glyph {i} reachable after eviction");
        }
        // The tombstoned slot is reused by a fresh insert.
        assert!(matches!(cache.request(fp(40), 8, 8, &mut mgr, &mut backend), RequestResult::Inserted(_)));
    }

    #[test]
    fn reset_bumps_generation_and_invalidates() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(64);
        cache.request(fp(0), 8, 8, &mut mgr, &mut backend);
        let gen_before = cache.generation();
        cache.reset();
        assert_eq!(cache.generation(), gen_before + 1);
        assert_eq!(cache.lookup(&fp(0)), None);
        assert_eq!(cache.stats().live, 0);
    }

    #[test]
    fn zero_dimension_requests_fail_cleanly() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(64);
        assert_eq!(cache.request(fp(0), 0, 8, &mut mgr, &mut backend), RequestResult::Failed);
        assert_eq!(cache.request(fp(0), 8, 0, &mut mgr, &mut backend), RequestResult::Failed);
        assert_eq!(mgr.atlas_count(), 0, "no atlas created for degenerate requests");
    }

    #[test]
    fn apply_moves_rewrites_rect_and_uv() {
        let (mut mgr, mut backend) = setup(256);
        let mut cache = GlyphCache::new(64);
        let RequestResult::Inserted(slot) = cache.request(fp(0), 14, 14, &mut mgr, &mut backend)
        else {
            panic!("insert");
        };
        let atlas = cache.entry(slot).expect("entry").atlas;
        let rect = cache.entry(slot).expect("entry").rect;
        let moves = [GlyphMove { slot, src: rect, dst: (100, 120) }];
        cache.apply_defrag_moves(atlas, &moves);
        let e = cache.entry(slot).expect("entry");
        assert_eq!((e.rect.x, e.rect.y), (100, 120));
        assert!((e.uv[0] - (101.0 + 0.5) / 256.0).abs() < 1e-6);
        assert!(e.uv[0] < e.uv[2] && e.uv[1] < e.uv[3]);
    }

    #[test]
    fn grow_refreshes_existing_uvs() {
        let mut mgr = AtlasManager::new(AtlasConfig {
            initial_size: 64,
            max_size: 128,
            max_atlases: 1,
            ..AtlasConfig::default()
        });
        let mut backend = MemoryBackend::new();
        let mut cache = GlyphCache::new(64);
        // Fill the 64x64 atlas completely with 30x30 interiors (32x32 rects).
        let mut first_uv = None;
        for i in 0..4 {
            if let RequestResult::Inserted(slot) = cache.request(fp(i), 30, 30, &mut mgr, &mut backend)
            {
                first_uv.get_or_insert(cache.entry(slot).expect("e").uv);
            }
        }
        // Utilization is 100%: the next request grows the atlas to 128.
        assert!(matches!(cache.request(fp(10), 30, 30, &mut mgr, &mut backend), RequestResult::Inserted(_)));
        assert_eq!(mgr.instances()[0].size(), 128);
        let slot0 = cache.lookup(&fp(0)).expect("still cached");
        let uv_after = cache.entry(slot0).expect("e").uv;
        let uv_before = first_uv.expect("recorded");
        assert!((uv_after[0] - uv_before[0] * 0.5).abs() < 1e-6, "UVs rescaled to the grown atlas");
    }
}
