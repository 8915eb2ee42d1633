//! Idle-frame atlas defragmentation.
//!
//! Watches per-atlas fragmentation and, when an atlas has scattered into
//! many small free rectangles, replans every live glyph into a scratch
//! packer and relocates the ones whose position changed. Work is budgeted:
//! each frame advances the state machine by at most one tick, and move
//! execution stops at a safe point when the time budget runs out.

use std::time::Instant;

use crate::config::DefragConfig;
use crate::gpu::AtlasBackend;
use crate::packer::AtlasPacker;
use crate::types::{AtlasId, Rect};

use super::instance::AtlasInstance;
use super::manager::AtlasManager;

/// One planned glyph relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphMove {
    /// Cache slot of the glyph being moved.
    pub slot: u32,
    /// Current rectangle (position and dimensions).
    pub src: Rect,
    /// New top-left position; dimensions are unchanged.
    pub dst: (u32, u32),
}

/// Cache-side callbacks the engine needs while planning and finishing.
pub trait DefragCache {
    /// Every live rectangle in the given atlas, as `(slot, rect)` pairs.
    fn live_rects(&self, atlas: AtlasId) -> Vec<(u32, Rect)>;

    /// Rewrite atlas coordinates after the listed moves completed.
    fn apply_moves(&mut self, atlas: AtlasId, moves: &[GlyphMove]);
}

/// Defragmentation progress for one atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefragState {
    #[default]
    Idle,
    Analyzing,
    Planning,
    Executing,
    Complete,
}

/// Per-atlas compaction engine driven by one tick per frame.
pub struct DefragEngine {
    config: DefragConfig,
    state: DefragState,
    atlas: Option<AtlasId>,
    moves: Vec<GlyphMove>,
    next_move: usize,
    scratch: Option<AtlasPacker>,
    pass_open: bool,
    total_moves: u64,
    bytes_copied: u64,
}

impl DefragEngine {
    pub fn new(config: DefragConfig) -> Self {
        Self {
            config,
            state: DefragState::Idle,
            atlas: None,
            moves: Vec::new(),
            next_move: 0,
            scratch: None,
            pass_open: false,
            total_moves: 0,
            bytes_copied: 0,
        }
    }

    pub fn state(&self) -> DefragState {
        self.state
    }

    pub fn total_moves(&self) -> u64 {
        self.total_moves
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    /// Whether an atlas is fragmented enough to be worth compacting.
    pub fn should_defragment(&self, atlas: &AtlasInstance) -> bool {
        atlas.free_rect_count() > self.config.min_free_rects
            && atlas.fragmentation() > self.config.threshold
            && atlas.utilization() < 0.9
    }

    /// Advance the state machine by one frame tick.
    ///
    /// `idle` signals whether the caller has spare frame time; when `false`
    /// the engine holds its current step and resumes next frame. Returns
    /// the state after the tick.
    pub fn tick(
        &mut self,
        manager: &mut AtlasManager,
        backend: &mut dyn AtlasBackend,
        cache: &mut dyn DefragCache,
        idle: bool,
    ) -> DefragState {
        if !self.config.enabled || !idle {
            return self.state;
        }

        match self.state {
            DefragState::Idle => {
                self.state = DefragState::Analyzing;
            }
            DefragState::Analyzing => self.analyze(manager),
            DefragState::Planning => self.plan(manager, cache),
            DefragState::Executing => self.execute(manager, backend),
            DefragState::Complete => self.complete(manager, backend, cache),
        }
        self.state
    }

    fn analyze(&mut self, manager: &AtlasManager) {
        let candidate = manager
            .instances()
            .iter()
            .find(|a| self.should_defragment(a))
            .map(AtlasInstance::id);
        match candidate {
            Some(id) => {
                log::debug!("defrag: atlas {} selected for compaction", id.0);
                self.atlas = Some(id);
                self.state = DefragState::Planning;
            }
            None => self.state = DefragState::Idle,
        }
    }

    fn plan(&mut self, manager: &AtlasManager, cache: &dyn DefragCache) {
        let Some(id) = self.atlas else {
            self.state = DefragState::Idle;
            return;
        };
        let Some(atlas) = manager.get(id) else {
            self.abort();
            return;
        };

        let mut live = cache.live_rects(id);
        // Tallest-first packing gives the scratch layout stable rows.
        live.sort_by(|a, b| (b.1.h, b.1.w).cmp(&(a.1.h, a.1.w)).then(a.0.cmp(&b.0)));

        let mut scratch = AtlasPacker::new(atlas.size(), atlas.size());
        self.moves.clear();
        self.next_move = 0;

        for (slot, rect) in live {
            let Some((x, y)) = scratch.pack(
                rect.w,
                rect.h,
                crate::packer::PackHeuristic::BottomLeft,
                crate::packer::SplitRule::ShorterAxis,
            ) else {
                // Replan failed to fit: leave the layout alone.
                log::warn!("defrag: replan of atlas {} does not converge, aborting", id.0);
                self.abort();
                return;
            };
            if (x, y) != (rect.x, rect.y) {
                if self.moves.len() >= self.config.max_moves {
                    // Plan exceeds the per-pass cap; a partial plan would
                    // desynchronize the scratch packer from reality.
                    log::debug!("defrag: atlas {} needs more than {} moves, deferring", id.0, self.config.max_moves);
                    self.abort();
                    return;
                }
                self.moves.push(GlyphMove { slot, src: rect, dst: (x, y) });
            }
        }

        if self.moves.is_empty() {
            // Already compact.
            self.abort();
            return;
        }
        self.scratch = Some(scratch);
        self.state = DefragState::Executing;
    }

    fn execute(&mut self, manager: &AtlasManager, backend: &mut dyn AtlasBackend) {
        let Some(id) = self.atlas else {
            self.abort();
            return;
        };
        let bpp = manager
            .get(id)
            .map_or(1, |a| a.key().format.bytes_per_pixel());

        if !self.pass_open {
            backend.begin_move_pass(id);
            self.pass_open = true;
        }

        let started = Instant::now();
        let budget_ms = self.config.time_budget_ms;
        while self.next_move < self.moves.len() {
            let m = self.moves[self.next_move];
            backend.move_region(id, (m.src.x, m.src.y), m.dst, (m.src.w, m.src.h));
            self.next_move += 1;
            self.total_moves += 1;
            self.bytes_copied += m.src.area() * u64::from(bpp);

            if started.elapsed().as_secs_f32() * 1000.0 >= budget_ms {
                // Budget spent; resume between moves next frame.
                return;
            }
        }
        self.state = DefragState::Complete;
    }

    fn complete(
        &mut self,
        manager: &mut AtlasManager,
        backend: &mut dyn AtlasBackend,
        cache: &mut dyn DefragCache,
    ) {
        let Some(id) = self.atlas else {
            self.abort();
            return;
        };
        backend.end_move_pass(id);
        self.pass_open = false;
        cache.apply_moves(id, &self.moves);
        if let (Some(atlas), Some(scratch)) = (manager.get_mut(id), self.scratch.take()) {
            atlas.install_packer(scratch);
        }
        log::debug!("defrag: atlas {} compacted with {} moves", id.0, self.moves.len());
        self.moves.clear();
        self.next_move = 0;
        self.atlas = None;
        self.state = DefragState::Idle;
    }

    fn abort(&mut self) {
        self.moves.clear();
        self.next_move = 0;
        self.scratch = None;
        self.atlas = None;
        self.pass_open = false;
        self.state = DefragState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtlasConfig;
    use crate::gpu::MemoryBackend;
    use crate::types::AtlasKey;

    /// Minimal stand-in for the glyph cache's defrag hooks.
    struct RectTable {
        atlas: AtlasId,
        rects: Vec<(u32, Rect)>,
        applied: Vec<GlyphMove>,
    }

    impl DefragCache for RectTable {
        fn live_rects(&self, atlas: AtlasId) -> Vec<(u32, Rect)> {
            if atlas == self.atlas { self.rects.clone() } else { Vec::new() }
        }

        fn apply_moves(&mut self, _atlas: AtlasId, moves: &[GlyphMove]) {
            self.applied.extend_from_slice(moves);
            for m in moves {
                let entry = self
                    .rects
                    .iter_mut()
                    .find(|(slot, _)| *slot == m.slot)
                    .expect("moved slot exists");
                entry.1.x = m.dst.0;
                entry.1.y = m.dst.1;
            }
        }
    }

    fn fragmented_setup() -> (AtlasManager, MemoryBackend, RectTable) {
        let mut backend = MemoryBackend::new();
        let mut mgr = AtlasManager::new(AtlasConfig {
            initial_size: 256,
            max_size: 256,
            max_atlases: 1,
            ..AtlasConfig::default()
        });
        let mut rects = Vec::new();
        // Allocate alternating sizes, then release every other one to
        // scatter the free list.
        let mut allocs = Vec::new();
        for i in 0..120 {
            let (w, h) = if i % 2 == 0 { (20, 20) } else { (11, 13) };
            if let Some(a) = mgr.alloc(&mut backend, AtlasKey::default(), w, h) {
                allocs.push((i as u32, Rect::new(a.x, a.y, w, h), a.atlas));
            }
        }
        let atlas = allocs[0].2;
        for (slot, rect, _) in allocs {
            if slot % 2 == 1 {
                mgr.release(atlas, rect);
            } else {
                // Paint each surviving glyph with a recognizable byte.
                let fill = vec![(slot % 200 + 1) as u8; (rect.w * rect.h) as usize];
                backend.upload(atlas, rect, &fill);
                rects.push((slot, rect));
            }
        }
        (mgr, backend, RectTable { atlas, rects, applied: Vec::new() })
    }

    #[test]
    fn trigger_requires_all_three_conditions() {
        let engine = DefragEngine::new(DefragConfig::default());
        let mut backend = MemoryBackend::new();
        let mut mgr = AtlasManager::new(AtlasConfig {
            initial_size: 256,
            max_size: 256,
            ..AtlasConfig::default()
        });
        mgr.alloc(&mut backend, AtlasKey::default(), 16, 16);
        // Fresh atlas: few free rects, low fragmentation.
        assert!(!engine.should_defragment(&mgr.instances()[0]));

        let (mgr, _backend, _table) = fragmented_setup();
        let atlas = &mgr.instances()[0];
        assert!(atlas.free_rect_count() > 50, "setup produced {} free rects", atlas.free_rect_count());
        assert!(atlas.fragmentation() > 0.3, "fragmentation {}", atlas.fragmentation());
        assert!(atlas.utilization() < 0.9);
        assert!(engine.should_defragment(atlas));
    }

    #[test]
    fn full_pass_moves_pixels_and_updates_cache() {
        let (mut mgr, mut backend, mut table) = fragmented_setup();
        let atlas = table.atlas;
        let mut engine = DefragEngine::new(DefragConfig {
            time_budget_ms: 1000.0,
            ..DefragConfig::default()
        });

        // Capture pre-move pixels per slot.
        let before: Vec<(u32, Vec<u8>)> = table
            .rects
            .iter()
            .map(|(slot, rect)| (*slot, backend.read_region(atlas, *rect)))
            .collect();
        let free_rects_before = mgr.instances()[0].free_rect_count();

        // Drive the machine to completion.
        for _ in 0..64 {
            engine.tick(&mut mgr, &mut backend, &mut table, true);
            if engine.state() == DefragState::Idle && !table.applied.is_empty() {
                break;
            }
        }
        assert!(!table.applied.is_empty(), "compaction produced moves");
        assert_eq!(engine.state(), DefragState::Idle);

        // Every moved glyph's pixels survived relocation, and the cache now
        // points at the new rectangles.
        for (slot, pixels) in before {
            let (_, rect) = table.rects.iter().find(|(s, _)| *s == slot).expect("slot");
            assert_eq!(
                backend.read_region(atlas, *rect),
                pixels,
                "slot {slot} pixels after move"
            );
        }
        // Scatter dropped after install of the replanned packer.
        assert!(mgr.instances()[0].free_rect_count() < free_rects_before);
        assert!(engine.total_moves() > 0);
        assert!(engine.bytes_copied() > 0);
    }

    #[test]
    fn no_idle_time_freezes_the_machine() {
        let (mut mgr, mut backend, mut table) = fragmented_setup();
        let mut engine = DefragEngine::new(DefragConfig::default());
        engine.tick(&mut mgr, &mut backend, &mut table, true);
        assert_eq!(engine.state(), DefragState::Analyzing);
        let frozen = engine.tick(&mut mgr, &mut backend, &mut table, false);
        assert_eq!(frozen, DefragState::Analyzing, "no progress without idle time");
    }

    #[test]
    fn disabled_engine_never_leaves_idle() {
        let (mut mgr, mut backend, mut table) = fragmented_setup();
        let mut engine = DefragEngine::new(DefragConfig {
            enabled: false,
            ..DefragConfig::default()
        });
        for _ in 0..8 {
            assert_eq!(engine.tick(&mut mgr, &mut backend, &mut table, true), DefragState::Idle);
        }
    }

    #[test]
    fn oversized_plan_defers() {
        let (mut mgr, mut backend, mut table) = fragmented_setup();
        let mut engine = DefragEngine::new(DefragConfig {
            max_moves: 1,
            ..DefragConfig::default()
        });
        engine.tick(&mut mgr, &mut backend, &mut table, true); // Idle → Analyzing
        engine.tick(&mut mgr, &mut backend, &mut table, true); // Analyzing → Planning
        engine.tick(&mut mgr, &mut backend, &mut table, true); // Planning aborts
        assert_eq!(engine.state(), DefragState::Idle);
        assert!(table.applied.is_empty(), "no moves executed for a deferred plan");
    }
}
