//! The `FontSystem` facade: render state, lifecycle, and the per-frame
//! pump that ties the caches, loader, upload pipeline, and defragmenter
//! together.
//!
//! Two threads exist by construction: the owner thread (everything here)
//! and the single loader worker. Capacity failures are silent and local;
//! only lifecycle failures surface to the caller. A fatal background
//! failure flips the `poisoned` flag, after which every operation is a
//! no-op.

use std::sync::Arc;

use crate::atlas::{AtlasManager, DefragEngine, DefragState};
use crate::cache::shape::FeatureSetting;
use crate::cache::{GlyphCache, RequestResult, ShapeCache, ShapeKey};
use crate::config::{RasterMode, SystemConfig};
use crate::font::{FontCollection, LineMetrics, SwashRasterizer};
use crate::gpu::outline::extract_outline;
use crate::gpu::raster::GpuRasterJob;
use crate::gpu::{AtlasBackend, GpuRasterizer, MemoryBackend, WgpuBackend};
use crate::iter::{CachedGlyph, IterRun, IterStyle, TextBounds, TextIter};
use crate::loader::{GlyphLoader, GlyphRasterizer, LoadRequest};
use crate::shape::{HarfBuzzShaper, ShapeOptions, TextShaper};
use crate::types::{
    Align, AtlasId, BaseDirection, ColorSpace, FontId, GlyphFingerprint, HintingMode, PixelFormat,
    SubpixelMode, size_q6,
};
use crate::upload::{TextureUpdateFn, UploadQueue, flush_uploads};

/// Callback invoked after an atlas grows, with the atlas and its new side
/// length; embedders rebind their descriptors here.
pub type AtlasGrowFn = Box<dyn FnMut(AtlasId, u32)>;

/// Mutable render state consulted when fingerprints are built.
#[derive(Debug, Clone)]
pub struct FontState {
    pub font: Option<FontId>,
    pub size_px: f32,
    pub letter_spacing: f32,
    pub blur: f32,
    pub align: Align,
    pub hinting: HintingMode,
    pub kerning: bool,
    pub subpixel: SubpixelMode,
    pub direction: BaseDirection,
    pub bidi_enabled: bool,
    pub src_color_space: ColorSpace,
    pub dst_color_space: ColorSpace,
    features: Vec<FeatureSetting>,
}

impl Default for FontState {
    fn default() -> Self {
        Self {
            font: None,
            size_px: 16.0,
            letter_spacing: 0.0,
            blur: 0.0,
            align: Align::default(),
            hinting: HintingMode::default(),
            kerning: true,
            subpixel: SubpixelMode::default(),
            direction: BaseDirection::default(),
            bidi_enabled: false,
            src_color_space: ColorSpace::default(),
            dst_color_space: ColorSpace::default(),
            features: Vec::new(),
        }
    }
}

enum BackendKind {
    Memory(MemoryBackend),
    Wgpu(Box<WgpuBackend>),
    Custom(Box<dyn AtlasBackend>),
}

impl BackendKind {
    fn as_dyn(&mut self) -> &mut dyn AtlasBackend {
        match self {
            Self::Memory(b) => b,
            Self::Wgpu(b) => b.as_mut(),
            Self::Custom(b) => b.as_mut(),
        }
    }
}

/// Per-frame pump results.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub uploads: u32,
    pub defrag: DefragState,
}

/// The glyph caching and atlas management core.
pub struct FontSystem {
    config: SystemConfig,
    fonts: FontCollection,
    shaper: Box<dyn TextShaper>,
    glyph_cache: GlyphCache,
    shape_cache: ShapeCache,
    atlases: AtlasManager,
    backend: BackendKind,
    loader: Option<GlyphLoader>,
    uploads: Arc<UploadQueue>,
    defrag: DefragEngine,
    gpu_raster: Option<GpuRasterizer>,
    raster_mode: RasterMode,
    texture_callback: Option<TextureUpdateFn>,
    grow_callback: Option<AtlasGrowFn>,
    state: FontState,
    poisoned: bool,
}

impl FontSystem {
    /// Create a system over a wgpu device: the standard configuration.
    pub fn new(config: SystemConfig, device: wgpu::Device, queue: wgpu::Queue) -> Option<Self> {
        let backend = BackendKind::Wgpu(Box::new(WgpuBackend::new(device, queue)));
        Self::assemble(config, backend, None, None)
    }

    /// Create a CPU-only system (memory-backed atlases). Used headless and
    /// throughout the test suite.
    pub fn new_headless(config: SystemConfig) -> Option<Self> {
        Self::assemble(config, BackendKind::Memory(MemoryBackend::new()), None, None)
    }

    /// Create a system over a caller-provided backend implementation.
    pub fn with_backend(config: SystemConfig, backend: Box<dyn AtlasBackend>) -> Option<Self> {
        Self::assemble(config, BackendKind::Custom(backend), None, None)
    }

    fn assemble(
        config: SystemConfig,
        backend: BackendKind,
        shaper: Option<Box<dyn TextShaper>>,
        rasterizer: Option<Box<dyn GlyphRasterizer>>,
    ) -> Option<Self> {
        let fonts = FontCollection::new();
        let shaper = shaper.unwrap_or_else(|| Box::new(HarfBuzzShaper::new(&fonts)));
        let rasterizer =
            rasterizer.unwrap_or_else(|| Box::new(SwashRasterizer::new(fonts.store())));

        let glyph_cache = GlyphCache::new(config.cache.glyph_capacity);
        let uploads = Arc::new(UploadQueue::new(config.cache.upload_queue_size));
        let loader = GlyphLoader::spawn(
            rasterizer,
            config.cache.load_queue_size,
            Arc::clone(&uploads),
            glyph_cache.states(),
        )?;

        Some(Self {
            shape_cache: ShapeCache::new(config.cache.shape_capacity),
            atlases: AtlasManager::new(config.atlas.clone()),
            defrag: DefragEngine::new(config.defrag.clone()),
            raster_mode: config.raster.mode,
            config,
            fonts,
            shaper,
            glyph_cache,
            backend,
            loader: Some(loader),
            uploads,
            gpu_raster: None,
            texture_callback: None,
            grow_callback: None,
            state: FontState::default(),
            poisoned: false,
        })
    }

    // --- Font loading -----------------------------------------------------

    pub fn add_font(&mut self, name: &str, data: Vec<u8>) -> Option<FontId> {
        let id = self.fonts.add_font_bytes(name, data)?;
        if self.state.font.is_none() {
            self.state.font = Some(id);
        }
        Some(id)
    }

    pub fn add_font_file(&mut self, name: &str, path: &std::path::Path) -> Option<FontId> {
        let data = std::fs::read(path).ok()?;
        self.add_font(name, data)
    }

    pub fn find_font(&self, name: &str) -> Option<FontId> {
        self.fonts.find_font(name)
    }

    pub fn add_fallback(&mut self, base: FontId, fallback: FontId) {
        self.fonts.add_fallback(base, fallback);
    }

    pub fn reset_fallback(&mut self, base: FontId) {
        self.fonts.reset_fallback(base);
    }

    pub fn fonts(&self) -> &FontCollection {
        &self.fonts
    }

    /// Update a font's variation settings. Bumps its `var_state_id` (so
    /// every future fingerprint differs) and drops the font's stale shape
    /// cache entries.
    pub fn set_font_variations(&mut self, font: FontId, settings: &[([u8; 4], f32)]) -> Option<u32> {
        let id = self.fonts.set_variations(font, settings)?;
        self.shape_cache.invalidate_font(font);
        Some(id)
    }

    // --- Render state ------------------------------------------------------

    pub fn state(&self) -> &FontState {
        &self.state
    }

    pub fn set_font(&mut self, font: FontId) {
        self.state.font = Some(font);
    }

    pub fn set_size(&mut self, size_px: f32) {
        self.state.size_px = size_px.max(1.0);
    }

    pub fn set_letter_spacing(&mut self, spacing: f32) {
        self.state.letter_spacing = spacing;
    }

    pub fn set_blur(&mut self, blur: f32) {
        self.state.blur = blur.max(0.0);
    }

    pub fn set_align(&mut self, align: Align) {
        self.state.align = align;
    }

    pub fn set_hinting(&mut self, hinting: HintingMode) {
        self.state.hinting = hinting;
    }

    pub fn set_kerning(&mut self, enabled: bool) {
        self.state.kerning = enabled;
    }

    /// Subpixel mode participates in the atlas key: switching it routes
    /// new glyphs to a different atlas and leaves existing atlases alone.
    pub fn set_subpixel_mode(&mut self, mode: SubpixelMode) {
        self.state.subpixel = mode;
    }

    pub fn set_text_direction(&mut self, direction: BaseDirection) {
        self.state.direction = direction;
    }

    pub fn set_bidi_enabled(&mut self, enabled: bool) {
        self.state.bidi_enabled = enabled;
    }

    pub fn set_color_space(&mut self, dst: ColorSpace) {
        self.state.dst_color_space = dst;
    }

    pub fn set_src_color_space(&mut self, src: ColorSpace) {
        self.state.src_color_space = src;
    }

    /// Enable or disable an OpenType feature for subsequent shaping.
    pub fn set_feature(&mut self, tag: [u8; 4], value: u32) {
        match self.state.features.iter_mut().find(|(t, _)| *t == tag) {
            Some(entry) => entry.1 = value,
            None => self.state.features.push((tag, value)),
        }
    }

    pub fn reset_features(&mut self) {
        self.state.features.clear();
    }

    // --- Atlas control ------------------------------------------------------

    /// Drop every atlas and cached glyph; subsequent atlases start at
    /// `size`. Bumps the cache generation so stale external references
    /// are detectable.
    pub fn reset_atlas(&mut self, size: u32) {
        if self.poisoned || size == 0 {
            return;
        }
        let size = size.next_power_of_two().min(self.config.atlas.max_size);
        self.config.atlas.initial_size = size;
        self.atlases.reset(self.backend.as_dyn());
        self.atlases = AtlasManager::new(self.config.atlas.clone());
        if let Some(raster) = self.gpu_raster.as_mut() {
            raster.clear();
        }
        self.uploads.drain_all();
        self.glyph_cache.reset();
        log::debug!("system: atlas reset to {size}");
    }

    pub fn set_texture_callback(&mut self, callback: TextureUpdateFn) {
        self.texture_callback = Some(callback);
    }

    pub fn set_atlas_grow_callback(&mut self, callback: AtlasGrowFn) {
        self.grow_callback = Some(callback);
    }

    /// Select the rasterization source. GPU modes take effect only on a
    /// wgpu backend; elsewhere they quietly fall back to the CPU worker.
    pub fn set_raster_mode(&mut self, mode: RasterMode) {
        self.raster_mode = mode;
        if mode != RasterMode::Cpu && self.gpu_raster.is_none() {
            if let BackendKind::Wgpu(backend) = &self.backend {
                self.gpu_raster = Some(GpuRasterizer::new(
                    backend.device(),
                    self.config.raster.job_queue_size,
                    self.config.raster.px_range,
                ));
            }
        }
    }

    /// Execute defragmentation moves with compute dispatches instead of
    /// texture copies. wgpu backends only; a no-op elsewhere.
    pub fn enable_compute_defrag(&mut self) {
        if let BackendKind::Wgpu(backend) = &mut self.backend {
            backend.enable_compute_moves();
        }
    }

    /// Record every pending compute rasterization on the frame encoder.
    /// Write-through entries resolve to `Uploaded` here.
    pub fn flush_gpu_raster_jobs(&mut self) {
        if let (BackendKind::Wgpu(backend), Some(raster)) =
            (&mut self.backend, &mut self.gpu_raster)
        {
            for slot in raster.flush(backend) {
                self.glyph_cache.complete_compute(slot);
            }
        }
    }

    /// Sampled view of an atlas texture (wgpu backends only).
    pub fn atlas_texture_view(&self, atlas: AtlasId) -> Option<&wgpu::TextureView> {
        match &self.backend {
            BackendKind::Wgpu(b) => b.texture_view(atlas),
            _ => None,
        }
    }

    /// Direct access to the memory backend's pixels (headless backends
    /// only); the software sampling path reads glyphs from here.
    pub fn memory_backend(&self) -> Option<&MemoryBackend> {
        match &self.backend {
            BackendKind::Memory(b) => Some(b),
            _ => None,
        }
    }

    // --- Frame pump ---------------------------------------------------------

    /// Run the once-per-frame work: one defragmentation tick when `idle`
    /// says there is budget, then drain the upload queue. Call before
    /// recording draws that sample the atlases.
    pub fn frame(&mut self, idle: bool) -> FrameStats {
        if self.check_poisoned() {
            return FrameStats::default();
        }
        let backend = self.backend.as_dyn();
        backend.begin_frame();

        let defrag =
            self.defrag.tick(&mut self.atlases, backend, &mut self.glyph_cache, idle);

        self.flush_gpu_raster_jobs();

        let backend = self.backend.as_dyn();
        let uploads = flush_uploads(
            &self.uploads,
            &mut self.glyph_cache,
            &mut self.atlases,
            backend,
            self.texture_callback.as_mut(),
        );
        backend.end_frame();

        FrameStats { uploads, defrag }
    }

    // --- Glyph requests -----------------------------------------------------

    fn current_style(&self) -> IterStyle {
        IterStyle {
            size_q6: size_q6(self.state.size_px),
            hinting: self.state.hinting,
            subpixel: self.state.subpixel,
            src_color_space: self.state.src_color_space,
            dst_color_space: self.state.dst_color_space,
            spacing: self.state.letter_spacing,
        }
    }

    fn fingerprint(&self, font: FontId, glyph_index: u32, style: &IterStyle) -> GlyphFingerprint {
        let color = self.glyph_is_color(font, glyph_index);
        let format = if color {
            PixelFormat::Rgba8
        } else {
            match style.subpixel {
                SubpixelMode::Grayscale => PixelFormat::R8,
                SubpixelMode::HorizontalRgb | SubpixelMode::HorizontalBgr => PixelFormat::Rgb8,
            }
        };
        GlyphFingerprint {
            font,
            glyph_index,
            size: style.size_q6,
            hinting: style.hinting,
            subpixel: if color { SubpixelMode::Grayscale } else { style.subpixel },
            var_state_id: self.fonts.var_state_id(font),
            src_color_space: style.src_color_space,
            dst_color_space: style.dst_color_space,
            format,
        }
    }

    fn glyph_is_color(&self, font: FontId, glyph_index: u32) -> bool {
        let store = self.fonts.store();
        let store = store.read();
        store.face(font).is_some_and(|face| {
            face.is_color_glyph(rustybuzz::ttf_parser::GlyphId(glyph_index as u16))
        })
    }

    /// Look up or request a glyph under the current render state; returns
    /// its cache slot. `None` for empty glyphs (spaces), capacity
    /// failures, and poisoned systems.
    pub fn request_glyph(&mut self, font: FontId, glyph_index: u32) -> Option<u32> {
        let style = self.current_style();
        self.request_glyph_styled(font, glyph_index, &style)
    }

    /// The request path proper; iterators pass their init-time style
    /// snapshot so mid-iteration state changes cannot skew fingerprints.
    fn request_glyph_styled(
        &mut self,
        font: FontId,
        glyph_index: u32,
        style: &IterStyle,
    ) -> Option<u32> {
        if self.poisoned {
            return None;
        }
        let size_px = style.size_q6 as f32 / 64.0;
        let fp = self.fingerprint(font, glyph_index, style);
        if let Some(slot) = self.glyph_cache.lookup(&fp) {
            return Some(slot);
        }
        let (w, h) = self.fonts.predict_dims(font, size_px, glyph_index);
        if w == 0 || h == 0 {
            return None;
        }

        if self.gpu_eligible(&fp) {
            if let Some(slot) = self.request_glyph_gpu(fp, font, glyph_index, size_px, w, h) {
                return Some(slot);
            }
            // Compute queue full or outline rejected: stage via the loader.
        }

        let result = {
            let backend = self.backend.as_dyn();
            self.glyph_cache.request(fp, w, h, &mut self.atlases, backend)
        };
        self.notify_grow();
        match result {
            RequestResult::Hit(slot) => Some(slot),
            RequestResult::Failed => None,
            RequestResult::Inserted(slot) => {
                let entry = self.glyph_cache.entry(slot)?;
                let request = LoadRequest {
                    fp,
                    slot,
                    seq: self.glyph_cache.slot_seq(slot),
                    atlas: entry.atlas,
                    rect: entry.rect,
                };
                let enqueued = self.loader.as_ref().is_some_and(|l| l.enqueue(request));
                if !enqueued {
                    self.glyph_cache.fail_slot(slot, &mut self.atlases);
                    return None;
                }
                Some(slot)
            }
        }
    }

    fn gpu_eligible(&self, fp: &GlyphFingerprint) -> bool {
        match self.raster_mode {
            RasterMode::Cpu => false,
            RasterMode::Gpu | RasterMode::Auto => {
                self.gpu_raster.is_some() && fp.format == PixelFormat::R8
            }
        }
    }

    fn request_glyph_gpu(
        &mut self,
        fp: GlyphFingerprint,
        font: FontId,
        glyph_index: u32,
        size_px: f32,
        w: u32,
        h: u32,
    ) -> Option<u32> {
        // Outline extraction happens on the owner thread; glyphs over the
        // curve budget or without outlines fall back to the CPU worker.
        let outline = {
            let store = self.fonts.store();
            let store = store.read();
            let face = store.face(font)?;
            extract_outline(&face, glyph_index, size_px)?
        };
        let metrics = self.fonts.glyph_metrics(font, size_px, glyph_index)?;

        let result = {
            let backend = self.backend.as_dyn();
            self.glyph_cache
                .add_gpu_direct(fp, w, h, metrics, &mut self.atlases, backend)
        };
        self.notify_grow();
        match result {
            RequestResult::Hit(slot) => Some(slot),
            RequestResult::Failed => None,
            RequestResult::Inserted(slot) => {
                let entry = self.glyph_cache.entry(slot)?;
                let job = GpuRasterJob {
                    outline,
                    atlas: entry.atlas,
                    rect: entry.rect,
                    slot,
                };
                let queued = self.gpu_raster.as_mut().is_some_and(|r| r.queue_job(job));
                if !queued {
                    self.glyph_cache.fail_slot(slot, &mut self.atlases);
                    return None;
                }
                Some(slot)
            }
        }
    }

    /// Insert a glyph with externally produced pixels (tight `w × h`
    /// rows) — the path layered-color compositors use.
    pub fn add_glyph_pixels(
        &mut self,
        font: FontId,
        glyph_index: u32,
        pixels: &[u8],
        w: u32,
        h: u32,
        metrics: crate::types::GlyphMetrics,
    ) -> Option<u32> {
        if self.poisoned {
            return None;
        }
        let style = self.current_style();
        let fp = self.fingerprint(font, glyph_index, &style);
        let result = {
            let backend = self.backend.as_dyn();
            self.glyph_cache.add_direct(
                fp,
                pixels,
                w,
                h,
                metrics,
                &mut self.atlases,
                backend,
                &self.uploads,
            )
        };
        self.notify_grow();
        result
    }

    // --- Text iteration -----------------------------------------------------

    /// Begin iterating `text` at pen position `(x, y)`. Shaping results
    /// come from the shape cache; misses invoke the shaper per font run.
    pub fn text_iter_init(&mut self, x: f32, y: f32, text: &str) -> TextIter {
        let style = self.current_style();
        let mut iter = TextIter { runs: Vec::new(), run: 0, index: 0, pen_x: x, pen_y: y, style };
        if self.poisoned || text.is_empty() {
            return iter;
        }
        let Some(base_font) = self.state.font else {
            return iter;
        };

        for (font, run_text) in self.segment_runs(base_font, text) {
            let glyphs = self.shaped_run(font, &run_text);
            if let Some(glyphs) = glyphs {
                iter.runs.push(IterRun { font, glyphs, text: run_text });
            }
        }
        iter
    }

    /// Yield the next glyph quad. Glyphs without pixels (spaces, failed
    /// requests) advance the pen and are skipped.
    pub fn text_iter_next(&mut self, iter: &mut TextIter) -> Option<CachedGlyph> {
        if self.poisoned {
            return None;
        }
        loop {
            let run = iter.runs.get(iter.run)?;
            let Some(&sg) = run.glyphs.get(iter.index) else {
                iter.run += 1;
                iter.index = 0;
                continue;
            };
            let font = run.font;
            let codepoint = run
                .text
                .get(sg.cluster as usize..)
                .and_then(|s| s.chars().next());
            iter.index += 1;

            let advance = sg.x_advance as f32 / 64.0 + iter.style.spacing;
            let gx = iter.pen_x + sg.x_offset as f32 / 64.0;
            let gy = iter.pen_y - sg.y_offset as f32 / 64.0;
            iter.pen_x += advance;

            let style = iter.style;
            let Some(slot) = self.request_glyph_styled(font, sg.glyph_id, &style) else {
                continue; // advance-only glyph
            };
            let Some(entry) = self.glyph_cache.entry(slot) else {
                continue;
            };

            let m = entry.metrics;
            let x0 = gx + m.bearing_x as f32;
            let y0 = gy - m.bearing_y as f32;
            let w = (entry.rect.w - 2) as f32;
            let h = (entry.rect.h - 2) as f32;
            return Some(CachedGlyph {
                x0,
                y0,
                x1: x0 + w,
                y1: y0 + h,
                s0: entry.uv[0],
                t0: entry.uv[1],
                s1: entry.uv[2],
                t1: entry.uv[3],
                atlas: entry.atlas,
                generation: entry.generation,
                glyph_index: sg.glyph_id,
                codepoint,
                state: self.glyph_cache.state(slot),
                advance,
            });
        }
    }

    /// Measure `text` without touching the glyph cache: shaping plus
    /// font-engine extents only.
    pub fn text_bounds(&mut self, x: f32, y: f32, text: &str) -> Option<TextBounds> {
        if self.poisoned || text.is_empty() {
            return None;
        }
        let base_font = self.state.font?;
        let size_px = self.state.size_px;

        let mut bounds = TextBounds { advance: 0.0, x0: x, y0: y, x1: x, y1: y };
        let mut pen_x = x;
        let mut any = false;
        for (font, run_text) in self.segment_runs(base_font, text) {
            let Some(glyphs) = self.shaped_run(font, &run_text) else {
                continue;
            };
            for sg in glyphs.iter() {
                let gx = pen_x + sg.x_offset as f32 / 64.0;
                pen_x += sg.x_advance as f32 / 64.0 + self.state.letter_spacing;
                let Some(m) = self.fonts.glyph_metrics(font, size_px, sg.glyph_id) else {
                    continue;
                };
                let (w, h) = self.fonts.predict_dims(font, size_px, sg.glyph_id);
                if w == 0 || h == 0 {
                    continue;
                }
                let x0 = gx + m.bearing_x as f32;
                let y0 = y - m.bearing_y as f32;
                bounds.x0 = bounds.x0.min(x0);
                bounds.y0 = bounds.y0.min(y0);
                bounds.x1 = bounds.x1.max(x0 + w as f32);
                bounds.y1 = bounds.y1.max(y0 + h as f32);
                any = true;
            }
        }
        bounds.advance = pen_x - x;
        if !any && bounds.advance == 0.0 {
            return None;
        }
        Some(bounds)
    }

    /// Vertical metrics of the current font at the current size.
    pub fn vertical_metrics(&self) -> Option<LineMetrics> {
        self.fonts.line_metrics(self.state.font?, self.state.size_px)
    }

    // --- Statistics ---------------------------------------------------------

    pub fn glyph_cache_stats(&self) -> crate::cache::glyph::GlyphCacheStats {
        self.glyph_cache.stats()
    }

    pub fn shape_cache_stats(&self) -> crate::cache::shape::ShapeCacheStats {
        self.shape_cache.stats()
    }

    pub fn atlases(&self) -> &AtlasManager {
        &self.atlases
    }

    pub fn defrag_state(&self) -> DefragState {
        self.defrag.state()
    }

    pub fn generation(&self) -> u32 {
        self.glyph_cache.generation()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // --- Internals ----------------------------------------------------------

    /// Split text into maximal runs resolvable by a single font, via the
    /// fallback chain.
    fn segment_runs(&self, base_font: FontId, text: &str) -> Vec<(FontId, String)> {
        let mut runs: Vec<(FontId, String)> = Vec::new();
        for ch in text.chars() {
            let font = self.fonts.font_for_codepoint(base_font, ch).unwrap_or(base_font);
            match runs.last_mut() {
                Some((run_font, run_text)) if *run_font == font => run_text.push(ch),
                _ => runs.push((font, ch.to_string())),
            }
        }
        runs
    }

    fn shape_key(&self, font: FontId, text: &str) -> ShapeKey {
        ShapeKey::new(
            text,
            font,
            size_q6(self.state.size_px),
            self.state.hinting,
            self.state.subpixel,
            self.fonts.var_state_id(font),
            &self.state.features,
            self.state.kerning,
            self.state.bidi_enabled,
            self.state.direction,
        )
    }

    /// Shape one run through the cache.
    fn shaped_run(&mut self, font: FontId, text: &str) -> Option<Arc<[crate::cache::ShapedGlyph]>> {
        let key = self.shape_key(font, text);
        if let Some(entry) = self.shape_cache.lookup(&key) {
            return Some(Arc::clone(&entry.glyphs));
        }
        let options = ShapeOptions {
            size_px: self.state.size_px,
            features: &self.state.features,
            kerning: self.state.kerning,
            base_direction: if self.state.bidi_enabled {
                self.state.direction
            } else {
                BaseDirection::LeftToRight
            },
        };
        let run = self.shaper.shape(font, text, &options)?;
        Some(self.shape_cache.insert(key, &run.glyphs, run.direction))
    }

    fn notify_grow(&mut self) {
        if let Some((atlas, size)) = self.atlases.take_last_resize() {
            if let Some(cb) = self.grow_callback.as_mut() {
                cb(atlas, size);
            }
        }
    }

    /// Detect a dead loader thread; flips the fatal flag once.
    fn check_poisoned(&mut self) -> bool {
        if self.poisoned {
            return true;
        }
        if self.loader.as_ref().is_some_and(GlyphLoader::is_poisoned) {
            log::error!("system: loader thread died, entering poisoned state");
            self.poisoned = true;
        }
        self.poisoned
    }
}

impl Drop for FontSystem {
    fn drop(&mut self) {
        // Shutdown order: stop and join the loader, drop queued pixel
        // buffers, then let the backend release GPU resources.
        if let Some(mut loader) = self.loader.take() {
            loader.shutdown();
        }
        self.uploads.drain_all();
        self.backend.as_dyn().end_frame();
    }
}
