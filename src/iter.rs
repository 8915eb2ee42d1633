//! Shaped-text iteration types.
//!
//! A [`TextIter`] is a lazy, forward-only walk over a shaped glyph
//! stream; stepping happens through
//! [`crate::system::FontSystem::text_iter_next`], which owns the caches
//! the walk consults. Iterators hold shared references to the shaped
//! arrays, so shape-cache eviction cannot invalidate one mid-flight.

use std::sync::Arc;

use crate::cache::{GlyphState, ShapedGlyph};
use crate::types::{
    AtlasId, ColorSpace, FontId, HintingMode, SubpixelMode,
};

/// One textured quad for a cached glyph.
///
/// Screen coordinates are in pixels with y down; UVs address the glyph's
/// atlas region. `generation` pairs with the glyph cache's generation so
/// callers can detect references that survived a cache reset. Entries
/// still `Loading` carry valid geometry but no pixels yet — callers skip
/// them for the frame or draw a fallback.
#[derive(Debug, Clone, Copy)]
pub struct CachedGlyph {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub s0: f32,
    pub t0: f32,
    pub s1: f32,
    pub t1: f32,
    pub atlas: AtlasId,
    pub generation: u32,
    pub glyph_index: u32,
    /// First codepoint of the source cluster, when it decodes cleanly.
    pub codepoint: Option<char>,
    pub state: GlyphState,
    /// Pixel advance applied to the pen after this glyph.
    pub advance: f32,
}

/// One shaped run within an iterator: every glyph resolves against the
/// same font.
pub(crate) struct IterRun {
    pub font: FontId,
    pub glyphs: Arc<[ShapedGlyph]>,
    pub text: String,
}

/// Snapshot of the render state an iterator was created under, so
/// mid-iteration state changes cannot skew fingerprints.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IterStyle {
    pub size_q6: u32,
    pub hinting: HintingMode,
    pub subpixel: SubpixelMode,
    pub src_color_space: ColorSpace,
    pub dst_color_space: ColorSpace,
    pub spacing: f32,
}

/// Lazy glyph-quad iterator; finite and not restartable.
pub struct TextIter {
    pub(crate) runs: Vec<IterRun>,
    pub(crate) run: usize,
    pub(crate) index: usize,
    pub(crate) pen_x: f32,
    pub(crate) pen_y: f32,
    pub(crate) style: IterStyle,
}

impl TextIter {
    /// Whether the iterator has any glyphs at all.
    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.glyphs.is_empty())
    }

    /// Current pen position.
    pub fn pen(&self) -> (f32, f32) {
        (self.pen_x, self.pen_y)
    }
}

/// Measured extents of a text string.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextBounds {
    /// Total pen advance.
    pub advance: f32,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}
