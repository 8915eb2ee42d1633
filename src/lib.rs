//! Glyph caching and atlas management core for GPU text rendering.
//!
//! Sits between a text shaper and the GPU: an unbounded stream of
//! (font, glyph, size, variation) requests becomes a bounded set of
//! pre-rasterized regions across keyed atlas textures, with background
//! loading, dynamic growth, idle-frame defragmentation, and LRU eviction.
//! Shaping results are memoized in a fingerprint-complete shape cache.
//!
//! Entry point: [`system::FontSystem`].

pub mod atlas;
pub mod cache;
pub mod config;
pub mod font;
pub mod gpu;
pub mod iter;
pub mod loader;
pub mod packer;
pub mod shape;
pub mod system;
pub mod types;
pub mod upload;

pub use cache::{GlyphState, ShapedGlyph};
pub use config::{RasterMode, SystemConfig};
pub use iter::{CachedGlyph, TextBounds, TextIter};
pub use system::{FontSystem, FontState, FrameStats};
pub use types::{
    Align, AtlasId, AtlasKey, BaseDirection, ColorSpace, FontId, GlyphFingerprint, GlyphMetrics,
    HintingMode, PixelFormat, SubpixelMode,
};
