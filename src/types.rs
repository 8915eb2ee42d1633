//! Shared identifiers, pixel/color descriptors, and cache fingerprints.

use bitflags::bitflags;

/// Identifies one atlas instance within the [`crate::atlas::AtlasManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasId(pub u32);

/// Identifies a loaded font within the [`crate::font::FontCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub u32);

/// Color space identifier carried through atlas keys and upload callbacks.
///
/// The core performs no color conversion; the identifier only partitions
/// atlases so differently-managed pixels never share a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ColorSpace {
    #[default]
    Srgb = 0,
    LinearSrgb = 1,
    DisplayP3 = 2,
    Hdr10 = 3,
}

/// Pixel format of an atlas texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PixelFormat {
    /// Single-channel alpha mask.
    #[default]
    R8 = 0,
    /// Three-channel subpixel mask.
    Rgb8 = 1,
    /// Four-channel color (layered color glyphs, bitmap emoji).
    Rgba8 = 2,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// How glyph coverage is sampled against the display grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SubpixelMode {
    /// One alpha channel per pixel.
    #[default]
    Grayscale = 0,
    /// Three alpha channels aligned to horizontal RGB stripes.
    HorizontalRgb = 1,
    /// Three alpha channels aligned to horizontal BGR stripes.
    HorizontalBgr = 2,
}

/// Outline hinting mode applied during rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HintingMode {
    None = 0,
    #[default]
    Slight = 1,
    Full = 2,
}

/// Base paragraph direction supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BaseDirection {
    /// Resolve from the first strong character.
    #[default]
    Auto = 0,
    LeftToRight = 1,
    RightToLeft = 2,
}

/// Direction a run actually resolved to after shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolvedDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

bitflags! {
    /// Text alignment mask for layout entry points.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Align: u32 {
        const LEFT     = 1 << 0;
        const CENTER   = 1 << 1;
        const RIGHT    = 1 << 2;
        const TOP      = 1 << 3;
        const MIDDLE   = 1 << 4;
        const BOTTOM   = 1 << 5;
        const BASELINE = 1 << 6;
    }
}

impl Default for Align {
    fn default() -> Self {
        Self::LEFT | Self::BASELINE
    }
}

/// Axis-aligned pixel rectangle inside an atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.w) * u64::from(self.h)
    }

    /// Whether this rectangle overlaps `other` (shared edges do not count).
    pub fn overlaps(&self, other: &Self) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Convert a font size in pixels to 26.6 fixed point.
///
/// 1/64th pixel precision matches the shaper's position units and avoids
/// rounding collisions at fractional DPI scales.
pub fn size_q6(size_px: f32) -> u32 {
    (size_px * 64.0).round() as u32
}

/// Horizontal metrics stored per cached glyph.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphMetrics {
    /// Left side bearing in pixels.
    pub bearing_x: i32,
    /// Distance from baseline to the bitmap top in pixels.
    pub bearing_y: i32,
    /// Horizontal advance in pixels.
    pub advance_x: f32,
}

/// Key selecting which atlas a glyph's pixels may live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AtlasKey {
    pub src_color_space: ColorSpace,
    pub dst_color_space: ColorSpace,
    pub format: PixelFormat,
    pub subpixel: SubpixelMode,
}

/// Primary key into the glyph cache.
///
/// `glyph_index` is the font-engine index, not a Unicode codepoint: the
/// same codepoint can map to different indices after variation or OpenType
/// substitution. Every field participates in equality and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphFingerprint {
    pub font: FontId,
    pub glyph_index: u32,
    /// Pixel size in 26.6 fixed point (see [`size_q6`]).
    pub size: u32,
    pub hinting: HintingMode,
    pub subpixel: SubpixelMode,
    /// Font variation state at request time (see [`crate::font::FontCollection`]).
    pub var_state_id: u32,
    pub src_color_space: ColorSpace,
    pub dst_color_space: ColorSpace,
    pub format: PixelFormat,
}

impl GlyphFingerprint {
    /// Atlas key derived from the color-space/format/subpixel fields.
    pub fn atlas_key(&self) -> AtlasKey {
        AtlasKey {
            src_color_space: self.src_color_space,
            dst_color_space: self.dst_color_space,
            format: self.format,
            subpixel: self.subpixel,
        }
    }

    /// FNV-1a hash over every fingerprint field.
    pub fn hash(&self) -> u32 {
        let mut h = Fnv1a::new();
        h.write_u32(self.font.0);
        h.write_u32(self.glyph_index);
        h.write_u32(self.size);
        h.write_u32(self.hinting as u32);
        h.write_u32(self.subpixel as u32);
        h.write_u32(self.var_state_id);
        h.write_u32(self.src_color_space as u32);
        h.write_u32(self.dst_color_space as u32);
        h.write_u32(self.format as u32);
        h.finish()
    }
}

/// Incremental FNV-1a, the hash used for both cache fingerprints.
pub(crate) struct Fnv1a(u32);

impl Fnv1a {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    pub(crate) fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.0 ^= u32::from(v);
        self.0 = self.0.wrapping_mul(Self::PRIME);
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.0 ^= v;
        self.0 = self.0.wrapping_mul(Self::PRIME);
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_u8(b);
        }
    }

    pub(crate) fn finish(&self) -> u32 {
        self.0
    }
}
