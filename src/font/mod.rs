//! Font collection: owns raw font bytes, resolves codepoints through
//! fallback chains, and tracks per-font variation state.
//!
//! Raw bytes are kept in `Arc<Vec<u8>>` so rustybuzz faces can borrow them
//! transiently during shaping and so the loader thread can rasterize
//! against the same store. Every mutation of a font's variation
//! coordinates bumps its `var_state_id`, the only piece of mutable font
//! state the caches observe.

mod raster;
#[cfg(test)]
pub(crate) mod testfont;

pub use raster::SwashRasterizer;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rustybuzz::ttf_parser;

use crate::types::{FontId, GlyphMetrics};

/// Vertical metrics for the current size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub line_gap: f32,
}

/// A variation axis exposed by a variable font.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariationAxis {
    pub tag: [u8; 4],
    pub min_value: f32,
    pub default_value: f32,
    pub max_value: f32,
}

pub(crate) struct FontRecord {
    pub name: String,
    pub data: Arc<Vec<u8>>,
    pub index: u32,
    pub var_state_id: u32,
    /// Design-space variation settings currently applied.
    pub variations: Vec<([u8; 4], f32)>,
    pub fallbacks: Vec<FontId>,
}

/// Shared font storage; read by the loader thread, written by the owner.
#[derive(Default)]
pub(crate) struct FontStore {
    pub fonts: Vec<FontRecord>,
}

impl FontStore {
    pub(crate) fn record(&self, id: FontId) -> Option<&FontRecord> {
        self.fonts.get(id.0 as usize)
    }

    /// Build a rustybuzz face for a font, with its variation settings
    /// applied. Faces borrow the record's bytes, so they are transient.
    pub(crate) fn face(&self, id: FontId) -> Option<rustybuzz::Face<'_>> {
        let record = self.record(id)?;
        let mut face = rustybuzz::Face::from_slice(&record.data, record.index)?;
        if !record.variations.is_empty() {
            let variations: Vec<rustybuzz::Variation> = record
                .variations
                .iter()
                .map(|(tag, value)| rustybuzz::Variation {
                    tag: ttf_parser::Tag::from_bytes(tag),
                    value: *value,
                })
                .collect();
            face.set_variations(&variations);
        }
        Some(face)
    }
}

/// The font engine surface consumed by the rest of the system.
pub struct FontCollection {
    store: Arc<RwLock<FontStore>>,
}

impl Default for FontCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl FontCollection {
    pub fn new() -> Self {
        Self { store: Arc::new(RwLock::new(FontStore::default())) }
    }

    pub(crate) fn store(&self) -> Arc<RwLock<FontStore>> {
        Arc::clone(&self.store)
    }

    /// Register a font from raw bytes. Returns `None` when the data does
    /// not parse as a font face; nothing is stored in that case.
    pub fn add_font_bytes(&mut self, name: &str, data: Vec<u8>) -> Option<FontId> {
        self.add_font_indexed(name, data, 0)
    }

    /// Register one face of a font collection file.
    pub fn add_font_indexed(&mut self, name: &str, data: Vec<u8>, index: u32) -> Option<FontId> {
        if rustybuzz::Face::from_slice(&data, index).is_none() {
            log::warn!("font: \"{name}\" did not parse, rejected");
            return None;
        }
        let mut store = self.store.write();
        let id = FontId(store.fonts.len() as u32);
        store.fonts.push(FontRecord {
            name: name.to_owned(),
            data: Arc::new(data),
            index,
            var_state_id: 0,
            variations: Vec::new(),
            fallbacks: Vec::new(),
        });
        Some(id)
    }

    /// Register a font from a file on disk.
    pub fn add_font_file(&mut self, name: &str, path: &Path) -> Option<FontId> {
        let data = std::fs::read(path)
            .map_err(|e| log::warn!("font: failed to read {path:?}: {e}"))
            .ok()?;
        self.add_font_bytes(name, data)
    }

    /// Find a font by registered name.
    pub fn find_font(&self, name: &str) -> Option<FontId> {
        let store = self.store.read();
        store
            .fonts
            .iter()
            .position(|f| f.name == name)
            .map(|i| FontId(i as u32))
    }

    pub fn font_count(&self) -> usize {
        self.store.read().fonts.len()
    }

    /// Append a fallback to a font's chain.
    pub fn add_fallback(&mut self, base: FontId, fallback: FontId) {
        let mut store = self.store.write();
        if fallback.0 as usize >= store.fonts.len() {
            return;
        }
        if let Some(record) = store.fonts.get_mut(base.0 as usize) {
            if base != fallback && !record.fallbacks.contains(&fallback) {
                record.fallbacks.push(fallback);
            }
        }
    }

    /// Clear a font's fallback chain.
    pub fn reset_fallback(&mut self, base: FontId) {
        if let Some(record) = self.store.write().fonts.get_mut(base.0 as usize) {
            record.fallbacks.clear();
        }
    }

    /// Resolve the font that can display `ch`: the base font first, then
    /// its fallback chain in order. `None` when nothing covers it.
    pub fn font_for_codepoint(&self, base: FontId, ch: char) -> Option<FontId> {
        let store = self.store.read();
        let has_glyph = |id: FontId| {
            store
                .face(id)
                .and_then(|face| face.glyph_index(ch))
                .is_some()
        };
        if has_glyph(base) {
            return Some(base);
        }
        let record = store.record(base)?;
        record.fallbacks.iter().copied().find(|&fb| has_glyph(fb))
    }

    /// Font-engine glyph index for a codepoint, without fallback.
    pub fn glyph_index_for(&self, font: FontId, ch: char) -> Option<u32> {
        let store = self.store.read();
        let face = store.face(font)?;
        face.glyph_index(ch).map(|g| u32::from(g.0))
    }

    /// Replace a font's variation settings. Bumps `var_state_id`; the
    /// caller must also invalidate the shape cache for this font.
    pub fn set_variations(&mut self, font: FontId, settings: &[([u8; 4], f32)]) -> Option<u32> {
        let mut store = self.store.write();
        let record = store.fonts.get_mut(font.0 as usize)?;
        record.variations = settings.to_vec();
        record.var_state_id = record.var_state_id.wrapping_add(1);
        Some(record.var_state_id)
    }

    /// Current variation settings of a font.
    pub fn variations(&self, font: FontId) -> Vec<([u8; 4], f32)> {
        self.store
            .read()
            .record(font)
            .map(|r| r.variations.clone())
            .unwrap_or_default()
    }

    /// Monotonic variation state, observed by every cache fingerprint.
    pub fn var_state_id(&self, font: FontId) -> u32 {
        self.store.read().record(font).map_or(0, |r| r.var_state_id)
    }

    /// Variation axes of a variable font (empty for static fonts).
    pub fn variation_axes(&self, font: FontId) -> Vec<VariationAxis> {
        let store = self.store.read();
        let Some(face) = store.face(font) else {
            return Vec::new();
        };
        face.variation_axes()
            .into_iter()
            .map(|axis| VariationAxis {
                tag: axis.tag.to_bytes(),
                min_value: axis.min_value,
                default_value: axis.def_value,
                max_value: axis.max_value,
            })
            .collect()
    }

    pub fn is_variable(&self, font: FontId) -> bool {
        !self.variation_axes(font).is_empty()
    }

    pub fn glyph_count(&self, font: FontId) -> u32 {
        let store = self.store.read();
        store.face(font).map_or(0, |f| u32::from(f.number_of_glyphs()))
    }

    /// Kerning adjustment between two glyphs in pixels, from the legacy
    /// `kern` table. Shaping applies OpenType kerning itself; this is the
    /// raw pair query for non-shaped layout.
    pub fn kerning(&self, font: FontId, size_px: f32, left: u32, right: u32) -> f32 {
        let store = self.store.read();
        let Some(face) = store.face(font) else {
            return 0.0;
        };
        let scale = size_px / face.units_per_em() as f32;
        let Some(kern) = face.tables().kern else {
            return 0.0;
        };
        let left = ttf_parser::GlyphId(left as u16);
        let right = ttf_parser::GlyphId(right as u16);
        for subtable in kern.subtables {
            if !subtable.horizontal {
                continue;
            }
            if let Some(value) = subtable.glyphs_kerning(left, right) {
                return f32::from(value) * scale;
            }
        }
        0.0
    }

    /// Vertical metrics at the given pixel size.
    pub fn line_metrics(&self, font: FontId, size_px: f32) -> Option<LineMetrics> {
        let store = self.store.read();
        let face = store.face(font)?;
        let scale = size_px / face.units_per_em() as f32;
        Some(LineMetrics {
            ascent: f32::from(face.ascender()) * scale,
            descent: f32::from(face.descender()) * scale,
            line_gap: f32::from(face.line_gap()) * scale,
        })
    }

    /// Horizontal metrics for one glyph at the given pixel size.
    pub fn glyph_metrics(&self, font: FontId, size_px: f32, glyph_index: u32) -> Option<GlyphMetrics> {
        let store = self.store.read();
        let face = store.face(font)?;
        let scale = size_px / face.units_per_em() as f32;
        let gid = ttf_parser::GlyphId(glyph_index as u16);
        let advance = face.glyph_hor_advance(gid).map_or(0.0, |a| f32::from(a) * scale);
        let bbox = face.glyph_bounding_box(gid);
        Some(GlyphMetrics {
            bearing_x: bbox.map_or(0, |b| (f32::from(b.x_min) * scale).floor() as i32),
            bearing_y: bbox.map_or(0, |b| (f32::from(b.y_max) * scale).ceil() as i32),
            advance_x: advance,
        })
    }

    /// Predicted raster dimensions for a glyph, used to reserve atlas
    /// space before rasterization. One pixel of slack absorbs hinting
    /// shifts; the loader clips if the raster still lands larger.
    pub(crate) fn predict_dims(&self, font: FontId, size_px: f32, glyph_index: u32) -> (u32, u32) {
        let store = self.store.read();
        let Some(face) = store.face(font) else {
            return (0, 0);
        };
        let scale = size_px / face.units_per_em() as f32;
        let gid = ttf_parser::GlyphId(glyph_index as u16);
        match face.glyph_bounding_box(gid) {
            Some(bbox) => {
                let w = (f32::from(bbox.width()) * scale).ceil() as u32 + 1;
                let h = (f32::from(bbox.height()) * scale).ceil() as u32 + 1;
                (w, h)
            }
            None => (0, 0),
        }
    }

    /// Family name from the font's naming table, if present.
    pub fn family_name(&self, font: FontId) -> Option<String> {
        self.name_record(font, ttf_parser::name_id::FAMILY)
    }

    /// Style (subfamily) name from the font's naming table, if present.
    pub fn style_name(&self, font: FontId) -> Option<String> {
        self.name_record(font, ttf_parser::name_id::SUBFAMILY)
    }

    fn name_record(&self, font: FontId, name_id: u16) -> Option<String> {
        let store = self.store.read();
        let face = store.face(font)?;
        face.names()
            .into_iter()
            .find(|n| n.name_id == name_id && n.is_unicode())
            .and_then(|n| n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_font_data_is_rejected() {
        let mut fonts = FontCollection::new();
        assert_eq!(fonts.add_font_bytes("junk", vec![0u8; 64]), None);
        assert_eq!(fonts.font_count(), 0);
        assert_eq!(fonts.find_font("junk"), None);
    }

    #[test]
    fn missing_fonts_answer_benignly() {
        let fonts = FontCollection::new();
        let ghost = FontId(3);
        assert_eq!(fonts.glyph_index_for(ghost, 'A'), None);
        assert_eq!(fonts.var_state_id(ghost), 0);
        assert!(fonts.variation_axes(ghost).is_empty());
        assert_eq!(fonts.glyph_count(ghost), 0);
        assert_eq!(fonts.kerning(ghost, 16.0, 1, 2), 0.0);
        assert_eq!(fonts.predict_dims(ghost, 16.0, 1), (0, 0));
    }

    #[test]
    fn fallback_registry_guards_ids() {
        let mut fonts = FontCollection::new();
        // No fonts exist; registering fallbacks must be a no-op, not a panic.
        fonts.add_fallback(FontId(0), FontId(1));
        fonts.reset_fallback(FontId(0));
        assert_eq!(fonts.font_count(), 0);
    }
}
