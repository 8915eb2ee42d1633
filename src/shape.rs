//! Text shaping seam.
//!
//! Shaping itself is external to the core: [`TextShaper`] is the interface
//! it is consumed through, and [`HarfBuzzShaper`] is the shipped
//! implementation driving rustybuzz. Positions are returned in 26.6
//! fixed-point pixels.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::shape::{FeatureSetting, ShapedGlyph};
use crate::font::FontCollection;
use crate::types::{BaseDirection, FontId, ResolvedDirection};

/// Per-request shaping inputs beyond the text itself.
pub struct ShapeOptions<'a> {
    pub size_px: f32,
    pub features: &'a [FeatureSetting],
    pub kerning: bool,
    pub base_direction: BaseDirection,
}

/// One shaped run: positioned glyphs plus the direction the run resolved
/// to.
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
    pub direction: ResolvedDirection,
}

/// The external shaper interface.
pub trait TextShaper {
    fn shape(&mut self, font: FontId, text: &str, options: &ShapeOptions<'_>) -> Option<ShapedRun>;
}

/// Resolve an `Auto` base direction from the first strong character.
///
/// This is deliberately not a bidirectional reordering implementation —
/// that belongs to the embedder. It only picks the shaping direction the
/// way a caller with a single-direction run would.
pub fn resolve_direction(text: &str, base: BaseDirection) -> ResolvedDirection {
    match base {
        BaseDirection::LeftToRight => ResolvedDirection::LeftToRight,
        BaseDirection::RightToLeft => ResolvedDirection::RightToLeft,
        BaseDirection::Auto => {
            for ch in text.chars() {
                if is_strong_rtl(ch) {
                    return ResolvedDirection::RightToLeft;
                }
                if ch.is_alphabetic() {
                    return ResolvedDirection::LeftToRight;
                }
            }
            ResolvedDirection::LeftToRight
        }
    }
}

/// Strong right-to-left ranges: Hebrew, Arabic, Syriac, Thaana, and the
/// Arabic presentation forms.
fn is_strong_rtl(ch: char) -> bool {
    matches!(ch,
        '\u{0590}'..='\u{08FF}'
        | '\u{FB1D}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}'
        | '\u{10800}'..='\u{10FFF}'
        | '\u{1E800}'..='\u{1EFFF}')
}

/// rustybuzz-backed shaper sharing the system's font store.
pub struct HarfBuzzShaper {
    store: Arc<RwLock<crate::font::FontStore>>,
}

impl HarfBuzzShaper {
    pub fn new(fonts: &FontCollection) -> Self {
        Self { store: fonts.store() }
    }
}

impl TextShaper for HarfBuzzShaper {
    fn shape(&mut self, font: FontId, text: &str, options: &ShapeOptions<'_>) -> Option<ShapedRun> {
        let store = self.store.read();
        let face = store.face(font)?;

        let direction = resolve_direction(text, options.base_direction);
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.set_direction(match direction {
            ResolvedDirection::LeftToRight => rustybuzz::Direction::LeftToRight,
            ResolvedDirection::RightToLeft => rustybuzz::Direction::RightToLeft,
        });

        let mut features: Vec<rustybuzz::Feature> = options
            .features
            .iter()
            .map(|(tag, value)| {
                rustybuzz::Feature::new(
                    rustybuzz::ttf_parser::Tag::from_bytes(tag),
                    *value,
                    ..,
                )
            })
            .collect();
        if !options.kerning {
            features.push(rustybuzz::Feature::new(
                rustybuzz::ttf_parser::Tag::from_bytes(b"kern"),
                0,
                ..,
            ));
        }

        let output = rustybuzz::shape(&face, &features, buffer);
        let infos = output.glyph_infos();
        let positions = output.glyph_positions();

        // Font units to 26.6 fixed-point pixels.
        let scale_q6 = options.size_px * 64.0 / face.units_per_em() as f32;
        let glyphs = infos
            .iter()
            .zip(positions)
            .map(|(info, pos)| ShapedGlyph {
                glyph_id: info.glyph_id,
                cluster: info.cluster,
                x_offset: (pos.x_offset as f32 * scale_q6).round() as i32,
                y_offset: (pos.y_offset as f32 * scale_q6).round() as i32,
                x_advance: (pos.x_advance as f32 * scale_q6).round() as i32,
                y_advance: (pos.y_advance as f32 * scale_q6).round() as i32,
            })
            .collect();

        Some(ShapedRun { glyphs, direction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_direction_picks_first_strong() {
        assert_eq!(resolve_direction("hello", BaseDirection::Auto), ResolvedDirection::LeftToRight);
        assert_eq!(
            resolve_direction("\u{05D0}\u{05D1}", BaseDirection::Auto),
            ResolvedDirection::RightToLeft,
            "Hebrew resolves right-to-left"
        );
        assert_eq!(
            resolve_direction("123 \u{0627}", BaseDirection::Auto),
            ResolvedDirection::RightToLeft,
            "digits are weak, Arabic decides"
        );
        assert_eq!(
            resolve_direction("...", BaseDirection::Auto),
            ResolvedDirection::LeftToRight,
            "no strong characters defaults left-to-right"
        );
    }

    #[test]
    fn explicit_direction_wins() {
        assert_eq!(
            resolve_direction("hello", BaseDirection::RightToLeft),
            ResolvedDirection::RightToLeft
        );
        assert_eq!(
            resolve_direction("\u{05D0}", BaseDirection::LeftToRight),
            ResolvedDirection::LeftToRight
        );
    }

    #[test]
    fn shapes_simple_text_with_real_faces() {
        let mut fonts = FontCollection::new();
        let font = fonts
            .add_font_bytes("test", crate::font::testfont::build_test_font())
            .expect("test font parses");
        let mut shaper = HarfBuzzShaper::new(&fonts);
        let run = shaper
            .shape(
                font,
                "AB",
                &ShapeOptions {
                    size_px: 16.0,
                    features: &[],
                    kerning: true,
                    base_direction: BaseDirection::Auto,
                },
            )
            .expect("shapes");
        assert_eq!(run.glyphs.len(), 2);
        assert_eq!(run.direction, ResolvedDirection::LeftToRight);
        assert_eq!(run.glyphs[0].glyph_id, 1, "cmap maps 'A' to glyph 1");
        assert_eq!(run.glyphs[1].glyph_id, 2);
        // 600 font units at 16 px / 1000 upem = 9.6 px = 614.4 → 614 in 26.6.
        assert_eq!(run.glyphs[0].x_advance, 614);
        assert_eq!(run.glyphs[0].cluster, 0);
        assert_eq!(run.glyphs[1].cluster, 1);
    }

    #[test]
    fn missing_font_yields_none() {
        let fonts = FontCollection::new();
        let mut shaper = HarfBuzzShaper::new(&fonts);
        let run = shaper.shape(
            FontId(0),
            "hi",
            &ShapeOptions {
                size_px: 16.0,
                features: &[],
                kerning: true,
                base_direction: BaseDirection::Auto,
            },
        );
        assert!(run.is_none());
    }
}
