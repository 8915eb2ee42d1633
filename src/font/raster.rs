//! CPU glyph rasterization via swash.
//!
//! Runs on the loader thread (and synchronously for color glyphs). Renders
//! through swash's source priority — color outline, color bitmap, then
//! scalable outline — so layered color emoji and plain text share one
//! entry point.

use std::sync::Arc;

use parking_lot::RwLock;
use swash::FontRef;
use swash::scale::{Render, ScaleContext, Source, StrikeWith};
use swash::zeno::Format;

use crate::loader::{GlyphRasterizer, RasterizedGlyph};
use crate::types::{GlyphFingerprint, GlyphMetrics, HintingMode, PixelFormat, SubpixelMode};

use super::FontStore;

/// Rasterizes fingerprints against the shared font store.
pub struct SwashRasterizer {
    store: Arc<RwLock<FontStore>>,
    context: ScaleContext,
}

impl SwashRasterizer {
    pub(crate) fn new(store: Arc<RwLock<FontStore>>) -> Self {
        Self { store, context: ScaleContext::new() }
    }

    fn render(&mut self, fp: &GlyphFingerprint) -> Option<RasterizedGlyph> {
        let store = self.store.read();
        let record = store.record(fp.font)?;
        let font_ref = FontRef::from_index(&record.data, record.index as usize)?;
        let size_px = fp.size as f32 / 64.0;

        let variations: Vec<(String, f32)> = record
            .variations
            .iter()
            .filter_map(|(tag, value)| {
                std::str::from_utf8(tag).ok().map(|t| (t.to_owned(), *value))
            })
            .collect();

        let mut scaler = self
            .context
            .builder(font_ref)
            .size(size_px)
            .hint(fp.hinting != HintingMode::None)
            .variations(variations.iter().map(|(tag, value)| (tag.as_str(), *value)))
            .build();

        let sources: &[Source] = match fp.format {
            PixelFormat::Rgba8 => &[
                Source::ColorOutline(0),
                Source::ColorBitmap(StrikeWith::BestFit),
                Source::Outline,
            ],
            PixelFormat::R8 | PixelFormat::Rgb8 => {
                &[Source::Outline, Source::Bitmap(StrikeWith::BestFit)]
            }
        };

        let mut render = Render::new(sources);
        render.format(match fp.subpixel {
            SubpixelMode::Grayscale => Format::Alpha,
            SubpixelMode::HorizontalRgb | SubpixelMode::HorizontalBgr => Format::Subpixel,
        });
        let image = render.render(&mut scaler, fp.glyph_index as u16)?;

        let width = image.placement.width;
        let height = image.placement.height;
        if width == 0 || height == 0 {
            return None;
        }

        let pixels = convert_channels(
            &image.data,
            width,
            height,
            source_bpp(&image),
            fp.format,
            fp.subpixel,
        )?;

        // Advance from the variation-aware face so variable fonts measure
        // correctly; bearings come from the render placement.
        let advance_x = store.face(fp.font).map_or(0.0, |face| {
            let scale = size_px / face.units_per_em() as f32;
            face.glyph_hor_advance(rustybuzz::ttf_parser::GlyphId(fp.glyph_index as u16))
                .map_or(0.0, |a| f32::from(a) * scale)
        });

        Some(RasterizedGlyph {
            width,
            height,
            pixels,
            metrics: GlyphMetrics {
                bearing_x: image.placement.left,
                bearing_y: image.placement.top,
                advance_x,
            },
        })
    }
}

impl GlyphRasterizer for SwashRasterizer {
    fn rasterize(&mut self, fp: &GlyphFingerprint) -> Option<RasterizedGlyph> {
        self.render(fp)
    }
}

fn source_bpp(image: &swash::scale::image::Image) -> u32 {
    match image.content {
        swash::scale::image::Content::Mask => 1,
        swash::scale::image::Content::SubpixelMask | swash::scale::image::Content::Color => 4,
    }
}

/// Repack rendered channels into the atlas pixel format.
fn convert_channels(
    data: &[u8],
    width: u32,
    height: u32,
    src_bpp: u32,
    format: PixelFormat,
    subpixel: SubpixelMode,
) -> Option<Vec<u8>> {
    let count = (width * height) as usize;
    if data.len() < count * src_bpp as usize {
        return None;
    }
    let out = match (src_bpp, format) {
        // Mask into a mask atlas: pass through.
        (1, PixelFormat::R8) => data[..count].to_vec(),
        // Mask into a color atlas: white text, mask as alpha.
        (1, PixelFormat::Rgba8) => {
            let mut out = Vec::with_capacity(count * 4);
            for &a in &data[..count] {
                out.extend_from_slice(&[255, 255, 255, a]);
            }
            out
        }
        // Subpixel RGBA coverage into a three-channel mask atlas.
        (4, PixelFormat::Rgb8) => {
            let mut out = Vec::with_capacity(count * 3);
            for px in data[..count * 4].chunks_exact(4) {
                match subpixel {
                    SubpixelMode::HorizontalBgr => out.extend_from_slice(&[px[2], px[1], px[0]]),
                    _ => out.extend_from_slice(&[px[0], px[1], px[2]]),
                }
            }
            out
        }
        // Full color into a color atlas: pass through.
        (4, PixelFormat::Rgba8) => data[..count * 4].to_vec(),
        // Color content aimed at a plain mask atlas: keep coverage only.
        (4, PixelFormat::R8) => data[..count * 4].chunks_exact(4).map(|px| px[3]).collect(),
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_to_rgba_expands_white_with_alpha() {
        let out = convert_channels(&[0, 128, 255], 3, 1, 1, PixelFormat::Rgba8, SubpixelMode::Grayscale)
            .expect("converts");
        assert_eq!(out.len(), 12);
        assert_eq!(&out[4..8], &[255, 255, 255, 128]);
    }

    #[test]
    fn subpixel_rgba_drops_alpha_and_honors_bgr() {
        let data = [10, 20, 30, 40, 50, 60, 70, 80];
        let rgb = convert_channels(&data, 2, 1, 4, PixelFormat::Rgb8, SubpixelMode::HorizontalRgb)
            .expect("converts");
        assert_eq!(rgb, vec![10, 20, 30, 50, 60, 70]);
        let bgr = convert_channels(&data, 2, 1, 4, PixelFormat::Rgb8, SubpixelMode::HorizontalBgr)
            .expect("converts");
        assert_eq!(bgr, vec![30, 20, 10, 70, 60, 50]);
    }

    #[test]
    fn color_to_mask_keeps_coverage() {
        let data = [1, 2, 3, 200];
        let out = convert_channels(&data, 1, 1, 4, PixelFormat::R8, SubpixelMode::Grayscale)
            .expect("converts");
        assert_eq!(out, vec![200]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(convert_channels(&[1, 2], 2, 2, 1, PixelFormat::R8, SubpixelMode::Grayscale).is_none());
    }
}
