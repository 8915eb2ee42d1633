//! Glyph outline extraction for compute rasterization.
//!
//! Walks a font outline through the standard move/line/quad/cubic callback
//! interface and produces a GPU-friendly curve list: every segment becomes
//! a cubic Bézier, contours are explicitly closed, and each contour gets a
//! winding direction from its signed area.

use rustybuzz::ttf_parser::{self, OutlineBuilder};

/// Curve budget per glyph; beyond this the glyph falls back to the CPU.
pub const MAX_CURVES: usize = 256;
/// Contour budget per glyph.
pub const MAX_CONTOURS: usize = 32;

/// Distance under which a contour counts as already closed.
const CLOSE_EPSILON: f32 = 0.01;

/// One cubic segment in pixel space. Lines are stored as degenerate
/// cubics with control points on the endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub p0: [f32; 2],
    pub p1: [f32; 2],
    pub p2: [f32; 2],
    pub p3: [f32; 2],
    pub contour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contour {
    pub first_curve: u32,
    pub curve_count: u32,
    /// `+1` for counter-clockwise outer contours, `-1` for holes.
    pub winding: i32,
}

/// Extracted outline ready for upload.
#[derive(Debug, Clone, Default)]
pub struct GlyphOutline {
    pub curves: Vec<Curve>,
    pub contours: Vec<Contour>,
    /// Pixel-space bounds `[x_min, y_min, x_max, y_max]`.
    pub bbox: [f32; 4],
}

impl GlyphOutline {
    /// Serialize to the layout the compute shader reads: a 32-byte header,
    /// then curves (44 bytes padded to 48), then contours (16 bytes each).
    pub fn to_gpu_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.curves.len() * 48 + self.contours.len() * 16);
        out.extend_from_slice(&(self.curves.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.contours.len() as u32).to_le_bytes());
        for v in self.bbox {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[0u8; 8]); // header pad to 32
        for c in &self.curves {
            for p in [c.p0, c.p1, c.p2, c.p3] {
                out.extend_from_slice(&p[0].to_le_bytes());
                out.extend_from_slice(&p[1].to_le_bytes());
            }
            out.extend_from_slice(&c.contour.to_le_bytes());
            out.extend_from_slice(&[0u8; 12]); // pad to 48
        }
        for c in &self.contours {
            out.extend_from_slice(&c.first_curve.to_le_bytes());
            out.extend_from_slice(&c.curve_count.to_le_bytes());
            out.extend_from_slice(&c.winding.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
        }
        out
    }
}

/// Callback sink building a [`GlyphOutline`]. Coordinates are scaled from
/// font units into pixels as they arrive.
pub struct OutlineSink {
    outline: GlyphOutline,
    scale: f32,
    first: [f32; 2],
    current: [f32; 2],
    contour_open: bool,
    overflowed: bool,
}

impl OutlineSink {
    pub fn new(scale: f32) -> Self {
        Self {
            outline: GlyphOutline::default(),
            scale,
            first: [0.0; 2],
            current: [0.0; 2],
            contour_open: false,
            overflowed: false,
        }
    }

    /// Finish the walk: close any open contour, compute windings and
    /// bounds. `None` when the glyph exceeded the curve/contour budget.
    pub fn finish(mut self) -> Option<GlyphOutline> {
        self.end_contour();
        if self.overflowed || self.outline.curves.is_empty() {
            return None;
        }
        self.compute_windings();
        self.compute_bbox();
        Some(self.outline)
    }

    fn contour_index(&self) -> u32 {
        (self.outline.contours.len() - 1) as u32
    }

    fn push_curve(&mut self, p1: [f32; 2], p2: [f32; 2], p3: [f32; 2]) {
        if self.outline.curves.len() >= MAX_CURVES {
            self.overflowed = true;
            return;
        }
        let contour = self.contour_index();
        self.outline.curves.push(Curve { p0: self.current, p1, p2, p3, contour });
        self.current = p3;
    }

    fn push_line(&mut self, to: [f32; 2]) {
        // Degenerate cubic: control points sit on the endpoints.
        self.push_curve(self.current, to, to);
    }

    /// Close the running contour with an explicit segment when the pen did
    /// not return to the start point.
    fn end_contour(&mut self) {
        if !self.contour_open {
            return;
        }
        let dx = self.first[0] - self.current[0];
        let dy = self.first[1] - self.current[1];
        if (dx * dx + dy * dy).sqrt() > CLOSE_EPSILON {
            self.push_line(self.first);
        }
        let contour = self.outline.contours.last_mut().expect("open contour exists");
        contour.curve_count = self.outline.curves.len() as u32 - contour.first_curve;
        self.contour_open = false;
    }

    /// Shoelace sign over segment endpoints: positive area is
    /// counter-clockwise, the outer direction in font coordinates.
    fn compute_windings(&mut self) {
        for (i, contour) in self.outline.contours.iter_mut().enumerate() {
            let mut area = 0.0f32;
            for c in &self.outline.curves {
                if c.contour == i as u32 {
                    area += c.p0[0] * c.p3[1] - c.p3[0] * c.p0[1];
                }
            }
            contour.winding = if area > 0.0 { 1 } else { -1 };
        }
    }

    fn compute_bbox(&mut self) {
        let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
        for c in &self.outline.curves {
            for p in [c.p0, c.p1, c.p2, c.p3] {
                bbox[0] = bbox[0].min(p[0]);
                bbox[1] = bbox[1].min(p[1]);
                bbox[2] = bbox[2].max(p[0]);
                bbox[3] = bbox[3].max(p[1]);
            }
        }
        self.outline.bbox = bbox;
    }
}

impl OutlineBuilder for OutlineSink {
    fn move_to(&mut self, x: f32, y: f32) {
        self.end_contour();
        if self.outline.contours.len() >= MAX_CONTOURS {
            self.overflowed = true;
            return;
        }
        let p = [x * self.scale, y * self.scale];
        self.outline.contours.push(Contour {
            first_curve: self.outline.curves.len() as u32,
            curve_count: 0,
            winding: 0,
        });
        self.first = p;
        self.current = p;
        self.contour_open = true;
    }

    fn line_to(&mut self, x: f32, y: f32) {
        if self.contour_open {
            self.push_line([x * self.scale, y * self.scale]);
        }
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        if !self.contour_open {
            return;
        }
        // Exact quadratic-to-cubic elevation.
        let c = [x1 * self.scale, y1 * self.scale];
        let p0 = self.current;
        let p3 = [x * self.scale, y * self.scale];
        let p1 = [
            p0[0] + (2.0 / 3.0) * (c[0] - p0[0]),
            p0[1] + (2.0 / 3.0) * (c[1] - p0[1]),
        ];
        let p2 = [
            p3[0] + (2.0 / 3.0) * (c[0] - p3[0]),
            p3[1] + (2.0 / 3.0) * (c[1] - p3[1]),
        ];
        self.push_curve(p1, p2, p3);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        if self.contour_open {
            self.push_curve(
                [x1 * self.scale, y1 * self.scale],
                [x2 * self.scale, y2 * self.scale],
                [x * self.scale, y * self.scale],
            );
        }
    }

    fn close(&mut self) {
        self.end_contour();
    }
}

/// Extract a glyph's outline at the given pixel size. `None` for glyphs
/// with no outline (bitmap strikes) or beyond the complexity budget.
pub fn extract_outline(
    face: &rustybuzz::Face<'_>,
    glyph_index: u32,
    size_px: f32,
) -> Option<GlyphOutline> {
    let scale = size_px / face.units_per_em() as f32;
    let mut sink = OutlineSink::new(scale);
    face.outline_glyph(ttf_parser::GlyphId(glyph_index as u16), &mut sink)?;
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(sink: &mut OutlineSink, origin: f32, size: f32, clockwise: bool) {
        sink.move_to(origin, origin);
        if clockwise {
            sink.line_to(origin, origin + size);
            sink.line_to(origin + size, origin + size);
            sink.line_to(origin + size, origin);
        } else {
            sink.line_to(origin + size, origin);
            sink.line_to(origin + size, origin + size);
            sink.line_to(origin, origin + size);
        }
        sink.close();
    }

    #[test]
    fn closing_curve_added_for_open_contour() {
        let mut sink = OutlineSink::new(1.0);
        sink.move_to(0.0, 0.0);
        sink.line_to(10.0, 0.0);
        sink.line_to(10.0, 10.0);
        // No explicit return to the start point before close.
        sink.close();
        let outline = sink.finish().expect("valid outline");
        assert_eq!(outline.curves.len(), 3, "implicit closing segment appended");
        let last = outline.curves.last().expect("closing curve");
        assert_eq!(last.p3, [0.0, 0.0]);
        assert_eq!(outline.contours[0].curve_count, 3);
    }

    #[test]
    fn already_closed_contour_gets_no_extra_segment() {
        let mut sink = OutlineSink::new(1.0);
        sink.move_to(0.0, 0.0);
        sink.line_to(10.0, 0.0);
        sink.line_to(0.0, 10.0);
        sink.line_to(0.0, 0.0);
        sink.close();
        let outline = sink.finish().expect("valid outline");
        assert_eq!(outline.curves.len(), 3);
    }

    #[test]
    fn quad_elevates_to_exact_cubic() {
        let mut sink = OutlineSink::new(1.0);
        sink.move_to(0.0, 0.0);
        sink.quad_to(3.0, 6.0, 6.0, 0.0);
        sink.close();
        let outline = sink.finish().expect("valid outline");
        let c = outline.curves[0];
        // p1 = p0 + 2/3 (c − p0), p2 = p3 + 2/3 (c − p3).
        assert_eq!(c.p1, [2.0, 4.0]);
        assert_eq!(c.p2, [4.0, 4.0]);
        assert_eq!(c.p3, [6.0, 0.0]);
    }

    #[test]
    fn winding_signs_follow_orientation() {
        let mut sink = OutlineSink::new(1.0);
        square(&mut sink, 0.0, 10.0, false); // CCW outer
        square(&mut sink, 2.0, 4.0, true); // CW hole
        let outline = sink.finish().expect("valid outline");
        assert_eq!(outline.contours.len(), 2);
        assert_eq!(outline.contours[0].winding, 1, "outer contour is CCW");
        assert_eq!(outline.contours[1].winding, -1, "hole is CW");
    }

    #[test]
    fn scale_applies_to_all_points() {
        let mut sink = OutlineSink::new(0.5);
        sink.move_to(10.0, 20.0);
        sink.line_to(30.0, 20.0);
        sink.line_to(30.0, 40.0);
        sink.close();
        let outline = sink.finish().expect("valid outline");
        assert_eq!(outline.curves[0].p0, [5.0, 10.0]);
        assert_eq!(outline.bbox, [5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn curve_budget_rejects_monsters() {
        let mut sink = OutlineSink::new(1.0);
        sink.move_to(0.0, 0.0);
        for i in 0..(MAX_CURVES + 10) {
            sink.line_to(i as f32, (i % 7) as f32);
        }
        sink.close();
        assert!(sink.finish().is_none(), "over-budget outline rejected");
    }

    #[test]
    fn contour_budget_rejects_monsters() {
        let mut sink = OutlineSink::new(1.0);
        for i in 0..(MAX_CONTOURS + 1) {
            let o = i as f32 * 20.0;
            square(&mut sink, o, 10.0, false);
        }
        assert!(sink.finish().is_none());
    }

    #[test]
    fn gpu_serialization_layout() {
        let mut sink = OutlineSink::new(1.0);
        square(&mut sink, 0.0, 8.0, false);
        let outline = sink.finish().expect("valid outline");
        let bytes = outline.to_gpu_bytes();
        assert_eq!(bytes.len(), 32 + outline.curves.len() * 48 + outline.contours.len() * 16);
        // Header leads with the curve count.
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes")),
            outline.curves.len() as u32
        );
    }
}
