//! Minimal TrueType font assembled in memory for tests.
//!
//! Three glyphs: `.notdef`, a square mapped to 'A', and the same square
//! mapped to 'B'. 1000 units per em, 600-unit advances, square outline
//! from (50, 0) to (550, 700). Enough for cmap lookup, metrics, outline
//! decomposition, and rustybuzz fallback shaping.

fn be16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn be_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn be32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn head() -> Vec<u8> {
    let mut t = Vec::new();
    be32(&mut t, 0x0001_0000); // version
    be32(&mut t, 0); // fontRevision
    be32(&mut t, 0); // checkSumAdjustment
    be32(&mut t, 0x5F0F_3CF5); // magicNumber
    be16(&mut t, 0); // flags
    be16(&mut t, 1000); // unitsPerEm
    t.extend_from_slice(&[0u8; 16]); // created + modified
    be_i16(&mut t, 50); // xMin
    be_i16(&mut t, 0); // yMin
    be_i16(&mut t, 550); // xMax
    be_i16(&mut t, 700); // yMax
    be16(&mut t, 0); // macStyle
    be16(&mut t, 8); // lowestRecPPEM
    be_i16(&mut t, 2); // fontDirectionHint
    be_i16(&mut t, 0); // indexToLocFormat (short)
    be_i16(&mut t, 0); // glyphDataFormat
    t
}

fn hhea() -> Vec<u8> {
    let mut t = Vec::new();
    be32(&mut t, 0x0001_0000);
    be_i16(&mut t, 800); // ascender
    be_i16(&mut t, -200); // descender
    be_i16(&mut t, 0); // lineGap
    be16(&mut t, 600); // advanceWidthMax
    be_i16(&mut t, 0); // minLeftSideBearing
    be_i16(&mut t, 0); // minRightSideBearing
    be_i16(&mut t, 550); // xMaxExtent
    be_i16(&mut t, 1); // caretSlopeRise
    be_i16(&mut t, 0); // caretSlopeRun
    be_i16(&mut t, 0); // caretOffset
    t.extend_from_slice(&[0u8; 8]); // reserved
    be_i16(&mut t, 0); // metricDataFormat
    be16(&mut t, 3); // numberOfHMetrics
    t
}

fn maxp() -> Vec<u8> {
    let mut t = Vec::new();
    be32(&mut t, 0x0001_0000);
    be16(&mut t, 3); // numGlyphs
    be16(&mut t, 4); // maxPoints
    be16(&mut t, 1); // maxContours
    be16(&mut t, 0); // maxCompositePoints
    be16(&mut t, 0); // maxCompositeContours
    be16(&mut t, 2); // maxZones
    t.extend_from_slice(&[0u8; 16]); // remaining limits
    t
}

fn hmtx() -> Vec<u8> {
    let mut t = Vec::new();
    for (advance, lsb) in [(500u16, 0i16), (600, 50), (600, 50)] {
        be16(&mut t, advance);
        be_i16(&mut t, lsb);
    }
    t
}

fn cmap(first: u16) -> Vec<u8> {
    let mut t = Vec::new();
    be16(&mut t, 0); // version
    be16(&mut t, 1); // numTables
    be16(&mut t, 3); // platform: Windows
    be16(&mut t, 1); // encoding: Unicode BMP
    be32(&mut t, 12); // subtable offset

    // Format 4, two segments: first..first+1 → glyphs 1..2, then the
    // 0xFFFF cap.
    be16(&mut t, 4); // format
    be16(&mut t, 32); // length
    be16(&mut t, 0); // language
    be16(&mut t, 4); // segCountX2
    be16(&mut t, 4); // searchRange
    be16(&mut t, 1); // entrySelector
    be16(&mut t, 0); // rangeShift
    be16(&mut t, first + 1); // endCode[0]
    be16(&mut t, 0xFFFF); // endCode[1]
    be16(&mut t, 0); // reservedPad
    be16(&mut t, first); // startCode[0]
    be16(&mut t, 0xFFFF); // startCode[1]
    be_i16(&mut t, 1 - first as i16); // idDelta[0]: first → glyph 1
    be_i16(&mut t, 1); // idDelta[1]
    be16(&mut t, 0); // idRangeOffset[0]
    be16(&mut t, 0); // idRangeOffset[1]
    t
}

fn square_glyph() -> Vec<u8> {
    let mut g = Vec::new();
    be_i16(&mut g, 1); // numberOfContours
    be_i16(&mut g, 50);
    be_i16(&mut g, 0);
    be_i16(&mut g, 550);
    be_i16(&mut g, 700);
    be16(&mut g, 3); // endPtsOfContours
    be16(&mut g, 0); // instructionLength
    g.extend_from_slice(&[0x01; 4]); // flags: on-curve, full deltas
    for dx in [50i16, 500, 0, -500] {
        be_i16(&mut g, dx);
    }
    for dy in [0i16, 0, 700, 0] {
        be_i16(&mut g, dy);
    }
    g
}

fn glyf() -> Vec<u8> {
    let mut t = square_glyph();
    t.extend_from_slice(&square_glyph());
    t
}

fn loca() -> Vec<u8> {
    let glyph_len = square_glyph().len() as u16;
    let mut t = Vec::new();
    for offset in [0, 0, glyph_len / 2, glyph_len] {
        be16(&mut t, offset);
    }
    t
}

/// Assemble the font mapping 'A' and 'B' to the two square glyphs.
pub(crate) fn build_test_font() -> Vec<u8> {
    build_test_font_mapped('A')
}

/// Assemble a font whose cmap covers `first` and the following codepoint,
/// for fallback-coverage tests.
pub(crate) fn build_test_font_mapped(first: char) -> Vec<u8> {
    let tables: [(&[u8; 4], Vec<u8>); 7] = [
        (b"cmap", cmap(first as u16)),
        (b"glyf", glyf()),
        (b"head", head()),
        (b"hhea", hhea()),
        (b"hmtx", hmtx()),
        (b"loca", loca()),
        (b"maxp", maxp()),
    ];

    let mut font = Vec::new();
    be32(&mut font, 0x0001_0000); // sfnt version
    be16(&mut font, tables.len() as u16);
    be16(&mut font, 0); // searchRange (unchecked)
    be16(&mut font, 0); // entrySelector
    be16(&mut font, 0); // rangeShift

    let mut offset = 12 + tables.len() * 16;
    let mut records = Vec::new();
    let mut body = Vec::new();
    for (tag, data) in &tables {
        records.extend_from_slice(*tag);
        be32(&mut records, 0); // checksum (unchecked by the parser)
        be32(&mut records, offset as u32);
        be32(&mut records, data.len() as u32);
        body.extend_from_slice(data);
        let padded = data.len().div_ceil(4) * 4;
        body.extend_from_slice(&vec![0u8; padded - data.len()]);
        offset += padded;
    }
    font.extend_from_slice(&records);
    font.extend_from_slice(&body);
    font
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontCollection;

    #[test]
    fn parses_and_maps_codepoints() {
        let mut fonts = FontCollection::new();
        let id = fonts.add_font_bytes("test", build_test_font()).expect("parses");
        assert_eq!(fonts.glyph_index_for(id, 'A'), Some(1));
        assert_eq!(fonts.glyph_index_for(id, 'B'), Some(2));
        assert_eq!(fonts.glyph_index_for(id, 'z'), None);
        assert_eq!(fonts.glyph_count(id), 3);
        assert!(!fonts.is_variable(id));
    }

    #[test]
    fn metrics_scale_with_size() {
        let mut fonts = FontCollection::new();
        let id = fonts.add_font_bytes("test", build_test_font()).expect("parses");
        let m = fonts.glyph_metrics(id, 16.0, 1).expect("metrics");
        // 600 units at 16px / 1000upem = 9.6 px advance.
        assert!((m.advance_x - 9.6).abs() < 1e-3);
        assert_eq!(m.bearing_y, 12, "700 units scaled and ceiled");

        let lm = fonts.line_metrics(id, 16.0).expect("line metrics");
        assert!((lm.ascent - 12.8).abs() < 1e-3);
        assert!((lm.descent + 3.2).abs() < 1e-3);
    }

    #[test]
    fn dimension_prediction_covers_the_square() {
        let mut fonts = FontCollection::new();
        let id = fonts.add_font_bytes("test", build_test_font()).expect("parses");
        let (w, h) = fonts.predict_dims(id, 16.0, 1);
        // 500x700 units at 0.016 scale: 8x11.2, plus a pixel of slack.
        assert_eq!((w, h), (9, 13));
        assert_eq!(fonts.predict_dims(id, 16.0, 0), (0, 0), ".notdef has no outline");
    }

    #[test]
    fn fallback_resolution_uses_coverage() {
        let mut fonts = FontCollection::new();
        let base = fonts.add_font_bytes("base", build_test_font()).expect("parses");
        let fb = fonts.add_font_bytes("fb", build_test_font()).expect("parses");
        fonts.add_fallback(base, fb);
        assert_eq!(fonts.font_for_codepoint(base, 'A'), Some(base));
        assert_eq!(fonts.font_for_codepoint(base, 'ξ'), None, "nobody covers it");
    }

    #[test]
    fn outline_extraction_sees_the_square() {
        use crate::gpu::outline::extract_outline;
        let fonts = {
            let mut f = FontCollection::new();
            f.add_font_bytes("test", build_test_font()).expect("parses");
            f
        };
        let store = fonts.store();
        let store = store.read();
        let face = store.face(crate::types::FontId(0)).expect("face");
        let outline = extract_outline(&face, 1, 10.0).expect("outline");
        assert_eq!(outline.contours.len(), 1);
        assert_eq!(outline.contours[0].winding, 1, "square is wound CCW");
        // 500 units wide at scale 0.01 → 5 px.
        assert!((outline.bbox[2] - outline.bbox[0] - 5.0).abs() < 1e-4);
    }
}
