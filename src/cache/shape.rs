//! Shaped-text cache: memoizes the shaper's output for runs of text.
//!
//! The fingerprint must include every input that can change the shaped
//! glyph stream — text bytes, font, size, hinting, subpixel mode, variation
//! state, the canonicalized feature set, the kerning flag, and the bidi
//! configuration. Any new shaper knob must be added here or the cache is
//! unsafe.

use std::sync::Arc;

use crate::types::{BaseDirection, Fnv1a, FontId, HintingMode, ResolvedDirection, SubpixelMode};

/// One shaped glyph: the shaper's info and position halves interleaved.
/// Offsets and advances are 26.6 fixed-point pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapedGlyph {
    /// Font-engine glyph index (not a codepoint).
    pub glyph_id: u32,
    /// Byte offset of the source cluster in the run's text.
    pub cluster: u32,
    pub x_offset: i32,
    pub y_offset: i32,
    pub x_advance: i32,
    pub y_advance: i32,
}

/// An OpenType feature setting: 4-byte tag plus value.
pub type FeatureSetting = ([u8; 4], u32);

/// Canonicalized fingerprint for one shaping request.
#[derive(Debug, Clone)]
pub struct ShapeKey {
    text: Box<[u8]>,
    pub font: FontId,
    /// Pixel size in 26.6 fixed point.
    pub size: u32,
    pub hinting: HintingMode,
    pub subpixel: SubpixelMode,
    pub var_state_id: u32,
    /// Sorted lexicographically by tag.
    features: Box<[FeatureSetting]>,
    pub kerning: bool,
    pub bidi: bool,
    pub base_direction: BaseDirection,
    hash: u32,
}

impl ShapeKey {
    pub fn new(
        text: &str,
        font: FontId,
        size: u32,
        hinting: HintingMode,
        subpixel: SubpixelMode,
        var_state_id: u32,
        features: &[FeatureSetting],
        kerning: bool,
        bidi: bool,
        base_direction: BaseDirection,
    ) -> Self {
        let mut features: Vec<FeatureSetting> = features.to_vec();
        features.sort_by(|a, b| a.0.cmp(&b.0));

        let mut key = Self {
            text: text.as_bytes().into(),
            font,
            size,
            hinting,
            subpixel,
            var_state_id,
            features: features.into_boxed_slice(),
            kerning,
            bidi,
            base_direction,
            hash: 0,
        };
        key.hash = key.compute_hash();
        key
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn features(&self) -> &[FeatureSetting] {
        &self.features
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    fn compute_hash(&self) -> u32 {
        let mut h = Fnv1a::new();
        h.write_bytes(&self.text);
        h.write_u32(self.font.0);
        h.write_u32(self.size);
        h.write_u32(self.hinting as u32);
        h.write_u32(self.subpixel as u32);
        h.write_u32(self.var_state_id);
        for (tag, value) in &self.features {
            h.write_bytes(tag);
            h.write_u32(*value);
        }
        h.write_u32(u32::from(self.kerning));
        h.write_u32(u32::from(self.bidi));
        h.write_u32(self.base_direction as u32);
        h.finish()
    }
}

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        // Cheap inequality filter before the variable-length compares.
        self.hash == other.hash
            && self.font == other.font
            && self.size == other.size
            && self.hinting == other.hinting
            && self.subpixel == other.subpixel
            && self.var_state_id == other.var_state_id
            && self.kerning == other.kerning
            && self.bidi == other.bidi
            && self.base_direction == other.base_direction
            && self.text == other.text
            && self.features == other.features
    }
}

impl Eq for ShapeKey {}

/// A cached shaping result. The glyph array is shared so an in-flight
/// iterator survives eviction of its entry.
pub struct ShapeEntry {
    key: ShapeKey,
    pub glyphs: Arc<[ShapedGlyph]>,
    pub direction: ResolvedDirection,
    last_used: u64,
}

impl ShapeEntry {
    pub fn key(&self) -> &ShapeKey {
        &self.key
    }
}

/// Aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub live: usize,
}

/// Array-backed fixed-size cache with least-recently-used eviction.
pub struct ShapeCache {
    entries: Vec<Option<ShapeEntry>>,
    counter: u64,
    stats: ShapeCacheStats,
}

impl ShapeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            counter: 0,
            stats: ShapeCacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> ShapeCacheStats {
        ShapeCacheStats {
            live: self.entries.iter().filter(|e| e.is_some()).count(),
            ..self.stats
        }
    }

    /// Find a cached result; every hit refreshes the entry's LRU stamp.
    pub fn lookup(&mut self, key: &ShapeKey) -> Option<&ShapeEntry> {
        self.counter += 1;
        let pos = self
            .entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.key == *key));
        match pos {
            Some(i) => {
                self.stats.hits += 1;
                let counter = self.counter;
                let entry = self.entries[i].as_mut().expect("position matched");
                entry.last_used = counter;
                Some(&*entry)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a shaping result, copying the glyph array into shared
    /// storage. A full cache evicts its least-recently-used entry.
    pub fn insert(
        &mut self,
        key: ShapeKey,
        glyphs: &[ShapedGlyph],
        direction: ResolvedDirection,
    ) -> Arc<[ShapedGlyph]> {
        self.counter += 1;
        let slot = match self.entries.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                let lru = self
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, e)| e.as_ref().map_or(0, |e| e.last_used))
                    .map_or(0, |(i, _)| i);
                self.stats.evictions += 1;
                lru
            }
        };

        let stored: Arc<[ShapedGlyph]> = glyphs.into();
        self.entries[slot] = Some(ShapeEntry {
            key,
            glyphs: Arc::clone(&stored),
            direction,
            last_used: self.counter,
        });
        stored
    }

    /// Drop every entry shaped against the given font. O(capacity).
    pub fn invalidate_font(&mut self, font: FontId) {
        for entry in &mut self.entries {
            if entry.as_ref().is_some_and(|e| e.key.font == font) {
                *entry = None;
            }
        }
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
    }
}
