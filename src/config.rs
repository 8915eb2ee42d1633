//! System configuration structures and TOML loading.

use serde::{Deserialize, Serialize};

use crate::packer::{PackHeuristic, SplitRule};

/// Top-level configuration for a [`crate::system::FontSystem`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub atlas: AtlasConfig,
    pub cache: CacheConfig,
    pub defrag: DefragConfig,
    pub raster: RasterConfig,
}

impl SystemConfig {
    /// Parse a configuration from TOML text. Missing sections fall back to
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Atlas sizing and packing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Side length of a freshly created atlas (power of two, square).
    pub initial_size: u32,
    /// Growth ceiling per atlas.
    pub max_size: u32,
    /// Total atlas instances across all keys.
    pub max_atlases: usize,
    /// Utilization at which a full atlas grows instead of spawning a sibling.
    pub resize_threshold: f32,
    #[serde(skip)]
    pub heuristic: PackHeuristic,
    #[serde(skip)]
    pub split_rule: SplitRule,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            initial_size: 512,
            max_size: 4096,
            max_atlases: 16,
            resize_threshold: 0.85,
            heuristic: PackHeuristic::BestAreaFit,
            split_rule: SplitRule::ShorterAxis,
        }
    }
}

/// Cache and queue capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Glyph cache slots (rounded up to a power of two).
    pub glyph_capacity: usize,
    /// Shape cache entries.
    pub shape_capacity: usize,
    /// Pending background load requests.
    pub load_queue_size: usize,
    /// Pending GPU uploads per frame.
    pub upload_queue_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            glyph_capacity: 8192,
            shape_capacity: 256,
            load_queue_size: 1024,
            upload_queue_size: 256,
        }
    }
}

/// Idle-frame defragmentation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefragConfig {
    pub enabled: bool,
    /// Per-frame time budget in milliseconds.
    pub time_budget_ms: f32,
    /// Maximum planned moves per pass.
    pub max_moves: usize,
    /// Free-rectangle count that marks an atlas as worth analyzing.
    pub min_free_rects: usize,
    /// Fragmentation score above which compaction starts.
    pub threshold: f32,
}

impl Default for DefragConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_budget_ms: 2.0,
            max_moves: 256,
            min_free_rects: 50,
            threshold: 0.3,
        }
    }
}

/// Rasterization source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterMode {
    /// Always rasterize on the CPU worker.
    #[default]
    Cpu,
    /// Rasterize every outline glyph with the compute pipeline.
    Gpu,
    /// GPU for outline glyphs, CPU for bitmap/color strikes and degenerate
    /// dimensions.
    Auto,
}

/// GPU rasterizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub mode: RasterMode,
    /// Anti-aliasing range in pixels for the compute rasterizer.
    pub px_range: f32,
    /// Pending compute jobs between flushes.
    pub job_queue_size: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            mode: RasterMode::Cpu,
            px_range: 1.5,
            job_queue_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = SystemConfig::default();
        assert_eq!(c.atlas.initial_size, 512);
        assert_eq!(c.atlas.max_size, 4096);
        assert_eq!(c.atlas.max_atlases, 16);
        assert!((c.atlas.resize_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(c.cache.glyph_capacity, 8192);
        assert_eq!(c.cache.shape_capacity, 256);
        assert_eq!(c.cache.load_queue_size, 1024);
        assert_eq!(c.cache.upload_queue_size, 256);
        assert!((c.defrag.time_budget_ms - 2.0).abs() < f32::EPSILON);
        assert_eq!(c.defrag.max_moves, 256);
        assert_eq!(c.raster.mode, RasterMode::Cpu);
    }

    #[test]
    fn partial_toml_overrides() {
        let c = SystemConfig::from_toml_str(
            r#"
            [atlas]
            initial_size = 1024

            [raster]
            mode = "auto"
            "#,
        )
        .expect("valid toml");
        assert_eq!(c.atlas.initial_size, 1024);
        assert_eq!(c.atlas.max_size, 4096, "untouched fields keep defaults");
        assert_eq!(c.raster.mode, RasterMode::Auto);
    }
}
