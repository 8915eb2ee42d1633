//! Atlas instances, keyed multi-atlas management, and defragmentation.

pub mod defrag;
mod instance;
mod manager;

pub use defrag::{DefragCache, DefragEngine, DefragState, GlyphMove};
pub use instance::AtlasInstance;
pub use manager::{AtlasAllocation, AtlasManager};
