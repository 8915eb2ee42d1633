//! GPU integration: the atlas backend seam, the wgpu implementation, and
//! compute-shader glyph rasterization.

mod backend;
pub mod outline;
pub mod raster;
mod wgpu_backend;

pub use backend::{AtlasBackend, MemoryBackend};
pub use raster::{GpuRasterJob, GpuRasterizer};
pub use wgpu_backend::WgpuBackend;
