//! Backend seam between the atlas layer and the GPU.
//!
//! The cache and atlas manager never touch a device directly; every texture
//! operation goes through [`AtlasBackend`]. The shipped implementations are
//! [`crate::gpu::WgpuBackend`] and the CPU-side [`MemoryBackend`] used for
//! headless operation.

use std::collections::HashMap;

use crate::types::{AtlasId, PixelFormat, Rect};

/// Texture operations an atlas backend must provide.
///
/// Implementations guarantee that `resize_texture` preserves the old
/// `size × size` content in the top-left corner of the new texture, and
/// that `copy_within` behaves as if the source region were read in full
/// before the destination is written (overlap-safe).
pub trait AtlasBackend {
    /// Create the backing texture for a new atlas. Returns `false` when the
    /// resource cannot be acquired; the caller must not retain the atlas.
    fn create_texture(&mut self, atlas: AtlasId, size: u32, format: PixelFormat) -> bool;

    /// Grow an atlas texture in place, preserving existing content at the
    /// same top-left coordinates.
    fn resize_texture(&mut self, atlas: AtlasId, new_size: u32) -> bool;

    /// Write `pixels` (tightly packed, `rect.w * bpp` bytes per row) into a
    /// region of the atlas.
    fn upload(&mut self, atlas: AtlasId, rect: Rect, pixels: &[u8]);

    /// Copy a region of an atlas onto another region of the same atlas.
    fn copy_within(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32));

    /// Begin a batch of defragmentation moves on one atlas.
    ///
    /// Implementations snapshot the atlas (GPU: copy into a shadow texture)
    /// so that every subsequent [`Self::move_region`] reads pre-pass pixels
    /// regardless of what earlier moves overwrote. The pass may span
    /// several frames; the snapshot stays valid until
    /// [`Self::end_move_pass`].
    fn begin_move_pass(&mut self, atlas: AtlasId) {
        let _ = atlas;
    }

    /// Relocate one region within a move pass. Reads from the pass
    /// snapshot, writes to the live texture.
    fn move_region(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32)) {
        self.copy_within(atlas, src, dst, extent);
    }

    /// Finish a move pass and release the snapshot.
    fn end_move_pass(&mut self, atlas: AtlasId) {
        let _ = atlas;
    }

    /// Release the backing texture.
    fn destroy_texture(&mut self, atlas: AtlasId);

    /// Bytes of upload traffic accepted per frame before the remainder is
    /// deferred. Unlimited unless the implementation stages through a
    /// bounded ring.
    fn staging_budget(&self) -> usize {
        usize::MAX
    }

    /// Frame boundary hooks. GPU implementations open and submit their
    /// command encoder here; the memory backend ignores both.
    fn begin_frame(&mut self) {}
    fn end_frame(&mut self) {}
}

/// CPU-resident backend: each atlas is a plain byte buffer.
///
/// Used for headless operation and anywhere atlas content must be read
/// back and verified. Uploads, resizes, and region moves have the same
/// observable semantics as the GPU path.
#[derive(Default)]
pub struct MemoryBackend {
    textures: HashMap<u32, MemoryTexture>,
    // Per-atlas pre-pass snapshots for in-flight move passes.
    snapshots: HashMap<u32, Vec<u8>>,
}

struct MemoryTexture {
    size: u32,
    bpp: u32,
    data: Vec<u8>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a region as tightly packed rows. Empty when the atlas does
    /// not exist or the rect is out of bounds.
    pub fn read_region(&self, atlas: AtlasId, rect: Rect) -> Vec<u8> {
        let Some(tex) = self.textures.get(&atlas.0) else {
            return Vec::new();
        };
        if rect.x + rect.w > tex.size || rect.y + rect.h > tex.size {
            return Vec::new();
        }
        let bpp = tex.bpp as usize;
        let row_bytes = rect.w as usize * bpp;
        let mut out = Vec::with_capacity(rect.h as usize * row_bytes);
        for row in 0..rect.h {
            let start = ((rect.y + row) as usize * tex.size as usize + rect.x as usize) * bpp;
            out.extend_from_slice(&tex.data[start..start + row_bytes]);
        }
        out
    }

    /// Current side length of an atlas texture, if it exists.
    pub fn texture_size(&self, atlas: AtlasId) -> Option<u32> {
        self.textures.get(&atlas.0).map(|t| t.size)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

impl AtlasBackend for MemoryBackend {
    fn create_texture(&mut self, atlas: AtlasId, size: u32, format: PixelFormat) -> bool {
        let bpp = format.bytes_per_pixel();
        let bytes = size as usize * size as usize * bpp as usize;
        self.textures.insert(
            atlas.0,
            MemoryTexture {
                size,
                bpp,
                data: vec![0; bytes],
            },
        );
        true
    }

    fn resize_texture(&mut self, atlas: AtlasId, new_size: u32) -> bool {
        let Some(tex) = self.textures.get_mut(&atlas.0) else {
            return false;
        };
        if new_size <= tex.size {
            return false;
        }
        let bpp = tex.bpp as usize;
        let mut data = vec![0u8; new_size as usize * new_size as usize * bpp];
        let old_row = tex.size as usize * bpp;
        for row in 0..tex.size as usize {
            let src = row * old_row;
            let dst = row * new_size as usize * bpp;
            data[dst..dst + old_row].copy_from_slice(&tex.data[src..src + old_row]);
        }
        tex.size = new_size;
        tex.data = data;
        true
    }

    fn upload(&mut self, atlas: AtlasId, rect: Rect, pixels: &[u8]) {
        let Some(tex) = self.textures.get_mut(&atlas.0) else {
            return;
        };
        if rect.x + rect.w > tex.size || rect.y + rect.h > tex.size {
            log::warn!("memory backend: upload outside atlas {}, dropped", atlas.0);
            return;
        }
        let bpp = tex.bpp as usize;
        let row_bytes = rect.w as usize * bpp;
        if pixels.len() < rect.h as usize * row_bytes {
            log::warn!("memory backend: short upload buffer, dropped");
            return;
        }
        for row in 0..rect.h as usize {
            let dst = ((rect.y as usize + row) * tex.size as usize + rect.x as usize) * bpp;
            let src = row * row_bytes;
            tex.data[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
    }

    fn copy_within(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32)) {
        let Some(tex) = self.textures.get_mut(&atlas.0) else {
            return;
        };
        let (w, h) = extent;
        if src.0 + w > tex.size || src.1 + h > tex.size || dst.0 + w > tex.size || dst.1 + h > tex.size
        {
            return;
        }
        let bpp = tex.bpp as usize;
        let row_bytes = w as usize * bpp;
        // Staged through a scratch buffer so overlapping regions are safe,
        // matching the shadow-texture ping-pong on the GPU path.
        let mut scratch = vec![0u8; h as usize * row_bytes];
        for row in 0..h as usize {
            let s = ((src.1 as usize + row) * tex.size as usize + src.0 as usize) * bpp;
            scratch[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&tex.data[s..s + row_bytes]);
        }
        for row in 0..h as usize {
            let d = ((dst.1 as usize + row) * tex.size as usize + dst.0 as usize) * bpp;
            tex.data[d..d + row_bytes].copy_from_slice(&scratch[row * row_bytes..(row + 1) * row_bytes]);
        }
    }

    fn begin_move_pass(&mut self, atlas: AtlasId) {
        if let Some(tex) = self.textures.get(&atlas.0) {
            self.snapshots.insert(atlas.0, tex.data.clone());
        }
    }

    fn move_region(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32)) {
        let Some(tex) = self.textures.get_mut(&atlas.0) else {
            return;
        };
        let Some(snapshot) = self.snapshots.get(&atlas.0) else {
            return;
        };
        let (w, h) = extent;
        if src.0 + w > tex.size || src.1 + h > tex.size || dst.0 + w > tex.size || dst.1 + h > tex.size
        {
            return;
        }
        let bpp = tex.bpp as usize;
        let row_bytes = w as usize * bpp;
        for row in 0..h as usize {
            let s = ((src.1 as usize + row) * tex.size as usize + src.0 as usize) * bpp;
            let d = ((dst.1 as usize + row) * tex.size as usize + dst.0 as usize) * bpp;
            tex.data[d..d + row_bytes].copy_from_slice(&snapshot[s..s + row_bytes]);
        }
    }

    fn end_move_pass(&mut self, atlas: AtlasId) {
        self.snapshots.remove(&atlas.0);
    }

    fn destroy_texture(&mut self, atlas: AtlasId) {
        self.textures.remove(&atlas.0);
        self.snapshots.remove(&atlas.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> Vec<u8> {
        (0..w * h).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn upload_then_read_round_trip() {
        let mut b = MemoryBackend::new();
        assert!(b.create_texture(AtlasId(0), 64, PixelFormat::R8));
        let pixels = checker(8, 8);
        b.upload(AtlasId(0), Rect::new(10, 20, 8, 8), &pixels);
        assert_eq!(b.read_region(AtlasId(0), Rect::new(10, 20, 8, 8)), pixels);
        // Surrounding texels stay zero.
        assert!(b.read_region(AtlasId(0), Rect::new(0, 0, 8, 8)).iter().all(|&p| p == 0));
    }

    #[test]
    fn resize_preserves_top_left_content() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(3), 32, PixelFormat::R8);
        let pixels = checker(32, 32);
        b.upload(AtlasId(3), Rect::new(0, 0, 32, 32), &pixels);
        assert!(b.resize_texture(AtlasId(3), 64));
        assert_eq!(b.texture_size(AtlasId(3)), Some(64));
        assert_eq!(b.read_region(AtlasId(3), Rect::new(0, 0, 32, 32)), pixels);
        assert!(b.read_region(AtlasId(3), Rect::new(32, 0, 32, 32)).iter().all(|&p| p == 0));
    }

    #[test]
    fn resize_rejects_shrinking() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(0), 64, PixelFormat::R8);
        assert!(!b.resize_texture(AtlasId(0), 32));
        assert!(!b.resize_texture(AtlasId(0), 64));
    }

    #[test]
    fn copy_within_handles_overlap() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(0), 16, PixelFormat::R8);
        let pixels = checker(8, 8);
        b.upload(AtlasId(0), Rect::new(0, 0, 8, 8), &pixels);
        // Shift right by 4: destination overlaps source.
        b.copy_within(AtlasId(0), (0, 0), (4, 0), (8, 8));
        assert_eq!(b.read_region(AtlasId(0), Rect::new(4, 0, 8, 8)), pixels);
    }

    #[test]
    fn move_pass_reads_pre_pass_pixels() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(0), 16, PixelFormat::R8);
        let left = vec![1u8; 16];
        let right = vec![2u8; 16];
        b.upload(AtlasId(0), Rect::new(0, 0, 4, 4), &left);
        b.upload(AtlasId(0), Rect::new(4, 0, 4, 4), &right);

        // Swap the two blocks: naive sequential copies would clobber one.
        b.begin_move_pass(AtlasId(0));
        b.move_region(AtlasId(0), (0, 0), (4, 0), (4, 4));
        b.move_region(AtlasId(0), (4, 0), (0, 0), (4, 4));
        b.end_move_pass(AtlasId(0));

        assert_eq!(b.read_region(AtlasId(0), Rect::new(0, 0, 4, 4)), right);
        assert_eq!(b.read_region(AtlasId(0), Rect::new(4, 0, 4, 4)), left);
    }

    #[test]
    fn rgba_strides_respected() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(1), 16, PixelFormat::Rgba8);
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        b.upload(AtlasId(1), Rect::new(2, 2, 4, 4), &pixels);
        assert_eq!(b.read_region(AtlasId(1), Rect::new(2, 2, 4, 4)), pixels);
    }

    #[test]
    fn out_of_bounds_upload_is_a_noop() {
        let mut b = MemoryBackend::new();
        b.create_texture(AtlasId(0), 16, PixelFormat::R8);
        let before = b.read_region(AtlasId(0), Rect::new(0, 0, 16, 16));
        b.upload(AtlasId(0), Rect::new(12, 12, 8, 8), &checker(8, 8));
        assert_eq!(b.read_region(AtlasId(0), Rect::new(0, 0, 16, 16)), before);
    }
}
