//! Per-frame upload pipeline: pixels produced by the loader (or direct
//! inserts) drain into the atlas backend under a staging-byte budget.
//!
//! The queue is the only channel from the loader thread back to the owner;
//! items own their pixel buffers outright, so a buffer has exactly one
//! owner at every instant: loader → queue → staging copy → dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::atlas::AtlasManager;
use crate::cache::GlyphCache;
use crate::gpu::AtlasBackend;
use crate::types::{AtlasId, ColorSpace, GlyphMetrics, PixelFormat, Rect};

/// One pending region write.
pub struct UploadItem {
    pub atlas: AtlasId,
    /// Full rectangle including the 1 px border.
    pub rect: Rect,
    /// Padded pixels (`rect.w × rect.h × bpp`); `None` marks a failed load
    /// whose reservation must be rolled back.
    pub pixels: Option<Vec<u8>>,
    pub slot: u32,
    pub seq: u32,
    pub metrics: GlyphMetrics,
    pub format: PixelFormat,
}

/// Bounded multi-producer queue of pending uploads.
pub struct UploadQueue {
    items: Mutex<VecDeque<UploadItem>>,
    space: Condvar,
    capacity: usize,
}

impl UploadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append without blocking. Returns `false` when the queue is full.
    pub fn push(&self, item: UploadItem) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        true
    }

    /// Append, waiting for the owner thread to drain when full. Bails out
    /// (dropping the item) once `running` goes false during shutdown.
    pub(crate) fn push_blocking(&self, item: UploadItem, running: &AtomicBool) -> bool {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if !running.load(Ordering::Acquire) {
                return false;
            }
            self.space.wait(&mut items);
        }
        items.push_back(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Pop items up to `budget` staging bytes. At least one item is
    /// returned when the queue is non-empty, so an oversized buffer cannot
    /// stall forever; the remainder stays queued for the next frame.
    fn drain_budget(&self, budget: usize) -> Vec<UploadItem> {
        let mut items = self.items.lock();
        let mut out = Vec::new();
        let mut bytes = 0usize;
        while let Some(front) = items.front() {
            let cost = front.pixels.as_ref().map_or(0, Vec::len);
            if !out.is_empty() && bytes + cost > budget {
                break;
            }
            bytes += cost;
            out.push(items.pop_front().expect("front checked"));
        }
        if !out.is_empty() {
            self.space.notify_all();
        }
        out
    }

    /// Wake any producer blocked on a full queue (shutdown path — the
    /// producer rechecks its running flag on wake).
    pub(crate) fn notify_producers(&self) {
        self.space.notify_all();
    }

    /// Drain everything, dropping pixel buffers. Shutdown path.
    pub(crate) fn drain_all(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        self.space.notify_all();
        n
    }
}

/// Region-write notification passed to the embedder's texture callback.
pub struct TextureUpdate<'a> {
    pub atlas: AtlasId,
    pub rect: Rect,
    pub src_color_space: ColorSpace,
    pub dst_color_space: ColorSpace,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
}

/// Embedder hook invoked after each region write.
pub type TextureUpdateFn = Box<dyn FnMut(&TextureUpdate<'_>)>;

/// Drain the upload queue into the backend for one frame.
///
/// Stale items (their slot was evicted or reset since the load was queued)
/// are discarded. Failure items roll their reservation back. Returns the
/// number of regions written.
pub fn flush_uploads(
    queue: &UploadQueue,
    cache: &mut GlyphCache,
    manager: &mut AtlasManager,
    backend: &mut dyn AtlasBackend,
    mut callback: Option<&mut TextureUpdateFn>,
) -> u32 {
    let mut written = 0;
    for item in queue.drain_budget(backend.staging_budget()) {
        if cache.slot_seq(item.slot) != item.seq {
            log::trace!("upload: dropping stale item for slot {}", item.slot);
            continue;
        }
        match item.pixels {
            None => {
                // Rasterization failed: free the reservation.
                cache.fail_slot(item.slot, manager);
            }
            Some(pixels) => {
                backend.upload(item.atlas, item.rect, &pixels);
                cache.complete_staged(item.slot, item.metrics);
                written += 1;
                if let Some(cb) = callback.as_deref_mut() {
                    let key = manager.get(item.atlas).map(crate::atlas::AtlasInstance::key);
                    cb(&TextureUpdate {
                        atlas: item.atlas,
                        rect: item.rect,
                        src_color_space: key.map_or_else(ColorSpace::default, |k| k.src_color_space),
                        dst_color_space: key.map_or_else(ColorSpace::default, |k| k.dst_color_space),
                        format: item.format,
                        pixels: &pixels,
                    });
                }
            }
        }
    }
    written
}

/// Surround tight `w × h` pixel rows with a 1 px zeroed border.
pub(crate) fn pad_with_border(pixels: &[u8], w: u32, h: u32, bpp: u32) -> Vec<u8> {
    let full_w = (w + 2) as usize;
    let full_h = (h + 2) as usize;
    let bpp = bpp as usize;
    let row_bytes = w as usize * bpp;
    let mut out = vec![0u8; full_w * full_h * bpp];
    for row in 0..h as usize {
        let src = row * row_bytes;
        if src + row_bytes > pixels.len() {
            // Short source buffer: keep the remainder zeroed.
            break;
        }
        let dst = ((row + 1) * full_w + 1) * bpp;
        out[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
    }
    out
}
