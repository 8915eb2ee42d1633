//! Background glyph loader: a single worker thread that rasterizes cache
//! misses and feeds the upload queue.
//!
//! The worker blocks on a condition variable while the load queue is
//! empty. It never touches cache structure; its results travel exclusively
//! through the upload queue, and the only cache field it writes is the
//! shared per-slot state byte (`Loading → Ready`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;

use crate::cache::{GlyphState, StateSlab};
use crate::types::{AtlasId, GlyphFingerprint, GlyphMetrics, Rect};
use crate::upload::{UploadItem, UploadQueue};

/// A glyph load handed to the worker.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest {
    pub fp: GlyphFingerprint,
    pub slot: u32,
    pub seq: u32,
    pub atlas: AtlasId,
    /// Reserved rectangle including the 1 px border.
    pub rect: Rect,
}

/// CPU rasterization result: tight rows, no border.
pub struct RasterizedGlyph {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub metrics: GlyphMetrics,
}

/// The external rasterization function consumed by the loader.
pub trait GlyphRasterizer: Send {
    fn rasterize(&mut self, fp: &GlyphFingerprint) -> Option<RasterizedGlyph>;
}

struct LoaderShared {
    queue: Mutex<VecDeque<LoadRequest>>,
    cond: Condvar,
    capacity: usize,
    running: AtomicBool,
    poisoned: AtomicBool,
    uploads: Arc<UploadQueue>,
    states: Arc<StateSlab>,
}

/// Owner-side handle to the loader thread.
pub struct GlyphLoader {
    shared: Arc<LoaderShared>,
    handle: Option<JoinHandle<()>>,
}

impl GlyphLoader {
    /// Spawn the worker. Returns `None` when thread creation fails; no
    /// partial loader is left behind.
    pub(crate) fn spawn(
        mut rasterizer: Box<dyn GlyphRasterizer>,
        capacity: usize,
        uploads: Arc<UploadQueue>,
        states: Arc<StateSlab>,
    ) -> Option<Self> {
        let shared = Arc::new(LoaderShared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            capacity: capacity.max(1),
            running: AtomicBool::new(true),
            poisoned: AtomicBool::new(false),
            uploads,
            states,
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("glyphkit-loader".into())
            .spawn(move || worker_loop(&worker, rasterizer.as_mut()))
            .ok()?;

        Some(Self { shared, handle: Some(handle) })
    }

    /// Queue a load. Returns `false` when the queue is full; the caller
    /// rolls back the cache reservation and retries later.
    pub(crate) fn enqueue(&self, req: LoadRequest) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            log::warn!("loader: queue full, rejecting glyph {}", req.fp.glyph_index);
            return false;
        }
        queue.push_back(req);
        self.shared.cond.notify_one();
        true
    }

    /// The worker died mid-rasterization; the system treats this as fatal.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
            || self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Stop the worker: clear the running flag, wake it, join, and drop
    /// whatever both queues still hold.
    pub(crate) fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.cond.notify_all();
        // The worker may be blocked on upload-queue space; wake it so it
        // can observe the cleared running flag before we join.
        self.shared.uploads.notify_producers();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.shared.poisoned.store(true, Ordering::Release);
            }
        }
        let dropped_loads = {
            let mut queue = self.shared.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        let dropped_uploads = self.shared.uploads.drain_all();
        if dropped_loads + dropped_uploads > 0 {
            log::debug!("loader: shutdown dropped {dropped_loads} loads, {dropped_uploads} uploads");
        }
    }
}

impl Drop for GlyphLoader {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: &LoaderShared, rasterizer: &mut dyn GlyphRasterizer) {
    loop {
        let req = {
            let mut queue = shared.queue.lock();
            loop {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                if let Some(req) = queue.pop_front() {
                    break req;
                }
                shared.cond.wait(&mut queue);
            }
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rasterizer.rasterize(&req.fp)
        }));
        let rasterized = match result {
            Ok(r) => r,
            Err(_) => {
                log::error!("loader: rasterizer panicked, loader is now poisoned");
                shared.poisoned.store(true, Ordering::Release);
                return;
            }
        };

        let item = match rasterized {
            Some(glyph) => {
                let pixels = place_in_reserved(&glyph, req.rect, req.fp.format.bytes_per_pixel());
                UploadItem {
                    atlas: req.atlas,
                    rect: req.rect,
                    pixels: Some(pixels),
                    slot: req.slot,
                    seq: req.seq,
                    metrics: glyph.metrics,
                    format: req.fp.format,
                }
            }
            None => UploadItem {
                atlas: req.atlas,
                rect: req.rect,
                pixels: None,
                slot: req.slot,
                seq: req.seq,
                metrics: GlyphMetrics::default(),
                format: req.fp.format,
            },
        };

        let succeeded = item.pixels.is_some();
        if shared.uploads.push_blocking(item, &shared.running) && succeeded {
            // Publish: metrics and pixels are in the queue before Ready
            // becomes visible to the owner thread.
            shared.states.set(req.slot, GlyphState::Ready);
        }
    }
}

/// Copy a rasterized glyph into the center of its reserved rectangle,
/// clipping if hinting produced a dimension the reservation did not
/// anticipate.
fn place_in_reserved(glyph: &RasterizedGlyph, rect: Rect, bpp: u32) -> Vec<u8> {
    let bpp = bpp as usize;
    let full_w = rect.w as usize;
    let mut out = vec![0u8; full_w * rect.h as usize * bpp];
    let interior_w = (rect.w - 2).min(glyph.width) as usize;
    let interior_h = (rect.h - 2).min(glyph.height) as usize;
    let src_row = glyph.width as usize * bpp;
    for row in 0..interior_h {
        let src = row * src_row;
        let dst = ((row + 1) * full_w + 1) * bpp;
        out[dst..dst + interior_w * bpp]
            .copy_from_slice(&glyph.pixels[src..src + interior_w * bpp]);
    }
    out
}
