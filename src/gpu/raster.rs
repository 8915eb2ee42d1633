//! Compute-shader glyph rasterization.
//!
//! Jobs accumulate on the owner thread and are flushed once per frame:
//! one pipeline bind, then per job a buffer write at the job's own offset
//! and a `⌈w/8⌉ × ⌈h/8⌉` dispatch of 8×8 workgroups writing coverage
//! straight into the atlas texture. Write-through entries skip the upload
//! queue entirely.

use crate::types::{AtlasId, Rect};

use super::outline::{GlyphOutline, MAX_CONTOURS, MAX_CURVES};
use super::wgpu_backend::WgpuBackend;

/// Serialized glyph data size: 32-byte header + curves + contours.
const GLYPH_DATA_BYTES: usize = 32 + MAX_CURVES * 48 + MAX_CONTOURS * 16;
/// Per-job stride in the glyph buffer, aligned for storage binding offsets.
const GLYPH_JOB_STRIDE: usize = GLYPH_DATA_BYTES.div_ceil(256) * 256;
/// Per-job stride in the params buffer (uniform offset alignment).
const PARAMS_JOB_STRIDE: usize = 256;
const PARAMS_BYTES: usize = 32;

/// One queued rasterization.
pub struct GpuRasterJob {
    pub outline: GlyphOutline,
    pub atlas: AtlasId,
    /// Target rectangle including the 1 px border; the dispatch covers the
    /// interior only.
    pub rect: Rect,
    /// Cache slot to resolve once the flush is recorded.
    pub slot: u32,
}

/// Owner-thread queue plus the compute pipeline that drains it.
pub struct GpuRasterizer {
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    glyph_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    jobs: Vec<GpuRasterJob>,
    capacity: usize,
    px_range: f32,
}

impl GpuRasterizer {
    pub fn new(device: &wgpu::Device, capacity: usize, px_range: f32) -> Self {
        let capacity = capacity.max(1);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("glyphkit_raster"),
            source: wgpu::ShaderSource::Wgsl(RASTER_SHADER_SRC.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glyphkit_raster_bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glyphkit_raster_layout"),
            bind_group_layouts: &[&bind_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("glyphkit_raster_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let glyph_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphkit_raster_glyphs"),
            size: (capacity * GLYPH_JOB_STRIDE) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphkit_raster_params"),
            size: (capacity * PARAMS_JOB_STRIDE) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            bind_layout,
            glyph_buffer,
            params_buffer,
            jobs: Vec::new(),
            capacity,
            px_range,
        }
    }

    /// Queue a job for the next flush. `false` when the queue is full; the
    /// caller falls back to the CPU path.
    pub fn queue_job(&mut self, job: GpuRasterJob) -> bool {
        if self.jobs.len() >= self.capacity {
            log::warn!("gpu raster: job queue full");
            return false;
        }
        self.jobs.push(job);
        true
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Record every queued dispatch on the frame encoder. Returns the
    /// cache slots whose regions are written once the frame submits;
    /// ordering between dispatches targeting the same atlas is handled by
    /// wgpu's usage tracking.
    pub fn flush(&mut self, backend: &mut WgpuBackend) -> Vec<u32> {
        if self.jobs.is_empty() {
            return Vec::new();
        }
        let jobs = std::mem::take(&mut self.jobs);
        let mut resolved = Vec::with_capacity(jobs.len());

        for (i, job) in jobs.iter().enumerate() {
            let Some(view) = backend.texture_view(job.atlas) else {
                continue;
            };
            let glyph_offset = (i * GLYPH_JOB_STRIDE) as u64;
            let params_offset = (i * PARAMS_JOB_STRIDE) as u64;

            let bind_group = backend.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("glyphkit_raster_job"),
                layout: &self.bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.glyph_buffer,
                            offset: glyph_offset,
                            size: Some(
                                std::num::NonZeroU64::new(GLYPH_DATA_BYTES as u64)
                                    .expect("nonzero size"),
                            ),
                        }),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.params_buffer,
                            offset: params_offset,
                            size: Some(
                                std::num::NonZeroU64::new(PARAMS_BYTES as u64)
                                    .expect("nonzero size"),
                            ),
                        }),
                    },
                ],
            });

            backend
                .queue()
                .write_buffer(&self.glyph_buffer, glyph_offset, &job.outline.to_gpu_bytes());
            backend
                .queue()
                .write_buffer(&self.params_buffer, params_offset, &self.job_params(job));

            let interior_w = job.rect.w.saturating_sub(2);
            let interior_h = job.rect.h.saturating_sub(2);
            if interior_w == 0 || interior_h == 0 {
                continue;
            }
            backend.with_encoder(|encoder| {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("glyphkit_raster_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(interior_w.div_ceil(8), interior_h.div_ceil(8), 1);
            });
            resolved.push(job.slot);
        }
        resolved
    }

    /// Drop queued jobs without dispatching (reset/shutdown).
    pub fn clear(&mut self) -> Vec<u32> {
        self.jobs.drain(..).map(|j| j.slot).collect()
    }

    fn job_params(&self, job: &GpuRasterJob) -> [u8; PARAMS_BYTES] {
        let mut out = [0u8; PARAMS_BYTES];
        let origin_x = (job.rect.x + 1) as i32;
        let origin_y = (job.rect.y + 1) as i32;
        out[0..4].copy_from_slice(&origin_x.to_le_bytes());
        out[4..8].copy_from_slice(&origin_y.to_le_bytes());
        out[8..12].copy_from_slice(&(job.rect.w - 2).to_le_bytes());
        out[12..16].copy_from_slice(&(job.rect.h - 2).to_le_bytes());
        out[16..20].copy_from_slice(&self.px_range.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes()); // non-zero winding fill
        out
    }
}

/// Coverage evaluation: cubics are flattened to line segments per pixel;
/// fill is the non-zero winding rule (or even-odd crossing parity), with
/// distance-based anti-aliasing over `px_range`.
const RASTER_SHADER_SRC: &str = "
struct Params {
    origin: vec2<i32>,
    size: vec2<u32>,
    px_range: f32,
    use_winding: u32,
    _pad: vec2<f32>,
}

struct Curve {
    p0: vec2<f32>,
    p1: vec2<f32>,
    p2: vec2<f32>,
    p3: vec2<f32>,
    contour: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

struct ContourInfo {
    first_curve: u32,
    curve_count: u32,
    winding: i32,
    pad: u32,
}

struct GlyphData {
    curve_count: u32,
    contour_count: u32,
    bbox_min: vec2<f32>,
    bbox_max: vec2<f32>,
    _pad: vec2<f32>,
    curves: array<Curve, 256>,
    contours: array<ContourInfo, 32>,
}

@group(0) @binding(0) var<storage, read> glyph: GlyphData;
@group(0) @binding(1) var atlas: texture_storage_2d<r8unorm, write>;
@group(0) @binding(2) var<uniform> params: Params;

const SEGMENTS: u32 = 8u;

fn eval_cubic(c: Curve, t: f32) -> vec2<f32> {
    let mt = 1.0 - t;
    return c.p0 * (mt * mt * mt)
        + c.p1 * (3.0 * mt * mt * t)
        + c.p2 * (3.0 * mt * t * t)
        + c.p3 * (t * t * t);
}

fn dist_to_segment(p: vec2<f32>, a: vec2<f32>, b: vec2<f32>) -> f32 {
    let ab = b - a;
    let len2 = dot(ab, ab);
    if (len2 < 1e-12) {
        return distance(p, a);
    }
    let t = clamp(dot(p - a, ab) / len2, 0.0, 1.0);
    return distance(p, a + ab * t);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.size.x || gid.y >= params.size.y) {
        return;
    }

    // Pixel center mapped into glyph space; glyph y is up, texture y is down.
    let extent = glyph.bbox_max - glyph.bbox_min;
    let fx = (f32(gid.x) + 0.5) / f32(params.size.x);
    let fy = (f32(gid.y) + 0.5) / f32(params.size.y);
    let p = vec2<f32>(
        glyph.bbox_min.x + fx * extent.x,
        glyph.bbox_max.y - fy * extent.y,
    );

    var winding: i32 = 0;
    var crossings: u32 = 0u;
    var min_dist: f32 = 1e9;

    for (var i: u32 = 0u; i < glyph.curve_count; i = i + 1u) {
        let curve = glyph.curves[i];
        var prev = curve.p0;
        for (var s: u32 = 1u; s <= SEGMENTS; s = s + 1u) {
            let q = eval_cubic(curve, f32(s) / f32(SEGMENTS));
            // Horizontal ray toward +x.
            if ((prev.y <= p.y) != (q.y <= p.y)) {
                let tx = prev.x + (p.y - prev.y) * (q.x - prev.x) / (q.y - prev.y);
                if (tx > p.x) {
                    if (q.y > prev.y) {
                        winding = winding + 1;
                    } else {
                        winding = winding - 1;
                    }
                    crossings = crossings + 1u;
                }
            }
            min_dist = min(min_dist, dist_to_segment(p, prev, q));
            prev = q;
        }
    }

    var inside: bool;
    if (params.use_winding == 1u) {
        inside = winding != 0;
    } else {
        inside = (crossings & 1u) == 1u;
    }

    // Distance in pixel units for the anti-aliasing ramp.
    let px_scale = max(extent.x / f32(params.size.x), 1e-6);
    let d = min_dist / px_scale;
    var alpha: f32;
    if (inside) {
        alpha = clamp(0.5 + d / params.px_range, 0.0, 1.0);
    } else {
        alpha = clamp(0.5 - d / params.px_range, 0.0, 1.0);
    }

    let dst = params.origin + vec2<i32>(i32(gid.x), i32(gid.y));
    textureStore(atlas, dst, vec4<f32>(alpha, 0.0, 0.0, 1.0));
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_strides_cover_serialized_outline() {
        // A maximal outline must fit the per-job stride.
        assert!(GLYPH_DATA_BYTES <= GLYPH_JOB_STRIDE);
        assert_eq!(GLYPH_JOB_STRIDE % 256, 0);
        assert_eq!(GLYPH_DATA_BYTES, 32 + 256 * 48 + 32 * 16);
    }
}
