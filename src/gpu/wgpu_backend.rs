//! wgpu implementation of the atlas backend.
//!
//! Uploads stage through a host-visible ring buffer and are recorded as
//! buffer-to-texture copies on a per-frame command encoder. Intra-atlas
//! moves (defragmentation) ping-pong through a shadow texture so every
//! move in a pass reads pre-pass pixels; wgpu inserts the equivalent
//! barriers between copies and dispatches on its own.

use std::collections::HashMap;

use crate::types::{AtlasId, PixelFormat, Rect};

use super::backend::AtlasBackend;

/// Staging ring capacity; uploads beyond this defer to the next frame.
const STAGING_BYTES: usize = 2 * 1024 * 1024;

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        // Three-channel subpixel masks ride in an RGBA texture; the
        // conversion pads rows at upload time.
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// Bytes per texel as stored on the GPU (Rgb8 is padded to four).
fn gpu_bpp(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::R8 => 1,
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => 4,
    }
}

struct BackendTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: u32,
    format: PixelFormat,
}

/// Compute pipeline that relocates atlas regions: reads the pass shadow,
/// writes the live texture, one thread per pixel in 8×8 workgroups. Bind
/// layouts are per pixel format because the storage-texture format is
/// part of the layout.
struct MovePipeline {
    pipelines: HashMap<u8, (wgpu::BindGroupLayout, wgpu::ComputePipeline)>,
    params: wgpu::Buffer,
    params_used: u64,
}

/// Uniform slots available to compute moves per frame; overflow falls
/// back to plain copies.
const MOVE_PARAM_SLOTS: u64 = 512;
const MOVE_PARAM_STRIDE: u64 = 256;

const MOVE_SHADER_SRC: &str = "
struct MoveParams {
    src_offset: vec2<u32>,
    dst_offset: vec2<u32>,
    extent: vec2<u32>,
    _pad: vec2<u32>,
}

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var dst_tex: texture_storage_2d<FORMAT, write>;
@group(0) @binding(2) var<uniform> params: MoveParams;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.extent.x || gid.y >= params.extent.y) {
        return;
    }
    let src = vec2<i32>(params.src_offset + gid.xy);
    let dst = vec2<i32>(params.dst_offset + gid.xy);
    let texel = textureLoad(src_tex, src, 0);
    textureStore(dst_tex, dst, texel);
}
";

impl MovePipeline {
    fn new(device: &wgpu::Device) -> Self {
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphkit_move_params"),
            size: MOVE_PARAM_SLOTS * MOVE_PARAM_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { pipelines: HashMap::new(), params, params_used: 0 }
    }

    fn entry(
        &mut self,
        device: &wgpu::Device,
        format: PixelFormat,
    ) -> &(wgpu::BindGroupLayout, wgpu::ComputePipeline) {
        self.pipelines.entry(format as u8).or_insert_with(|| {
            let storage_format = texture_format(format);
            let wgsl_format = match storage_format {
                wgpu::TextureFormat::R8Unorm => "r8unorm",
                _ => "rgba8unorm",
            };
            let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("glyphkit_move_bindings"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: storage_format,
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
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("glyphkit_move"),
                source: wgpu::ShaderSource::Wgsl(
                    MOVE_SHADER_SRC.replace("FORMAT", wgsl_format).into(),
                ),
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("glyphkit_move_layout"),
                bind_group_layouts: &[&bind_layout],
                immediate_size: 0,
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("glyphkit_move_pipeline"),
                layout: Some(&layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (bind_layout, pipeline)
        })
    }
}

/// GPU-resident atlas textures plus the per-frame upload machinery.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<u32, BackendTexture>,
    shadows: HashMap<u32, (wgpu::Texture, wgpu::TextureView)>,
    staging: wgpu::Buffer,
    staging_used: usize,
    encoder: Option<wgpu::CommandEncoder>,
    compute_moves: Option<MovePipeline>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphkit_staging_ring"),
            size: STAGING_BYTES as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device,
            queue,
            textures: HashMap::new(),
            shadows: HashMap::new(),
            staging,
            staging_used: 0,
            encoder: None,
            compute_moves: None,
        }
    }

    /// Switch defragmentation moves from texture copies to compute
    /// dispatches (one thread per pixel, 8×8 workgroups).
    pub fn enable_compute_moves(&mut self) {
        if self.compute_moves.is_none() {
            self.compute_moves = Some(MovePipeline::new(&self.device));
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Sampled view of an atlas texture, for the embedder's draw pipeline
    /// and the compute rasterizer's storage binding.
    pub fn texture_view(&self, atlas: AtlasId) -> Option<&wgpu::TextureView> {
        self.textures.get(&atlas.0).map(|t| &t.view)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphkit_frame"),
            })
        })
    }

    /// Hand the frame encoder to a caller that records its own work (the
    /// compute rasterizer flush).
    pub(crate) fn with_encoder<R>(&mut self, f: impl FnOnce(&mut wgpu::CommandEncoder) -> R) -> R {
        let encoder = self.encoder();
        f(encoder)
    }

    fn create_texture_raw(&self, label: &str, size: u32, format: PixelFormat) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Expand tight rows to the GPU texel size and a 256-byte-aligned row
    /// pitch, as buffer-to-texture copies require.
    fn stage_rows(pixels: &[u8], rect: Rect, format: PixelFormat) -> (Vec<u8>, u32) {
        let src_bpp = format.bytes_per_pixel() as usize;
        let dst_bpp = gpu_bpp(format) as usize;
        let unpadded = rect.w as usize * dst_bpp;
        let pitch = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let mut out = vec![0u8; pitch * rect.h as usize];
        for row in 0..rect.h as usize {
            for col in 0..rect.w as usize {
                let src = (row * rect.w as usize + col) * src_bpp;
                let dst = row * pitch + col * dst_bpp;
                if src + src_bpp <= pixels.len() {
                    out[dst..dst + src_bpp].copy_from_slice(&pixels[src..src + src_bpp]);
                    if dst_bpp == 4 && src_bpp == 3 {
                        out[dst + 3] = 255;
                    }
                }
            }
        }
        (out, pitch as u32)
    }
}

impl AtlasBackend for WgpuBackend {
    fn create_texture(&mut self, atlas: AtlasId, size: u32, format: PixelFormat) -> bool {
        let texture = self.create_texture_raw("glyphkit_atlas", size, format);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(atlas.0, BackendTexture { texture, view, size, format });
        true
    }

    fn resize_texture(&mut self, atlas: AtlasId, new_size: u32) -> bool {
        let Some(old) = self.textures.get(&atlas.0) else {
            return false;
        };
        if new_size <= old.size {
            return false;
        }
        let format = old.format;
        let old_size = old.size;
        let texture = self.create_texture_raw("glyphkit_atlas", new_size, format);

        // Copy the old content into the same top-left corner. Recorded on
        // its own encoder and submitted immediately so the new texture is
        // complete before any frame-encoder copy touches it.
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphkit_atlas_resize"),
            });
        encoder.copy_texture_to_texture(
            self.textures[&atlas.0].texture.as_image_copy(),
            texture.as_image_copy(),
            wgpu::Extent3d {
                width: old_size,
                height: old_size,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit([encoder.finish()]);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures
            .insert(atlas.0, BackendTexture { texture, view, size: new_size, format });
        self.shadows.remove(&atlas.0);
        true
    }

    fn upload(&mut self, atlas: AtlasId, rect: Rect, pixels: &[u8]) {
        let Some(tex) = self.textures.get(&atlas.0) else {
            return;
        };
        if rect.x + rect.w > tex.size || rect.y + rect.h > tex.size {
            log::warn!("wgpu backend: upload outside atlas {}, dropped", atlas.0);
            return;
        }
        let format = tex.format;
        let (staged, pitch) = Self::stage_rows(pixels, rect, format);

        if self.staging_used + staged.len() > STAGING_BYTES {
            // Ring exhausted mid-frame; fall back to the queue's own
            // staging path rather than dropping the glyph.
            let tex = &self.textures[&atlas.0];
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
                    aspect: wgpu::TextureAspect::All,
                },
                &staged,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(pitch),
                    rows_per_image: None,
                },
                wgpu::Extent3d { width: rect.w, height: rect.h, depth_or_array_layers: 1 },
            );
            return;
        }

        let offset = self.staging_used as u64;
        self.queue.write_buffer(&self.staging, offset, &staged);
        self.staging_used += staged.len();

        let texture = &self.textures[&atlas.0].texture;
        let staging = &self.staging;
        // Borrowed locally so the encoder borrow does not overlap the map
        // accesses above.
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphkit_frame"),
            })
        });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset,
                    bytes_per_row: Some(pitch),
                    rows_per_image: None,
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d { width: rect.w, height: rect.h, depth_or_array_layers: 1 },
        );
    }

    fn copy_within(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32)) {
        // Single move outside a pass: snapshot just for this copy.
        self.begin_move_pass(atlas);
        self.move_region(atlas, src, dst, extent);
        self.end_move_pass(atlas);
    }

    fn begin_move_pass(&mut self, atlas: AtlasId) {
        let Some(tex) = self.textures.get(&atlas.0) else {
            return;
        };
        let shadow = self.create_texture_raw("glyphkit_atlas_shadow", tex.size, tex.format);
        let shadow_view = shadow.create_view(&wgpu::TextureViewDescriptor::default());
        let size = tex.size;
        let texture_copy = tex.texture.as_image_copy();
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphkit_frame"),
            })
        });
        encoder.copy_texture_to_texture(
            texture_copy,
            shadow.as_image_copy(),
            wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
        );
        self.shadows.insert(atlas.0, (shadow, shadow_view));
    }

    fn move_region(&mut self, atlas: AtlasId, src: (u32, u32), dst: (u32, u32), extent: (u32, u32)) {
        let (Some(tex), Some((shadow, shadow_view))) =
            (self.textures.get(&atlas.0), self.shadows.get(&atlas.0))
        else {
            return;
        };
        let (w, h) = extent;
        if src.0 + w > tex.size || src.1 + h > tex.size || dst.0 + w > tex.size || dst.1 + h > tex.size
        {
            return;
        }

        // Compute path: dispatch a per-pixel copy from the shadow into the
        // live texture. Falls back to a plain copy when disabled or when
        // the frame's uniform slots run out.
        if let Some(moves) = self.compute_moves.as_mut() {
            if moves.params_used < MOVE_PARAM_SLOTS {
                let offset = moves.params_used * MOVE_PARAM_STRIDE;
                moves.params_used += 1;
                let mut params = [0u8; 32];
                params[0..4].copy_from_slice(&src.0.to_le_bytes());
                params[4..8].copy_from_slice(&src.1.to_le_bytes());
                params[8..12].copy_from_slice(&dst.0.to_le_bytes());
                params[12..16].copy_from_slice(&dst.1.to_le_bytes());
                params[16..20].copy_from_slice(&w.to_le_bytes());
                params[20..24].copy_from_slice(&h.to_le_bytes());
                self.queue.write_buffer(&moves.params, offset, &params);

                moves.entry(&self.device, tex.format);
                let (bind_layout, pipeline) = &moves.pipelines[&(tex.format as u8)];
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("glyphkit_move_job"),
                    layout: bind_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(shadow_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&tex.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &moves.params,
                                offset,
                                size: std::num::NonZeroU64::new(32),
                            }),
                        },
                    ],
                });
                let device = &self.device;
                let encoder = self.encoder.get_or_insert_with(|| {
                    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("glyphkit_frame"),
                    })
                });
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("glyphkit_move_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(w.div_ceil(8), h.div_ceil(8), 1);
                return;
            }
        }

        let src_copy = wgpu::TexelCopyTextureInfo {
            texture: shadow,
            mip_level: 0,
            origin: wgpu::Origin3d { x: src.0, y: src.1, z: 0 },
            aspect: wgpu::TextureAspect::All,
        };
        let dst_copy = wgpu::TexelCopyTextureInfo {
            texture: &tex.texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: dst.0, y: dst.1, z: 0 },
            aspect: wgpu::TextureAspect::All,
        };
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphkit_frame"),
            })
        });
        encoder.copy_texture_to_texture(
            src_copy,
            dst_copy,
            wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
        );
    }

    fn end_move_pass(&mut self, atlas: AtlasId) {
        self.shadows.remove(&atlas.0);
    }

    fn destroy_texture(&mut self, atlas: AtlasId) {
        self.textures.remove(&atlas.0);
        self.shadows.remove(&atlas.0);
    }

    fn staging_budget(&self) -> usize {
        STAGING_BYTES
    }

    fn begin_frame(&mut self) {
        self.staging_used = 0;
        if let Some(moves) = self.compute_moves.as_mut() {
            moves.params_used = 0;
        }
    }

    fn end_frame(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
    }
}
