//! # WgpuDevice — The Production RenderDevice over wgpu
//!
//! This backend maps the batch's upload-then-draw protocol onto wgpu's
//! command-encoder model. Two impedance mismatches drive the design:
//!
//! - **Blend state is pipeline state.** The classic model toggles blending
//!   with standalone calls; under wgpu the blend equation is baked into an
//!   immutable `RenderPipeline`. Each shader therefore carries a small
//!   pipeline cache keyed by `Option<BlendState>`, and a draw command's blend
//!   selects which pipeline is bound. In practice a frame uses one or two
//!   entries; the cache just makes state changes cheap after the first use.
//!
//! - **Writes are not ordered against draws within a frame.** All
//!   `queue.write_buffer` data lands before the submitted pass executes, so
//!   two flushes writing the same vertex buffer region would clobber each
//!   other. Instead each `upload_vertices` appends to a per-frame staging
//!   arena and the matching draw records its byte range. At
//!   [`render_frame`](WgpuDevice::render_frame) the arena is written to one
//!   growable GPU buffer and every draw binds its own slice. Same bytes, same
//!   counts, one copy.
//!
//! The per-flush combined matrix rides in a uniform buffer with one
//! 256-byte-aligned slot per draw, bound with a dynamic offset.
//!
//! Textures follow the handle pattern: this device owns every
//! `wgpu::Texture`/`BindGroup`, callers hold `Copy` [`Texture`] values. Slot
//! 0 is always a 1×1 white pixel so untinted colored quads need no separate
//! shader path, and loads are deduplicated by path.

use std::collections::HashMap;
use std::path::Path;

use wgpu::util::DeviceExt;

use super::device::{
    BlendFactor, BlendState, BufferId, DrawCommand, RenderDevice, RenderError, ShaderId, TextureId,
};
use super::gpu::GpuContext;
use crate::render2d::texture::Texture;

/// Interleaved sprite vertex: 2 position + 4 color + 2 uv floats.
const VERTEX_STRIDE: u64 = 8 * 4;

/// wgpu requires 256-byte alignment for dynamic uniform offsets on most
/// hardware.
const UNIFORM_ALIGN: u64 = 256;

const VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: VERTEX_STRIDE,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        // position
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x2,
        },
        // color
        wgpu::VertexAttribute {
            offset: 8,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x4,
        },
        // uv
        wgpu::VertexAttribute {
            offset: 24,
            shader_location: 2,
            format: wgpu::VertexFormat::Float32x2,
        },
    ],
};

enum BufferEntry {
    /// Capacity bookkeeping only — vertex data lives in the frame arena.
    Vertex { capacity: u64 },
    Index { buffer: wgpu::Buffer },
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    /// One pipeline per blend configuration this shader has drawn with.
    pipelines: HashMap<Option<BlendState>, wgpu::RenderPipeline>,
}

struct TextureEntry {
    bind_group: wgpu::BindGroup,
}

/// One recorded draw, resolved against the frame arena.
struct FrameDraw {
    vertex_offset: u64,
    vertex_len: u64,
    index_buffer: BufferId,
    index_count: u32,
    texture: TextureId,
    shader: ShaderId,
    blend: Option<BlendState>,
    matrix: [[f32; 4]; 4],
}

/// [`RenderDevice`] implementation over a live wgpu context.
pub struct WgpuDevice {
    gpu: GpuContext,

    buffers: Vec<Option<BufferEntry>>,
    shaders: Vec<Option<ShaderEntry>>,
    textures: Vec<TextureEntry>,
    texture_paths: HashMap<String, Texture>,

    camera_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    // Frame state, cleared by render_frame.
    staging: Vec<u8>,
    draws: Vec<FrameDraw>,
    pending_upload: Option<(BufferId, u64, u64)>,

    arena: Option<wgpu::Buffer>,
    arena_capacity: u64,
    uniforms: Option<(wgpu::Buffer, wgpu::BindGroup)>,
    uniform_capacity: u64,

    depth_write: bool,
}

impl WgpuDevice {
    /// Wrap a configured [`GpuContext`], creating the shared sampler and bind
    /// group layouts plus the built-in 1×1 white texture at slot 0.
    pub fn new(gpu: GpuContext) -> Self {
        let device = &gpu.device;

        // Group 0: per-draw combined matrix, dynamic offset into one buffer.
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera bind group layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(64),
                },
                count: None,
            }],
        });

        // Group 1: texture + sampler.
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sprite sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut this = Self {
            gpu,
            buffers: Vec::new(),
            shaders: Vec::new(),
            textures: Vec::new(),
            texture_paths: HashMap::new(),
            camera_layout,
            texture_layout,
            sampler,
            staging: Vec::new(),
            draws: Vec::new(),
            pending_upload: None,
            arena: None,
            arena_capacity: 0,
            uniforms: None,
            uniform_capacity: 0,
            depth_write: true,
        };

        // Slot 0: 1×1 white, so solid-color quads sample something harmless.
        this.create_texture_rgba8("white 1x1", 1, 1, &[255, 255, 255, 255]);
        this
    }

    /// The built-in 1×1 white texture.
    pub fn white_texture(&self) -> Texture {
        Texture {
            id: TextureId(0),
            width: 1,
            height: 1,
        }
    }

    /// Upload raw RGBA8 pixels as a new texture.
    pub fn create_texture_rgba8(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Texture {
        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let id = TextureId(self.textures.len() as u32);
        self.textures.push(TextureEntry { bind_group });
        Texture { id, width, height }
    }

    /// Load a PNG/JPEG from disk. Cached by path — loading the same file
    /// twice returns the same handle without a second GPU upload.
    pub fn load_texture(&mut self, path: &str) -> Result<Texture, RenderError> {
        if let Some(&texture) = self.texture_paths.get(path) {
            return Ok(texture);
        }

        let img = image::open(Path::new(path))
            .map_err(|e| RenderError::TextureLoad(format!("{path}: {e}")))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        let texture = self.create_texture_rgba8(path, width, height, &img.into_raw());
        self.texture_paths.insert(path.to_owned(), texture);
        Ok(texture)
    }

    /// Reconfigure the surface after a window resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    /// The current surface size in pixels.
    pub fn surface_size(&self) -> (u32, u32) {
        self.gpu.surface_size()
    }

    /// Encode and submit every draw recorded this frame, then present.
    ///
    /// Pipeline creation for any (shader, blend) pair seen for the first
    /// time happens here, before the pass is opened.
    pub fn render_frame(&mut self, clear: [f64; 4]) -> Result<(), wgpu::SurfaceError> {
        let output = self.gpu.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let draws = std::mem::take(&mut self.draws);

        // Materialize any missing pipelines while we still hold &mut self.
        for draw in &draws {
            self.ensure_pipeline(draw.shader, draw.blend);
        }

        // Upload the vertex arena in one write.
        if !self.staging.is_empty() {
            let needed = self.staging.len() as u64;
            if self.arena.is_none() || self.arena_capacity < needed {
                let capacity = needed.next_power_of_two();
                self.arena = Some(self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("sprite vertex arena"),
                    size: capacity,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }));
                self.arena_capacity = capacity;
            }
            if let Some(arena) = &self.arena {
                self.gpu.queue.write_buffer(arena, 0, &self.staging);
            }
        }

        // One aligned uniform slot per draw for the combined matrices.
        if !draws.is_empty() {
            let needed = draws.len() as u64 * UNIFORM_ALIGN;
            if self.uniforms.is_none() || self.uniform_capacity < needed {
                let capacity = needed.next_power_of_two().max(UNIFORM_ALIGN);
                let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("combined matrix uniforms"),
                    size: capacity,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("camera bind group"),
                    layout: &self.camera_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &buffer,
                            offset: 0,
                            size: wgpu::BufferSize::new(64),
                        }),
                    }],
                });
                self.uniforms = Some((buffer, bind_group));
                self.uniform_capacity = capacity;
            }

            let mut bytes = vec![0u8; needed as usize];
            for (i, draw) in draws.iter().enumerate() {
                let start = i * UNIFORM_ALIGN as usize;
                bytes[start..start + 64].copy_from_slice(bytemuck::bytes_of(&draw.matrix));
            }
            if let Some((buffer, _)) = &self.uniforms {
                self.gpu.queue.write_buffer(buffer, 0, &bytes);
            }
        }

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("brandr frame encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sprite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear[0],
                            g: clear[1],
                            b: clear[2],
                            a: clear[3],
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (i, draw) in draws.iter().enumerate() {
                let Some(pipeline) = self
                    .shaders
                    .get(draw.shader.0 as usize)
                    .and_then(|s| s.as_ref())
                    .and_then(|s| s.pipelines.get(&draw.blend))
                else {
                    continue;
                };
                let Some(texture) = self.textures.get(draw.texture.0 as usize) else {
                    log::warn!("draw references unknown texture {:?}; skipping", draw.texture);
                    continue;
                };
                let Some(Some(BufferEntry::Index { buffer: index_buffer })) =
                    self.buffers.get(draw.index_buffer.0 as usize)
                else {
                    log::warn!("draw references unknown index buffer; skipping");
                    continue;
                };
                let (Some(arena), Some((_, camera_bind_group))) = (&self.arena, &self.uniforms)
                else {
                    continue;
                };

                pass.set_pipeline(pipeline);
                pass.set_bind_group(
                    0,
                    camera_bind_group,
                    &[(i as u64 * UNIFORM_ALIGN) as u32],
                );
                pass.set_bind_group(1, &texture.bind_group, &[]);
                pass.set_vertex_buffer(
                    0,
                    arena.slice(draw.vertex_offset..draw.vertex_offset + draw.vertex_len),
                );
                pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.staging.clear();
        self.pending_upload = None;
        Ok(())
    }

    /// Create the pipeline for a (shader, blend) pair if it doesn't exist.
    fn ensure_pipeline(&mut self, shader: ShaderId, blend: Option<BlendState>) {
        let format = self.gpu.surface_format();
        let Some(Some(entry)) = self.shaders.get_mut(shader.0 as usize) else {
            log::warn!("draw references unknown shader {shader:?}");
            return;
        };
        if entry.pipelines.contains_key(&blend) {
            return;
        }

        let pipeline = self
            .gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("sprite pipeline"),
                layout: Some(&entry.layout),
                vertex: wgpu::VertexState {
                    module: &entry.module,
                    entry_point: Some("vs_main"),
                    buffers: &[VERTEX_LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &entry.module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: blend.map(wgpu_blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None, // sprites are double-sided
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        entry.pipelines.insert(blend, pipeline);
    }
}

impl RenderDevice for WgpuDevice {
    fn create_vertex_buffer(&mut self, capacity: u64) -> BufferId {
        // Vertex data is staged per-frame in the arena; the entry only
        // tracks capacity for upload validation.
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Some(BufferEntry::Vertex { capacity }));
        id
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> BufferId {
        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sprite index buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Some(BufferEntry::Index { buffer }));
        id
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = None; // wgpu frees the GPU object on drop
        }
    }

    fn create_shader(&mut self, source: &str) -> Result<ShaderId, RenderError> {
        self.gpu
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("sprite shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompile(err.to_string()));
        }

        let layout = self
            .gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("sprite pipeline layout"),
                bind_group_layouts: &[&self.camera_layout, &self.texture_layout],
                push_constant_ranges: &[],
            });

        let id = ShaderId(self.shaders.len() as u32);
        self.shaders.push(Some(ShaderEntry {
            module,
            layout,
            pipelines: HashMap::new(),
        }));
        Ok(id)
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        if let Some(slot) = self.shaders.get_mut(shader.0 as usize) {
            *slot = None;
        }
    }

    fn upload_vertices(&mut self, buffer: BufferId, data: &[u8]) {
        match self.buffers.get(buffer.0 as usize) {
            Some(Some(BufferEntry::Vertex { capacity })) => {
                if data.len() as u64 > *capacity {
                    log::warn!(
                        "vertex upload of {} bytes exceeds buffer capacity {capacity}; dropping",
                        data.len()
                    );
                    return;
                }
            }
            _ => {
                log::warn!("vertex upload to unknown buffer {buffer:?}; dropping");
                return;
            }
        }
        let offset = self.staging.len() as u64;
        self.staging.extend_from_slice(data);
        self.pending_upload = Some((buffer, offset, data.len() as u64));
    }

    fn draw_indexed(&mut self, cmd: &DrawCommand) {
        let Some((buffer, vertex_offset, vertex_len)) = self.pending_upload.take() else {
            log::warn!("draw without a preceding vertex upload; skipping");
            return;
        };
        if buffer != cmd.vertex_buffer {
            log::warn!("draw vertex buffer does not match last upload; skipping");
            return;
        }
        self.draws.push(FrameDraw {
            vertex_offset,
            vertex_len,
            index_buffer: cmd.index_buffer,
            index_count: cmd.index_count,
            texture: cmd.texture,
            shader: cmd.shader,
            blend: cmd.blend,
            matrix: cmd.combined.to_cols_array_2d(),
        });
    }

    fn depth_write(&self) -> bool {
        // The sprite pass carries no depth attachment, so the flag is pure
        // bookkeeping for the batch's save/restore protocol.
        self.depth_write
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
    }
}

fn wgpu_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn wgpu_blend(blend: BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu_factor(blend.src_color),
            dst_factor: wgpu_factor(blend.dst_color),
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu_factor(blend.src_alpha),
            dst_factor: wgpu_factor(blend.dst_alpha),
            operation: wgpu::BlendOperation::Add,
        },
    }
}
