//! Offscreen wgpu presentation backend.
//!
//! Slots are persistent BGRA textures written with `Queue::write_texture`.
//! The upload fence is `Queue::on_submitted_work_done`, observed by polling
//! the device without blocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use playout_core::{PlayoutError, PlayoutResult, VideoFormat};
use playout_render::{GpuContext, ReadFrame};
use wgpu::util::DeviceExt;

use crate::backend::{BackendFactory, DisplayFlags, PresentBackend, SlotId, WindowEvent, WindowSpec};
use crate::fence::Fence;
use crate::geometry::{Coord, DrawCoords};

const SHADER: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}

struct Params {
    key_only: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(frame_tex, frame_sampler, in.uv);
    if (params.key_only != 0u) {
        return vec4<f32>(c.a, c.a, c.a, 1.0);
    }
    return c;
}
"#;

const SLOT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;
const SLOT_USAGE: wgpu::TextureUsages =
    wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST);
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Fence realized through a submitted-work-done callback.
pub struct WgpuFence {
    done: Arc<AtomicBool>,
    gpu: Arc<GpuContext>,
}

impl Fence for WgpuFence {
    fn is_signaled(&self) -> bool {
        if !self.done.load(Ordering::Acquire) {
            self.gpu.device.poll(wgpu::Maintain::Poll);
        }
        self.done.load(Ordering::Acquire)
    }
}

struct WgpuSlot {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    key_only: u32,
    _pad: [u32; 3],
}

pub struct WgpuBackend {
    gpu: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    target: wgpu::Texture,
    slots: HashMap<SlotId, WgpuSlot>,
    next_slot: u32,
    pending: Option<wgpu::CommandEncoder>,
    window_size: (u32, u32),
}

impl WgpuBackend {
    pub fn new(gpu: Arc<GpuContext>, spec: &WindowSpec) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("screen_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("screen_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
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
            label: Some("screen_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("screen_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Coord>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let filter = if spec.linear_filtering {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("screen_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });

        let window_size = (spec.width.max(1), spec.height.max(1));
        let target = Self::create_target(&gpu, window_size);

        Self {
            gpu,
            pipeline,
            bind_group_layout,
            sampler,
            target,
            slots: HashMap::new(),
            next_slot: 0,
            pending: None,
            window_size,
        }
    }

    /// Factory building backends on a shared device.
    pub fn factory(gpu: Arc<GpuContext>) -> BackendFactory {
        Arc::new(move |spec: &WindowSpec| {
            let backend: Box<dyn PresentBackend> = Box::new(WgpuBackend::new(gpu.clone(), spec));
            Ok(backend)
        })
    }

    fn create_target(gpu: &GpuContext, (width, height): (u32, u32)) -> wgpu::Texture {
        gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    fn bind_group(&self, view: &wgpu::TextureView, key_only: bool) -> wgpu::BindGroup {
        let params = Params {
            key_only: u32::from(key_only),
            _pad: [0; 3],
        };
        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("screen_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("screen_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
        })
    }
}

impl PresentBackend for WgpuBackend {
    fn check_capabilities(&self, format: &VideoFormat) -> PlayoutResult<()> {
        self.gpu.check_capabilities(format)
    }

    fn create_slot(&mut self, format: &VideoFormat) -> PlayoutResult<SlotId> {
        let texture = self.gpu.texture_pool.acquire(
            &self.gpu.device,
            Some("screen_slot"),
            format.width,
            format.height,
            SLOT_FORMAT,
            SLOT_USAGE,
        );
        let zeros = vec![0u8; format.size()];
        self.gpu.queue.write_texture(
            texture.as_image_copy(),
            &zeros,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(format.width * 4),
                rows_per_image: Some(format.height),
            },
            texture.size(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.insert(id, WgpuSlot { texture, view });
        Ok(id)
    }

    fn upload(&mut self, slot: SlotId, frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>> {
        let target = self
            .slots
            .get(&slot)
            .ok_or_else(|| PlayoutError::Backend(format!("unknown slot {}", slot.0)))?;
        let size = target.texture.size();
        if frame.width() != size.width || frame.height() != size.height {
            return Err(PlayoutError::FormatMismatch {
                expected: format!("{}x{}", size.width, size.height),
                actual: format!("{}x{}", frame.width(), frame.height()),
            });
        }

        self.gpu.queue.write_texture(
            target.texture.as_image_copy(),
            &frame.image().data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: Some(size.height),
            },
            size,
        );
        self.gpu.queue.submit(std::iter::empty());

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        self.gpu
            .queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        Ok(Box::new(WgpuFence {
            done,
            gpu: self.gpu.clone(),
        }))
    }

    fn display(&mut self, slot: SlotId, coords: &DrawCoords, flags: &DisplayFlags) -> PlayoutResult<()> {
        let source = self
            .slots
            .get(&slot)
            .ok_or_else(|| PlayoutError::Backend(format!("unknown slot {}", slot.0)))?;

        let passes: Vec<(&[Coord], bool)> = if coords.sbs_key {
            vec![(coords.fill(), false), (coords.key(), true)]
        } else {
            vec![(coords.fill(), flags.key_only)]
        };

        let vertices = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("screen_vertices"),
                contents: bytemuck::cast_slice(&coords.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let bind_groups: Vec<wgpu::BindGroup> = passes
            .iter()
            .map(|(_, key_only)| self.bind_group(&source.view, *key_only))
            .collect();

        let target_view = self.target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("screen_display"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("screen_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&self.pipeline);
            rpass.set_vertex_buffer(0, vertices.slice(..));

            let mut first = 0u32;
            for ((verts, _), bind_group) in passes.iter().zip(bind_groups.iter()) {
                let count = verts.len() as u32;
                rpass.set_bind_group(0, bind_group, &[]);
                rpass.draw(first..first + count, 0..1);
                first += count;
            }
        }

        self.pending = Some(encoder);
        Ok(())
    }

    fn present(&mut self) -> PlayoutResult<()> {
        if let Some(encoder) = self.pending.take() {
            self.gpu.queue.submit(Some(encoder.finish()));
        }
        self.gpu.device.poll(wgpu::Maintain::Poll);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        Vec::new()
    }

    fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    fn destroy_slot(&mut self, slot: SlotId) {
        if let Some(WgpuSlot { texture, view }) = self.slots.remove(&slot) {
            drop(view);
            self.gpu.texture_pool.release(texture, SLOT_FORMAT, SLOT_USAGE);
        }
    }
}
