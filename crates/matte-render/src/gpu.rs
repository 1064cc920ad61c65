use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use matte_core::{
    CompareFunction, CullMode, MatteError, MatteResult, PrimitiveTopology, TextureFormat,
    TextureSlot,
};
use wgpu::{Adapter, Device, Instance, Queue};

use crate::device::{
    BufferUsage, CompletionHandler, GpuDevice, GpuTexture, PipelineDesc, RenderEncoder,
    TextureDesc,
};
use crate::shader::{check_entry_points, COMPOSITE_SHADER};

pub fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn to_wgpu_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn to_wgpu_cull(cull: CullMode) -> Option<wgpu::Face> {
    match cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

fn to_wgpu_compare(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Always => wgpu::CompareFunction::Always,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
    }
}

#[derive(Debug)]
pub struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

/// A wgpu texture with its default view.
#[derive(Debug, Clone)]
pub struct WgpuTexture(Arc<TextureEntry>);

impl WgpuTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.0.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.0.view
    }
}

impl GpuTexture for WgpuTexture {
    fn desc(&self) -> TextureDesc {
        self.0.desc
    }
}

pub type WgpuBuffer = Arc<wgpu::Buffer>;

#[derive(Debug)]
pub struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    topology: PrimitiveTopology,
    uniform_binding_size: u64,
}

#[derive(Debug, Clone)]
pub struct WgpuPipeline(Arc<PipelineEntry>);

/// Color and depth attachments for one frame.
#[derive(Debug, Clone)]
pub struct WgpuPassTarget {
    pub color: WgpuTexture,
    pub depth: WgpuTexture,
}

/// Submissions not yet reported complete, oldest first.
type InFlight = Arc<Mutex<VecDeque<(u64, wgpu::SubmissionIndex)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A shared context for all GPU-accelerated operations.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    in_flight: InFlight,
    next_submission: AtomicU64,
}

impl GpuContext {
    /// Initializes wgpu, selecting the best available backend (Metal, Vulkan, DX12, etc.)
    pub fn init() -> MatteResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless rendering
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| MatteError::DeviceUnavailable("no suitable wgpu adapter".to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Matte GPU Device"),
                required_features: wgpu::Features::empty(),
                // The adapter's own limits; downlevel defaults cap textures at 2048.
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|e| MatteError::DeviceUnavailable(e.to_string()))?;

        let ctx = Self {
            instance,
            adapter,
            device,
            queue,
            in_flight: Arc::new(Mutex::new(VecDeque::new())),
            next_submission: AtomicU64::new(0),
        };
        tracing::info!(
            adapter = %ctx.adapter_summary(),
            max_texture_dimension = ctx.device.limits().max_texture_dimension_2d,
            "gpu device ready"
        );
        Ok(ctx)
    }

    pub fn adapter_summary(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type)
    }

    pub(crate) fn create_texture_with_usage(
        &self,
        label: &str,
        desc: TextureDesc,
        usage: wgpu::TextureUsages,
    ) -> WgpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: to_wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTexture(Arc::new(TextureEntry {
            texture,
            view,
            desc,
        }))
    }

    fn bind_group_layout_entries(desc: &PipelineDesc) -> Vec<wgpu::BindGroupLayoutEntry> {
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = TextureSlot::ALL
            .iter()
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot.index(),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float {
                        filterable: slot.format() != TextureFormat::R32Float,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: TextureSlot::SAMPLER_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: TextureSlot::UNIFORM_BINDING,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(desc.uniform_binding_size),
            },
            count: None,
        });
        entries
    }
}

impl GpuDevice for GpuContext {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;
    type Pipeline = WgpuPipeline;
    type CommandBuffer = wgpu::CommandEncoder;
    type PassTarget = WgpuPassTarget;
    type Encoder<'a> = WgpuEncoder<'a>;

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> WgpuBuffer {
        let usage = match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
        };
        Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_texture(&self, label: &str, desc: TextureDesc) -> WgpuTexture {
        self.create_texture_with_usage(
            label,
            desc,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        )
    }

    fn write_texture(&self, texture: &WgpuTexture, data: &[u8], bytes_per_row: u32) {
        let desc = texture.desc();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> MatteResult<WgpuPipeline> {
        check_entry_points(COMPOSITE_SHADER, &desc.vertex_entry, &desc.fragment_entry)?;
        if desc.vertex_buffer_count != 2 {
            return Err(MatteError::Pipeline(format!(
                "composite shader reads 2 vertex buffers, got {}",
                desc.vertex_buffer_count
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let layout_entries = Self::bind_group_layout_entries(desc);
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("composite_bind_group_layout"),
                    entries: &layout_entries,
                });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("composite_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let video_attributes = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
        let overlay_attributes = wgpu::vertex_attr_array![2 => Float32x2, 3 => Float32x2];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label.as_str()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: &desc.vertex_entry,
                    buffers: &[
                        wgpu::VertexBufferLayout {
                            array_stride: desc.vertex_stride,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &video_attributes,
                        },
                        wgpu::VertexBufferLayout {
                            array_stride: desc.vertex_stride,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &overlay_attributes,
                        },
                    ],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: &desc.fragment_entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: to_wgpu_format(desc.color_format),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: to_wgpu_topology(desc.topology),
                    cull_mode: to_wgpu_cull(desc.cull_mode),
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: to_wgpu_format(desc.depth_format),
                    depth_write_enabled: desc.depth_write_enabled,
                    depth_compare: to_wgpu_compare(desc.depth_compare),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count,
                    ..Default::default()
                },
                multiview: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(MatteError::Pipeline(error.to_string()));
        }

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("composite_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(WgpuPipeline(Arc::new(PipelineEntry {
            pipeline,
            bind_group_layout,
            sampler,
            topology: desc.topology,
            uniform_binding_size: desc.uniform_binding_size,
        })))
    }

    fn create_command_buffer(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn begin_render_pass<'a>(
        &'a self,
        cmd: &'a mut wgpu::CommandEncoder,
        target: &'a WgpuPassTarget,
    ) -> WgpuEncoder<'a> {
        WgpuEncoder {
            ctx: self,
            encoder: cmd,
            target,
            pipeline: None,
            vertex_buffers: Vec::new(),
            uniform: None,
            textures: Vec::new(),
            ops: Vec::new(),
        }
    }

    fn commit(&self, cmd: wgpu::CommandEncoder, on_complete: CompletionHandler) {
        let id = self.next_submission.fetch_add(1, Ordering::Relaxed);
        let index = self.queue.submit(Some(cmd.finish()));
        lock(&self.in_flight).push_back((id, index));

        let in_flight = self.in_flight.clone();
        self.queue.on_submitted_work_done(move || {
            lock(&in_flight).retain(|(pending, _)| *pending != id);
            on_complete();
        });
    }

    fn poll(&self, wait: bool) {
        // Clone the index so the lock is released before callbacks run.
        let oldest = if wait {
            lock(&self.in_flight).front().map(|(_, index)| index.clone())
        } else {
            None
        };
        let maintain = match oldest {
            Some(index) => wgpu::Maintain::WaitForSubmissionIndex(index),
            None => wgpu::Maintain::Poll,
        };
        let _ = self.device.poll(maintain);
    }

    fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}

struct DrawCall {
    pipeline: WgpuPipeline,
    vertex_buffers: Vec<(u32, WgpuBuffer)>,
    uniform: (WgpuBuffer, u64),
    textures: Vec<(TextureSlot, WgpuTexture)>,
    vertices: Range<u32>,
}

enum PassOp {
    PushDebugGroup(String),
    PopDebugGroup,
    Draw(DrawCall),
}

/// Collects state and draws, then records them into a single render pass
/// when encoding ends. A pass with no draws is never begun, so the target
/// keeps its previous contents.
pub struct WgpuEncoder<'a> {
    ctx: &'a GpuContext,
    encoder: &'a mut wgpu::CommandEncoder,
    target: &'a WgpuPassTarget,
    pipeline: Option<WgpuPipeline>,
    vertex_buffers: Vec<(u32, WgpuBuffer)>,
    uniform: Option<(WgpuBuffer, u64)>,
    textures: Vec<(TextureSlot, WgpuTexture)>,
    ops: Vec<PassOp>,
}

impl WgpuEncoder<'_> {
    fn bind_group(&self, call: &DrawCall) -> wgpu::BindGroup {
        let pipeline = &call.pipeline.0;
        let mut entries: Vec<wgpu::BindGroupEntry> = call
            .textures
            .iter()
            .map(|(slot, texture)| wgpu::BindGroupEntry {
                binding: slot.index(),
                resource: wgpu::BindingResource::TextureView(texture.view()),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: TextureSlot::SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&pipeline.sampler),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: TextureSlot::UNIFORM_BINDING,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &call.uniform.0,
                offset: call.uniform.1,
                size: NonZeroU64::new(pipeline.uniform_binding_size),
            }),
        });
        self.ctx
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("composite_bind_group"),
                layout: &pipeline.bind_group_layout,
                entries: &entries,
            })
    }
}

impl RenderEncoder<GpuContext> for WgpuEncoder<'_> {
    fn push_debug_group(&mut self, label: &str) {
        self.ops.push(PassOp::PushDebugGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.ops.push(PassOp::PopDebugGroup);
    }

    fn set_pipeline(&mut self, pipeline: &WgpuPipeline) {
        self.pipeline = Some(pipeline.clone());
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &WgpuBuffer) {
        self.vertex_buffers.retain(|(s, _)| *s != slot);
        self.vertex_buffers.push((slot, buffer.clone()));
    }

    fn set_uniform_buffer(&mut self, buffer: &WgpuBuffer, offset: u64) {
        self.uniform = Some((buffer.clone(), offset));
    }

    fn set_texture(&mut self, slot: TextureSlot, texture: &WgpuTexture) {
        self.textures.retain(|(s, _)| *s != slot);
        self.textures.push((slot, texture.clone()));
    }

    fn draw_primitives(
        &mut self,
        topology: PrimitiveTopology,
        vertex_start: u32,
        vertex_count: u32,
    ) {
        let (Some(pipeline), Some(uniform)) = (self.pipeline.clone(), self.uniform.clone())
        else {
            tracing::warn!("draw without pipeline or uniforms, ignored");
            return;
        };
        if self.textures.len() != TextureSlot::ALL.len() {
            tracing::warn!(
                bound = self.textures.len(),
                "draw with unbound texture slots, ignored"
            );
            return;
        }
        if pipeline.0.topology != topology {
            tracing::warn!(?topology, "draw topology differs from the pipeline's, ignored");
            return;
        }
        self.ops.push(PassOp::Draw(DrawCall {
            pipeline,
            vertex_buffers: self.vertex_buffers.clone(),
            uniform,
            textures: self.textures.clone(),
            vertices: vertex_start..vertex_start + vertex_count,
        }));
    }

    fn end_encoding(self) {
        if !self.ops.iter().any(|op| matches!(op, PassOp::Draw(_))) {
            return;
        }

        let bind_groups: Vec<Option<wgpu::BindGroup>> = self
            .ops
            .iter()
            .map(|op| match op {
                PassOp::Draw(call) => Some(self.bind_group(call)),
                _ => None,
            })
            .collect();

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("composite_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.target.color.view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.target.depth.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for (op, bind_group) in self.ops.iter().zip(bind_groups.iter()) {
            match (op, bind_group) {
                (PassOp::PushDebugGroup(label), _) => pass.push_debug_group(label),
                (PassOp::PopDebugGroup, _) => pass.pop_debug_group(),
                (PassOp::Draw(call), Some(bind_group)) => {
                    pass.set_pipeline(&call.pipeline.0.pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    for (slot, buffer) in &call.vertex_buffers {
                        pass.set_vertex_buffer(*slot, buffer.slice(..));
                    }
                    pass.draw(call.vertices.clone(), 0..1);
                }
                (PassOp::Draw(_), None) => {}
            }
        }
    }
}
