//! Device capability seams.
//!
//! The compositing core talks to the GPU only through these traits, so the
//! whole per-frame pipeline runs unchanged against the wgpu backend
//! ([`crate::gpu::GpuContext`]) or the CPU-only [`crate::recording::RecordingDevice`].

use matte_core::{
    CompareFunction, CullMode, MatteResult, PrimitiveTopology, TargetConfig, TextureFormat,
    TextureSlot,
};

/// Callback fired once the GPU has finished a committed command buffer.
/// May run on a driver-owned thread.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Shape of a 2-D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Tightly packed row size in bytes.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Uniform,
}

/// Everything needed to build the composite render pipeline.
///
/// Depth-stencil, cull and topology state are baked into the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub sample_count: u32,
    pub depth_compare: CompareFunction,
    pub depth_write_enabled: bool,
    pub cull_mode: CullMode,
    pub topology: PrimitiveTopology,
    /// Number of vertex buffers, each bound at its own slot.
    pub vertex_buffer_count: u32,
    pub vertex_stride: u64,
    /// Byte size of the uniform binding read by the fragment stage.
    pub uniform_binding_size: u64,
}

/// A GPU-resident texture that can describe itself.
pub trait GpuTexture {
    fn desc(&self) -> TextureDesc;
}

/// The GPU capability the compositing core is written against.
pub trait GpuDevice: Send + Sync + 'static {
    type Texture: GpuTexture + Clone + Send + Sync + 'static;
    type Buffer: Clone + Send + Sync + 'static;
    type Pipeline: Send + Sync;
    type CommandBuffer: Send;
    /// Per-frame render destination (color + depth attachments).
    type PassTarget;
    type Encoder<'a>: RenderEncoder<Self>
    where
        Self: 'a;

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> Self::Buffer;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn create_texture(&self, label: &str, desc: TextureDesc) -> Self::Texture;

    /// Replace the full contents of `texture`. `bytes_per_row` is the row pitch of `data`.
    fn write_texture(&self, texture: &Self::Texture, data: &[u8], bytes_per_row: u32);

    fn create_pipeline(&self, desc: &PipelineDesc) -> MatteResult<Self::Pipeline>;

    fn create_command_buffer(&self, label: &str) -> Self::CommandBuffer;

    fn begin_render_pass<'a>(
        &'a self,
        cmd: &'a mut Self::CommandBuffer,
        target: &'a Self::PassTarget,
    ) -> Self::Encoder<'a>;

    /// Submit `cmd`; `on_complete` runs once the GPU has retired it.
    fn commit(&self, cmd: Self::CommandBuffer, on_complete: CompletionHandler);

    /// Drive pending completion callbacks. With `wait`, block until the
    /// oldest outstanding command buffer has retired.
    fn poll(&self, wait: bool);

    /// Block until every submitted command buffer has retired.
    fn wait_idle(&self);

    /// Largest width or height accepted by `create_texture`.
    fn max_texture_dimension(&self) -> u32;
}

/// Records draw state for one render pass.
pub trait RenderEncoder<D: GpuDevice + ?Sized> {
    fn push_debug_group(&mut self, label: &str);

    fn pop_debug_group(&mut self);

    fn set_pipeline(&mut self, pipeline: &D::Pipeline);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &D::Buffer);

    fn set_uniform_buffer(&mut self, buffer: &D::Buffer, offset: u64);

    fn set_texture(&mut self, slot: TextureSlot, texture: &D::Texture);

    fn draw_primitives(
        &mut self,
        topology: PrimitiveTopology,
        vertex_start: u32,
        vertex_count: u32,
    );

    fn end_encoding(self)
    where
        Self: Sized;
}

/// The external presentation surface.
pub trait RenderTarget<D: GpuDevice> {
    /// Apply the formats chosen by the compositor. Called once at startup.
    fn configure(&mut self, device: &D, config: &TargetConfig) -> MatteResult<()>;

    /// The pass target for this frame, or `None` when the surface is not ready.
    fn current_pass(&mut self) -> Option<D::PassTarget>;

    /// Schedule presentation of `pass` once `cmd` completes.
    fn present(&mut self, device: &D, cmd: &mut D::CommandBuffer, pass: D::PassTarget);
}
