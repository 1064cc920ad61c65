//! The composite pass.
//!
//! Owns the render pipeline, both quad vertex buffers, the uniform rings and
//! the two layer textures. Each frame it borrows the camera planes and the
//! matte pair and encodes exactly one triangle-strip draw.

use std::sync::Arc;

use matte_core::{
    CompareFunction, CompositeParameters, CullMode, FrameBuffer, MatteConfig, MatteError,
    MatteResult, PrimitiveTopology, Size2D, TextureFormat, TextureSlot,
};

use crate::device::{BufferUsage, GpuDevice, PipelineDesc, RenderEncoder, TextureDesc};
use crate::geometry::{VertexPlane, VERTEX_COUNT, VERTEX_STRIDE};
use crate::image_loader::LayerImage;
use crate::matte::MatteTextures;
use crate::planes::CameraPlanes;
use crate::ring::{InstanceUniforms, SharedUniforms, UniformRing};

/// Depth written into the placeholder depth texture.
const FAR_DEPTH: f32 = 1.0e4;

/// Label of the debug group wrapping the composite draw.
pub const COMPOSITE_DEBUG_GROUP: &str = "CompositePass";

pub const VIDEO_PLANE_BUFFER: &str = "video_plane_vertices";
pub const OVERLAY_PLANE_BUFFER: &str = "overlay_plane_vertices";
pub const SHARED_UNIFORM_BUFFER: &str = "shared_uniforms";
pub const ANCHOR_UNIFORM_BUFFER: &str = "anchor_uniforms";

/// Pipeline state for the composite pass as configured.
pub fn composite_pipeline_desc(config: &MatteConfig) -> PipelineDesc {
    PipelineDesc {
        label: "composite_pipeline".to_string(),
        vertex_entry: config.pipeline.vertex_entry.clone(),
        fragment_entry: config.pipeline.fragment_entry.clone(),
        color_format: config.target.color_format,
        depth_format: config.target.depth_format,
        sample_count: config.target.sample_count,
        depth_compare: CompareFunction::Always,
        depth_write_enabled: false,
        cull_mode: CullMode::None,
        topology: PrimitiveTopology::TriangleStrip,
        vertex_buffer_count: 2,
        vertex_stride: VERTEX_STRIDE,
        uniform_binding_size: std::mem::size_of::<SharedUniforms>() as u64,
    }
}

pub struct Compositor<D: GpuDevice> {
    device: Arc<D>,
    pipeline: D::Pipeline,
    pipeline_desc: PipelineDesc,
    video_plane_buffer: D::Buffer,
    overlay_plane_buffer: D::Buffer,
    shared_uniforms: UniformRing<D>,
    anchor_uniforms: UniformRing<D>,
    max_anchor_instances: usize,
    anchor_instances: Vec<InstanceUniforms>,
    front_layer: D::Texture,
    back_layer: D::Texture,
    placeholder_alpha: D::Texture,
    placeholder_depth: D::Texture,
    camera: Option<CameraPlanes<D::Texture>>,
    matte: Option<MatteTextures<D::Texture>>,
    params: CompositeParameters,
    viewport: Size2D,
    shared: SharedUniforms,
    frame_index: u32,
}

impl<D: GpuDevice> Compositor<D> {
    /// Build the pipeline and every persistent resource. Fails if the shader
    /// entry points are missing or the pipeline is rejected.
    pub fn new(device: Arc<D>, config: &MatteConfig) -> MatteResult<Self> {
        let pipeline_desc = composite_pipeline_desc(config);
        let pipeline = device.create_pipeline(&pipeline_desc)?;

        let base = VertexPlane::base();
        let plane_size = base.as_bytes().len() as u64;
        let video_plane_buffer =
            device.create_buffer(VIDEO_PLANE_BUFFER, plane_size, BufferUsage::Vertex);
        let overlay_plane_buffer =
            device.create_buffer(OVERLAY_PLANE_BUFFER, plane_size, BufferUsage::Vertex);
        device.write_buffer(&video_plane_buffer, 0, base.as_bytes());
        device.write_buffer(&overlay_plane_buffer, 0, base.as_bytes());

        let slots = config.pipeline.max_frames_in_flight;
        let max_anchor_instances = config.pipeline.max_anchor_instances;
        let shared_uniforms = UniformRing::new(
            device.as_ref(),
            SHARED_UNIFORM_BUFFER,
            slots,
            std::mem::size_of::<SharedUniforms>(),
        );
        let anchor_uniforms = UniformRing::new(
            device.as_ref(),
            ANCHOR_UNIFORM_BUFFER,
            slots,
            std::mem::size_of::<InstanceUniforms>() * max_anchor_instances,
        );

        let empty = FrameBuffer::solid(1, 1, [0; 4]);
        let front_layer = Self::upload_rgba(device.as_ref(), "front_layer", &empty);
        let back_layer = Self::upload_rgba(device.as_ref(), "back_layer", &empty);

        let placeholder_alpha = device.create_texture(
            "placeholder_alpha",
            TextureDesc::new(1, 1, TextureSlot::AlphaMatte.format()),
        );
        device.write_texture(&placeholder_alpha, &[0], 1);
        let placeholder_depth = device.create_texture(
            "placeholder_depth",
            TextureDesc::new(1, 1, TextureSlot::DilatedDepth.format()),
        );
        device.write_texture(&placeholder_depth, &FAR_DEPTH.to_ne_bytes(), 4);

        let mut params = CompositeParameters::default();
        params.set_normalized_distance(config.layers.back_layer_distance);

        tracing::info!(
            vertex = %pipeline_desc.vertex_entry,
            fragment = %pipeline_desc.fragment_entry,
            color = %pipeline_desc.color_format,
            depth = %pipeline_desc.depth_format,
            slots,
            "composite pipeline ready"
        );

        Ok(Self {
            device,
            pipeline,
            pipeline_desc,
            video_plane_buffer,
            overlay_plane_buffer,
            shared_uniforms,
            anchor_uniforms,
            max_anchor_instances,
            anchor_instances: Vec::new(),
            front_layer,
            back_layer,
            placeholder_alpha,
            placeholder_depth,
            camera: None,
            matte: None,
            params,
            viewport: Size2D::default(),
            shared: SharedUniforms::default(),
            frame_index: 0,
        })
    }

    fn upload_rgba(device: &D, label: &str, image: &FrameBuffer) -> D::Texture {
        let texture = device.create_texture(
            label,
            TextureDesc::new(image.width, image.height, TextureFormat::Rgba8Unorm),
        );
        device.write_texture(&texture, &image.data, image.bytes_per_row());
        texture
    }

    /// Replace both layer textures. Neither layer changes if either image
    /// normalizes to an empty buffer. Images larger than the device's
    /// texture limit are scaled down to fit.
    pub fn set_layers(&mut self, front: &LayerImage, back: &LayerImage) -> MatteResult<()> {
        let max = self.device.max_texture_dimension();
        let front = front.normalize_within(max);
        let back = back.normalize_within(max);
        for (name, image) in [("front", &front), ("back", &back)] {
            if image.width == 0 || image.height == 0 {
                return Err(MatteError::InvalidArgument(format!(
                    "{} layer image is empty",
                    name
                )));
            }
        }

        self.front_layer = Self::upload_rgba(&self.device, "front_layer", &front);
        self.back_layer = Self::upload_rgba(&self.device, "back_layer", &back);
        tracing::info!(
            front = %format!("{}x{}", front.width, front.height),
            back = %format!("{}x{}", back.width, back.height),
            "layer textures replaced"
        );
        Ok(())
    }

    /// Set the back-layer distance from a normalized control value in `[0, 1]`.
    pub fn set_back_layer_distance(&mut self, value: f32) {
        self.params.set_normalized_distance(value);
        tracing::debug!(
            value,
            distance = self.params.back_layer_distance,
            "back layer distance updated"
        );
    }

    pub fn back_layer_distance(&self) -> f32 {
        self.params.back_layer_distance
    }

    pub fn set_viewport(&mut self, viewport: Size2D) {
        self.viewport = viewport;
    }

    /// Upload freshly computed quad vertices.
    pub fn upload_image_planes(&mut self, video: &VertexPlane, overlay: &VertexPlane) {
        self.device
            .write_buffer(&self.video_plane_buffer, 0, video.as_bytes());
        self.device
            .write_buffer(&self.overlay_plane_buffer, 0, overlay.as_bytes());
    }

    /// Camera planes for the next [`composite`](Self::composite) call.
    pub fn set_camera_planes(&mut self, planes: Option<CameraPlanes<D::Texture>>) {
        self.camera = planes;
    }

    pub fn set_matte(&mut self, matte: Option<MatteTextures<D::Texture>>) {
        if matte.is_some() {
            self.matte = matte;
        }
    }

    /// Per-anchor instance data. Extra instances beyond the configured
    /// maximum are dropped.
    pub fn set_anchor_instances(&mut self, instances: &[InstanceUniforms]) {
        if instances.len() > self.max_anchor_instances {
            tracing::debug!(
                count = instances.len(),
                max = self.max_anchor_instances,
                "anchor instances truncated"
            );
        }
        let count = instances.len().min(self.max_anchor_instances);
        self.anchor_instances = instances[..count].to_vec();
    }

    /// Advance both uniform rings and write this frame's parameters into the
    /// new slots.
    pub fn prepare_frame(&mut self) {
        self.shared_uniforms.advance();
        self.anchor_uniforms.advance();

        self.shared = SharedUniforms {
            viewport_size: [self.viewport.width as f32, self.viewport.height as f32],
            back_layer_distance: self.params.back_layer_distance,
            frame_index: self.frame_index,
            video_range: 0,
            _padding: 0,
        };
        self.shared_uniforms
            .write_current(&self.device, bytemuck::bytes_of(&self.shared));
        if !self.anchor_instances.is_empty() {
            self.anchor_uniforms
                .write_current(&self.device, bytemuck::cast_slice(&self.anchor_instances));
        }
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    fn texture_for<'a>(
        &'a self,
        slot: TextureSlot,
        camera: &'a CameraPlanes<D::Texture>,
    ) -> &'a D::Texture {
        match slot {
            TextureSlot::CameraLuma => &camera.luma,
            TextureSlot::CameraChroma => &camera.chroma,
            TextureSlot::AlphaMatte => self
                .matte
                .as_ref()
                .map_or(&self.placeholder_alpha, |m| &m.alpha),
            TextureSlot::DilatedDepth => self
                .matte
                .as_ref()
                .map_or(&self.placeholder_depth, |m| &m.dilated_depth),
            TextureSlot::FrontLayer => &self.front_layer,
            TextureSlot::BackLayer => &self.back_layer,
        }
    }

    /// Encode the composite draw. Returns `false` without encoding anything
    /// when no camera planes were supplied for this frame.
    pub fn composite<E: RenderEncoder<D>>(&mut self, encoder: &mut E) -> bool {
        let Some(camera) = self.camera.take() else {
            tracing::debug!("camera planes missing, skipping composite draw");
            return false;
        };

        // The range is only known once the planes arrive.
        let video_range = u32::from(camera.video_range);
        if self.shared.video_range != video_range {
            self.shared.video_range = video_range;
            self.shared_uniforms
                .write_current(&self.device, bytemuck::bytes_of(&self.shared));
        }

        encoder.push_debug_group(COMPOSITE_DEBUG_GROUP);
        encoder.set_pipeline(&self.pipeline);
        encoder.set_vertex_buffer(0, &self.video_plane_buffer);
        encoder.set_vertex_buffer(1, &self.overlay_plane_buffer);
        encoder.set_uniform_buffer(
            self.shared_uniforms.buffer(),
            self.shared_uniforms.current_offset(),
        );
        for slot in TextureSlot::ALL {
            encoder.set_texture(slot, self.texture_for(slot, &camera));
        }
        encoder.draw_primitives(self.pipeline_desc.topology, 0, VERTEX_COUNT);
        encoder.pop_debug_group();
        true
    }

    pub fn pipeline_desc(&self) -> &PipelineDesc {
        &self.pipeline_desc
    }

    pub fn front_layer(&self) -> &D::Texture {
        &self.front_layer
    }

    pub fn back_layer(&self) -> &D::Texture {
        &self.back_layer
    }

    pub fn shared_uniforms(&self) -> &UniformRing<D> {
        &self.shared_uniforms
    }

    pub fn anchor_uniforms(&self) -> &UniformRing<D> {
        &self.anchor_uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{GpuTexture, RenderTarget};
    use crate::recording::{Command, RecordedTexture, RecordingDevice, RecordingTarget};

    fn compositor() -> (Arc<RecordingDevice>, Compositor<RecordingDevice>) {
        let device = Arc::new(RecordingDevice::new());
        let compositor = Compositor::new(device.clone(), &MatteConfig::default()).unwrap();
        (device, compositor)
    }

    fn camera(device: &RecordingDevice) -> CameraPlanes<RecordedTexture> {
        let luma = TextureDesc::new(4, 4, TextureFormat::R8Unorm);
        let chroma = TextureDesc::new(2, 2, TextureFormat::Rg8Unorm);
        CameraPlanes {
            luma: device.create_texture("luma", luma),
            chroma: device.create_texture("chroma", chroma),
            video_range: false,
        }
    }

    fn current_shared(
        device: &RecordingDevice,
        compositor: &Compositor<RecordingDevice>,
    ) -> SharedUniforms {
        let ring = device.buffer_named(SHARED_UNIFORM_BUFFER).unwrap();
        let offset = compositor.shared_uniforms().current_offset() as usize;
        let bytes = ring.contents();
        bytemuck::pod_read_unaligned(
            &bytes[offset..offset + std::mem::size_of::<SharedUniforms>()],
        )
    }

    fn layer(width: u32, height: u32, rgba: [u8; 4]) -> LayerImage {
        LayerImage::from_frame_buffer(FrameBuffer::solid(width, height, rgba)).unwrap()
    }

    fn encode(
        device: &RecordingDevice,
        compositor: &mut Compositor<RecordingDevice>,
    ) -> (bool, Vec<Command>) {
        let mut target = RecordingTarget::new();
        target.configure(device, &MatteConfig::default().target).unwrap();
        let pass = target.current_pass().unwrap();
        let mut cmd = device.create_command_buffer("test");
        let mut encoder = device.begin_render_pass(&mut cmd, &pass);
        let drew = compositor.composite(&mut encoder);
        encoder.end_encoding();
        (drew, cmd.commands)
    }

    #[test]
    fn test_pipeline_state_is_fixed() {
        let desc = composite_pipeline_desc(&MatteConfig::default());
        assert_eq!(desc.depth_compare, CompareFunction::Always);
        assert!(!desc.depth_write_enabled);
        assert_eq!(desc.topology, PrimitiveTopology::TriangleStrip);
        assert_eq!(desc.color_format, TextureFormat::Bgra8Unorm);
        assert_eq!(desc.depth_format, TextureFormat::Depth32Float);
        assert_eq!(desc.sample_count, 1);
    }

    #[test]
    fn test_missing_shader_entry_is_fatal() {
        let device = Arc::new(RecordingDevice::new());
        let mut config = MatteConfig::default();
        config.pipeline.fragment_entry = "nope".to_string();
        let result = Compositor::new(device, &config);
        assert!(matches!(result, Err(MatteError::ShaderFunctionMissing { .. })));
    }

    #[test]
    fn test_layers_start_as_transparent_placeholders() {
        let (_device, compositor) = compositor();
        assert_eq!(compositor.front_layer().desc().width, 1);
        assert_eq!(compositor.back_layer().contents(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_set_layers_uploads_rgba_with_source_dimensions() {
        let (_device, mut compositor) = compositor();
        compositor
            .set_layers(&layer(8, 4, [255, 0, 0, 255]), &layer(2, 2, [0, 255, 0, 128]))
            .unwrap();

        let front = compositor.front_layer();
        assert_eq!(front.desc(), TextureDesc::new(8, 4, TextureFormat::Rgba8Unorm));
        assert_eq!(&front.contents()[..4], &[255, 0, 0, 255]);
        assert_eq!(&compositor.back_layer().contents()[..4], &[0, 255, 0, 128]);
    }

    #[test]
    fn test_set_layers_twice_keeps_latest() {
        let (_device, mut compositor) = compositor();
        let front = layer(2, 2, [1, 2, 3, 4]);
        let back = layer(2, 2, [5, 6, 7, 8]);
        compositor.set_layers(&front, &back).unwrap();
        let first = compositor.front_layer().contents();
        compositor.set_layers(&front, &back).unwrap();
        assert_eq!(compositor.front_layer().contents(), first);
    }

    #[test]
    fn test_distance_reaches_shared_uniforms() {
        let (device, mut compositor) = compositor();
        compositor.set_back_layer_distance(1.0);
        compositor.prepare_frame();
        assert_eq!(current_shared(&device, &compositor).back_layer_distance, 5.0);
    }

    #[test]
    fn test_video_range_planes_set_the_range_flag() {
        let (device, mut compositor) = compositor();
        compositor.prepare_frame();
        let mut planes = camera(&device);
        planes.video_range = true;
        compositor.set_camera_planes(Some(planes));
        assert!(encode(&device, &mut compositor).0);
        assert_eq!(current_shared(&device, &compositor).video_range, 1);

        // The next slot starts at full range again.
        compositor.prepare_frame();
        compositor.set_camera_planes(Some(camera(&device)));
        assert!(encode(&device, &mut compositor).0);
        assert_eq!(current_shared(&device, &compositor).video_range, 0);
    }

    #[test]
    fn test_oversized_layer_is_scaled_to_the_device_limit() {
        let device = Arc::new(RecordingDevice::new().with_max_texture_dimension(64));
        let mut compositor = Compositor::new(device.clone(), &MatteConfig::default()).unwrap();
        compositor
            .set_layers(&layer(256, 128, [9, 9, 9, 255]), &layer(32, 16, [0; 4]))
            .unwrap();

        assert_eq!(compositor.front_layer().desc().width, 64);
        assert_eq!(compositor.front_layer().desc().height, 32);
        assert_eq!(compositor.back_layer().desc().width, 32);
        assert_eq!(device.validation_errors(), 0);
    }

    #[test]
    fn test_prepare_frame_cycles_ring_slots() {
        let (_device, mut compositor) = compositor();
        let mut offsets = Vec::new();
        for _ in 0..4 {
            compositor.prepare_frame();
            offsets.push(compositor.shared_uniforms().current_offset());
        }
        assert_eq!(offsets, vec![0, 256, 512, 0]);
    }

    #[test]
    fn test_composite_encodes_one_strip_draw() {
        let (device, mut compositor) = compositor();
        compositor.prepare_frame();
        compositor.set_camera_planes(Some(camera(&device)));
        let (drew, commands) = encode(&device, &mut compositor);
        assert!(drew);

        let draws: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .collect();
        assert_eq!(
            draws,
            vec![&Command::Draw {
                topology: PrimitiveTopology::TriangleStrip,
                vertex_start: 0,
                vertex_count: 4,
            }]
        );
        let slots: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::SetTexture { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, TextureSlot::ALL.to_vec());
        assert!(commands.contains(&Command::PushDebugGroup(COMPOSITE_DEBUG_GROUP.to_string())));
    }

    #[test]
    fn test_composite_without_camera_draws_nothing() {
        let (device, mut compositor) = compositor();
        compositor.set_camera_planes(Some(camera(&device)));
        assert!(encode(&device, &mut compositor).0);
        // Planes are consumed by the draw.
        let (drew, commands) = encode(&device, &mut compositor);
        assert!(!drew);
        assert!(!commands.iter().any(|c| matches!(c, Command::Draw { .. })));
    }

    #[test]
    fn test_anchor_instances_are_capped() {
        let (device, mut compositor) = compositor();
        compositor.set_anchor_instances(&vec![InstanceUniforms::default(); 100]);
        compositor.prepare_frame();
        let ring = device.buffer_named(ANCHOR_UNIFORM_BUFFER).unwrap();
        assert_eq!(
            compositor.anchor_uniforms().allocator().stride(),
            64 * 64
        );
        assert_eq!(ring.contents().len(), 64 * 64 * 3);
    }
}
