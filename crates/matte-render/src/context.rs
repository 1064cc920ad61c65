//! The per-session render context.

use std::sync::Arc;

use matte_core::{DeviceOrientation, Frame, MatteConfig, MatteResult, Size2D};

use crate::compositor::Compositor;
use crate::device::{GpuDevice, RenderTarget};
use crate::geometry::GeometryUpdater;
use crate::image_loader::LayerImage;
use crate::matte::{FrameSource, MatteProvider};
use crate::planes::FramePlaneExtractor;
use crate::ring::InstanceUniforms;

/// Everything the frame scheduler drives: the device, the compositor and the
/// per-frame producers feeding it.
pub struct RenderContext<D: GpuDevice> {
    device: Arc<D>,
    config: MatteConfig,
    compositor: Compositor<D>,
    extractor: FramePlaneExtractor<D>,
    matte: MatteProvider<D>,
    geometry: GeometryUpdater,
}

impl<D: GpuDevice> RenderContext<D> {
    /// Validate `config`, configure `target` with the compositor's formats and
    /// build the pipeline.
    pub fn new<T: RenderTarget<D>>(
        device: Arc<D>,
        target: &mut T,
        config: MatteConfig,
    ) -> MatteResult<Self> {
        config.validate()?;
        target.configure(&device, &config.target)?;

        let mut compositor = Compositor::new(device.clone(), &config)?;
        let mut geometry = GeometryUpdater::new(config.source.orientation);
        let viewport = Size2D::new(config.target.width as f64, config.target.height as f64);
        geometry.resize(viewport);
        compositor.set_viewport(viewport);

        Ok(Self {
            matte: MatteProvider::new(config.pipeline.matte_resolution),
            extractor: FramePlaneExtractor::new(),
            device,
            config,
            compositor,
            geometry,
        })
    }

    /// The drawable changed size. Quads are rebuilt on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        let viewport = Size2D::new(width as f64, height as f64);
        self.geometry.resize(viewport);
        self.compositor.set_viewport(viewport);
    }

    pub fn set_orientation(&mut self, orientation: DeviceOrientation) {
        self.geometry.set_orientation(orientation);
    }

    pub fn set_layers(&mut self, front: &LayerImage, back: &LayerImage) -> MatteResult<()> {
        self.compositor.set_layers(front, back)
    }

    pub fn set_back_layer_distance(&mut self, value: f32) {
        self.compositor.set_back_layer_distance(value);
    }

    pub fn set_anchor_instances(&mut self, instances: &[InstanceUniforms]) {
        self.compositor.set_anchor_instances(instances);
    }

    /// Upload the camera planes of `frame` for this frame's draw. Returns
    /// `false` when the frame could not be split into planes.
    pub(crate) fn update_camera(&mut self, frame: &Frame) -> bool {
        let planes = self
            .extractor
            .extract(&self.device, &frame.captured_image);
        let found = planes.is_some();
        self.compositor.set_camera_planes(planes);
        found
    }

    /// Rebuild the quads if the viewport changed since the last frame.
    pub(crate) fn update_geometry(&mut self, frame: &Frame) {
        if self.geometry.update_if_needed(frame) {
            self.compositor
                .upload_image_planes(self.geometry.video_plane(), self.geometry.overlay_plane());
        }
    }

    pub(crate) fn update_matte<S: FrameSource<D> + ?Sized>(
        &mut self,
        source: &mut S,
        frame: Option<&Frame>,
        cmd: &mut D::CommandBuffer,
    ) {
        let matte = self
            .matte
            .refresh(&self.device, source, frame, cmd)
            .cloned();
        self.compositor.set_matte(matte);
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &MatteConfig {
        &self.config
    }

    pub fn compositor(&self) -> &Compositor<D> {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor<D> {
        &mut self.compositor
    }

    pub fn extractor(&self) -> &FramePlaneExtractor<D> {
        &self.extractor
    }

    pub fn matte(&self) -> &MatteProvider<D> {
        &self.matte
    }

    pub fn geometry(&self) -> &GeometryUpdater {
        &self.geometry
    }
}
