//! Person segmentation inputs.

use matte_core::{Frame, MatteResolution};

use crate::device::GpuDevice;

/// Supplies camera frames and derives person mattes from them.
///
/// `generate_*` calls may encode GPU work into `cmd`; the returned textures
/// are only valid for reading after `cmd` has been submitted.
pub trait FrameSource<D: GpuDevice> {
    /// The most recent captured frame, if any.
    fn current_frame(&mut self) -> Option<Frame>;

    /// Single-channel person alpha matte for `frame`.
    fn generate_matte(
        &mut self,
        device: &D,
        frame: &Frame,
        resolution: MatteResolution,
        cmd: &mut D::CommandBuffer,
    ) -> D::Texture;

    /// Single-channel float depth estimate, dilated to cover the matte.
    fn generate_dilated_depth(
        &mut self,
        device: &D,
        frame: &Frame,
        resolution: MatteResolution,
        cmd: &mut D::CommandBuffer,
    ) -> D::Texture;
}

/// Alpha and dilated-depth textures for one frame.
#[derive(Debug, Clone)]
pub struct MatteTextures<T> {
    pub alpha: T,
    pub dilated_depth: T,
}

/// Requests mattes from a [`FrameSource`] and holds the latest pair.
///
/// Frames without a capture leave the previous textures in place.
pub struct MatteProvider<D: GpuDevice> {
    resolution: MatteResolution,
    current: Option<MatteTextures<D::Texture>>,
    generated: u64,
}

impl<D: GpuDevice> MatteProvider<D> {
    pub fn new(resolution: MatteResolution) -> Self {
        Self {
            resolution,
            current: None,
            generated: 0,
        }
    }

    pub fn refresh<S: FrameSource<D> + ?Sized>(
        &mut self,
        device: &D,
        source: &mut S,
        frame: Option<&Frame>,
        cmd: &mut D::CommandBuffer,
    ) -> Option<&MatteTextures<D::Texture>> {
        let Some(frame) = frame else {
            tracing::trace!("no current frame, keeping previous matte");
            return self.current.as_ref();
        };

        let alpha = source.generate_matte(device, frame, self.resolution, cmd);
        let dilated_depth = source.generate_dilated_depth(device, frame, self.resolution, cmd);
        self.generated += 1;
        self.current = Some(MatteTextures {
            alpha,
            dilated_depth,
        });
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&MatteTextures<D::Texture>> {
        self.current.as_ref()
    }

    pub fn resolution(&self) -> MatteResolution {
        self.resolution
    }

    /// Number of mattes requested from the source so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }
}
