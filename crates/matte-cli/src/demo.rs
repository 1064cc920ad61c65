//! Synthetic inputs for headless sessions.
//!
//! Stands in for a live camera and segmentation model: NV12 colour bars with a
//! circular "subject" in the middle whose matte and depth are known exactly.

use matte_core::{
    Frame, FrameBuffer, MatteResolution, PixelBuffer, PlanarLayout, Plane, TextureFormat,
};
use matte_render::{FrameSource, GpuDevice, TextureDesc};

/// Depth of the synthetic subject, in the same units as the back-layer distance.
pub const SUBJECT_DEPTH: f32 = 1.5;
pub const BACKGROUND_DEPTH: f32 = 8.0;

/// Subject radius as a fraction of the shorter image side.
const SUBJECT_RADIUS: f32 = 0.3;
/// Depth is dilated past the matte edge by this factor.
const DEPTH_DILATION: f32 = 1.1;

const STRIPE_WIDTH: u32 = 50;

/// 75% colour bars: white, yellow, cyan, green, magenta, red, blue, black.
const BARS: [[f32; 3]; 8] = [
    [0.75, 0.75, 0.75],
    [0.75, 0.75, 0.0],
    [0.0, 0.75, 0.75],
    [0.0, 0.75, 0.0],
    [0.75, 0.0, 0.75],
    [0.75, 0.0, 0.0],
    [0.0, 0.0, 0.75],
    [0.0, 0.0, 0.0],
];

/// BT.601 full-range RGB to YCbCr, 8 bits per channel.
fn rgb_to_ycbcr([r, g, b]: [f32; 3]) -> [u8; 3] {
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 0.5 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 0.5 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    [y, cb, cr].map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Bi-planar 4:2:0 colour bars of the given size.
pub fn color_bars(width: u32, height: u32) -> PixelBuffer {
    let bar_of = |x: u32| ((x as usize * BARS.len()) / width.max(1) as usize).min(BARS.len() - 1);

    let mut luma = Vec::with_capacity((width * height) as usize);
    for _ in 0..height {
        for x in 0..width {
            luma.push(rgb_to_ycbcr(BARS[bar_of(x)])[0]);
        }
    }

    let (cw, ch) = (width / 2, height / 2);
    let mut chroma = Vec::with_capacity((cw * ch * 2) as usize);
    for _ in 0..ch {
        for cx in 0..cw {
            let [_, cb, cr] = rgb_to_ycbcr(BARS[bar_of(cx * 2)]);
            chroma.push(cb);
            chroma.push(cr);
        }
    }

    PixelBuffer::new(
        PlanarLayout::BiPlanarYCbCr420FullRange,
        vec![
            Plane::new(width, height, width, luma),
            Plane::new(cw, ch, cw * 2, chroma),
        ],
    )
}

fn inside_subject(x: u32, y: u32, width: u32, height: u32, scale: f32) -> bool {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let radius = SUBJECT_RADIUS * width.min(height) as f32 * scale;
    let dx = x as f32 + 0.5 - cx;
    let dy = y as f32 + 0.5 - cy;
    dx * dx + dy * dy <= radius * radius
}

/// Transparent RGBA image with two white horizontal stripes at one and two
/// thirds of the height.
pub fn border_stripes(width: u32, height: u32) -> FrameBuffer {
    let mut fb = FrameBuffer::solid(width, height, [0, 0, 0, 0]);
    for center in [height / 3, height * 2 / 3] {
        let top = center.saturating_sub(STRIPE_WIDTH / 2);
        let bottom = (center + STRIPE_WIDTH / 2).min(height);
        for y in top..bottom {
            for x in 0..width {
                fb.set_pixel(x, y, [255, 255, 255, 255]);
            }
        }
    }
    fb
}

/// A [`FrameSource`] replaying one synthetic capture with a fixed subject.
pub struct SyntheticSource<D: GpuDevice> {
    image: PixelBuffer,
    frame_rate: f64,
    next_index: u64,
    matte: Option<(MatteResolution, D::Texture, D::Texture)>,
}

impl<D: GpuDevice> SyntheticSource<D> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: color_bars(width, height),
            frame_rate: 60.0,
            next_index: 0,
            matte: None,
        }
    }

    fn matte_textures(
        &mut self,
        device: &D,
        resolution: MatteResolution,
    ) -> (D::Texture, D::Texture) {
        if let Some((cached, alpha, depth)) = &self.matte {
            if *cached == resolution {
                return (alpha.clone(), depth.clone());
            }
        }

        let width = resolution.scale(self.image.width());
        let height = resolution.scale(self.image.height());

        let mut alpha_data = Vec::with_capacity((width * height) as usize);
        let mut depth_data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let alpha = if inside_subject(x, y, width, height, 1.0) { 255 } else { 0 };
                let depth = if inside_subject(x, y, width, height, DEPTH_DILATION) {
                    SUBJECT_DEPTH
                } else {
                    BACKGROUND_DEPTH
                };
                alpha_data.push(alpha);
                depth_data.extend_from_slice(&depth.to_ne_bytes());
            }
        }

        let alpha = device.create_texture(
            "synthetic_alpha_matte",
            TextureDesc::new(width, height, TextureFormat::R8Unorm),
        );
        device.write_texture(&alpha, &alpha_data, width);
        let depth = device.create_texture(
            "synthetic_dilated_depth",
            TextureDesc::new(width, height, TextureFormat::R32Float),
        );
        device.write_texture(&depth, &depth_data, width * 4);

        tracing::debug!(width, height, ?resolution, "synthetic matte generated");
        self.matte = Some((resolution, alpha.clone(), depth.clone()));
        (alpha, depth)
    }
}

impl<D: GpuDevice> FrameSource<D> for SyntheticSource<D> {
    fn current_frame(&mut self) -> Option<Frame> {
        let index = self.next_index;
        self.next_index += 1;
        Some(Frame::new(
            index,
            index as f64 / self.frame_rate,
            self.image.clone(),
        ))
    }

    fn generate_matte(
        &mut self,
        device: &D,
        _frame: &Frame,
        resolution: MatteResolution,
        _cmd: &mut D::CommandBuffer,
    ) -> D::Texture {
        self.matte_textures(device, resolution).0
    }

    fn generate_dilated_depth(
        &mut self,
        device: &D,
        _frame: &Frame,
        resolution: MatteResolution,
        _cmd: &mut D::CommandBuffer,
    ) -> D::Texture {
        self.matte_textures(device, resolution).1
    }
}
