use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::{display_transform, AffineTransform, DeviceOrientation, Size2D};

/// Pixel format of a CPU frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
    /// 8-bit BGRA (4 bytes per pixel), the presentation surface layout.
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// A packed, top-left-origin image held in CPU memory.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Create a new frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            data: vec![0u8; size],
            width,
            height,
            format,
        }
    }

    /// Create an RGBA frame buffer filled with a single pixel value.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgba);
        }
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgba8,
        }
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Bytes in one tightly packed row.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.bytes_per_pixel() as u32
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = &self.data[offset..offset + 4];
        match self.format {
            PixelFormat::Rgba8 => Some([px[0], px[1], px[2], px[3]]),
            PixelFormat::Bgra8 => Some([px[2], px[1], px[0], px[3]]),
        }
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = match self.format {
            PixelFormat::Rgba8 => rgba,
            PixelFormat::Bgra8 => [rgba[2], rgba[1], rgba[0], rgba[3]],
        };
        self.data[offset..offset + 4].copy_from_slice(&px);
    }

    /// Reorder channels so the buffer is RGBA.
    pub fn into_rgba(mut self) -> FrameBuffer {
        if self.format == PixelFormat::Bgra8 {
            for px in self.data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            self.format = PixelFormat::Rgba8;
        }
        self
    }
}

/// One plane of a planar camera image.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes; may exceed `width * channels`.
    pub bytes_per_row: u32,
    pub data: Arc<[u8]>,
}

impl Plane {
    pub fn new(width: u32, height: u32, bytes_per_row: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
            data: data.into(),
        }
    }

    /// True when `data` holds at least `bytes_per_row * height` bytes.
    pub fn is_complete(&self) -> bool {
        self.data.len() >= (self.bytes_per_row as usize) * (self.height as usize)
    }
}

/// Layout of a planar camera buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanarLayout {
    /// Y plane followed by an interleaved CbCr plane at half resolution.
    BiPlanarYCbCr420FullRange,
    /// Same planes with luma in [16, 235] and chroma in [16, 240].
    BiPlanarYCbCr420VideoRange,
}

impl PlanarLayout {
    pub fn is_video_range(&self) -> bool {
        matches!(self, PlanarLayout::BiPlanarYCbCr420VideoRange)
    }
}

/// A captured camera image: luma plane first, chroma plane second.
///
/// Planes are reference counted, so cloning a buffer never copies pixels.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub layout: PlanarLayout,
    pub planes: Vec<Plane>,
}

impl PixelBuffer {
    pub fn new(layout: PlanarLayout, planes: Vec<Plane>) -> Self {
        Self { layout, planes }
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    /// Width of the full-resolution (luma) plane, 0 for an empty buffer.
    pub fn width(&self) -> u32 {
        self.planes.first().map(|p| p.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.planes.first().map(|p| p.height).unwrap_or(0)
    }
}

/// A single camera frame handed over by the tracking subsystem.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame number assigned by the source.
    pub index: u64,
    /// Capture time in seconds.
    pub timestamp: f64,
    pub captured_image: PixelBuffer,
}

impl Frame {
    pub fn new(index: u64, timestamp: f64, captured_image: PixelBuffer) -> Self {
        Self {
            index,
            timestamp,
            captured_image,
        }
    }

    /// Resolution of the captured camera image.
    pub fn image_resolution(&self) -> Size2D {
        Size2D::new(
            self.captured_image.width() as f64,
            self.captured_image.height() as f64,
        )
    }

    /// Normalized image-to-viewport transform for the given orientation.
    pub fn display_transform(
        &self,
        orientation: DeviceOrientation,
        viewport: Size2D,
    ) -> AffineTransform {
        display_transform(self.image_resolution(), orientation, viewport)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({})", self.index)
    }
}
