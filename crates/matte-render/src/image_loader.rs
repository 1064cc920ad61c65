//! Layer image loading.
//! Decodes PNG, JPEG and the other formats `image` supports, honoring EXIF
//! orientation, and normalizes them into upright RGBA frame buffers.

use std::path::Path;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use matte_core::{FrameBuffer, MatteError, MatteResult, PixelFormat};

/// A decoded layer image together with its stored orientation.
#[derive(Debug, Clone)]
pub struct LayerImage {
    image: DynamicImage,
    orientation: Orientation,
}

impl LayerImage {
    /// Decode the image at `path`.
    pub fn open(path: &Path) -> MatteResult<Self> {
        let fail = |e: &dyn std::fmt::Display| {
            MatteError::asset(
                format!("failed to load image '{}': {}", path.display(), e),
                path,
            )
        };
        let reader = ImageReader::open(path)
            .map_err(|e| fail(&e))?
            .with_guessed_format()
            .map_err(|e| fail(&e))?;
        let mut decoder = reader.into_decoder().map_err(|e| fail(&e))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let image = DynamicImage::from_decoder(decoder).map_err(|e| fail(&e))?;
        Ok(Self { image, orientation })
    }

    /// Decode an in-memory encoded image.
    pub fn from_bytes(data: &[u8]) -> MatteResult<Self> {
        let fail = |e: &dyn std::fmt::Display| {
            MatteError::ImageDecode(format!("failed to decode image: {}", e))
        };
        let reader = ImageReader::new(std::io::Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| fail(&e))?;
        let mut decoder = reader.into_decoder().map_err(|e| fail(&e))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let image = DynamicImage::from_decoder(decoder).map_err(|e| fail(&e))?;
        Ok(Self { image, orientation })
    }

    pub fn from_image(image: DynamicImage, orientation: Orientation) -> Self {
        Self { image, orientation }
    }

    /// Wrap an already upright frame buffer.
    pub fn from_frame_buffer(fb: FrameBuffer) -> MatteResult<Self> {
        let (width, height) = (fb.width, fb.height);
        let rgba = fb.into_rgba();
        let buffer = image::RgbaImage::from_raw(width, height, rgba.data).ok_or_else(|| {
            MatteError::ImageDecode(format!(
                "frame buffer data does not match {}x{}",
                width, height
            ))
        })?;
        Ok(Self {
            image: DynamicImage::ImageRgba8(buffer),
            orientation: Orientation::NoTransforms,
        })
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Stored (pre-orientation) dimensions.
    pub fn stored_dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Upright RGBA pixels, top-left origin.
    pub fn normalize(&self) -> FrameBuffer {
        let mut image = self.image.clone();
        image.apply_orientation(self.orientation);
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut fb = FrameBuffer::new(width, height, PixelFormat::Rgba8);
        fb.data = rgba.into_raw();
        fb
    }

    /// [`normalize`](Self::normalize), then scale down keeping the aspect
    /// ratio so neither side exceeds `max`.
    pub fn normalize_within(&self, max: u32) -> FrameBuffer {
        let fb = self.normalize();
        let max = max.max(1);
        if fb.width <= max && fb.height <= max {
            return fb;
        }

        let scale = max as f64 / fb.width.max(fb.height) as f64;
        let width = ((fb.width as f64 * scale).round() as u32).clamp(1, max);
        let height = ((fb.height as f64 * scale).round() as u32).clamp(1, max);
        let Some(source) = image::RgbaImage::from_raw(fb.width, fb.height, fb.data) else {
            return FrameBuffer::new(0, 0, PixelFormat::Rgba8);
        };
        let resized = image::imageops::resize(&source, width, height, FilterType::Triangle);
        tracing::warn!(
            from = %format!("{}x{}", source.width(), source.height()),
            to = %format!("{}x{}", width, height),
            max,
            "layer image exceeds the texture limit, scaled down"
        );

        let mut scaled = FrameBuffer::new(width, height, PixelFormat::Rgba8);
        scaled.data = resized.into_raw();
        scaled
    }
}

/// Load an image file as an upright RGBA frame buffer.
pub fn load_layer_image(path: &Path) -> MatteResult<FrameBuffer> {
    Ok(LayerImage::open(path)?.normalize())
}

/// Decode an encoded image held in memory as an upright RGBA frame buffer.
pub fn load_layer_from_bytes(data: &[u8]) -> MatteResult<FrameBuffer> {
    Ok(LayerImage::from_bytes(data)?.normalize())
}
