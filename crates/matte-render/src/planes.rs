//! Camera plane extraction.
//!
//! Turns a bi-planar YCbCr camera buffer into a luma texture (one 8-bit
//! channel) and a chroma texture (two 8-bit channels). Textures come from a
//! cache keyed by plane shape, so steady-state frames only upload pixels and
//! never allocate.

use dashmap::DashMap;
use matte_core::{PixelBuffer, TextureFormat};

use crate::device::{GpuDevice, TextureDesc};

/// Luma and chroma textures for one camera frame.
#[derive(Debug, Clone)]
pub struct CameraPlanes<T> {
    pub luma: T,
    pub chroma: T,
    /// Luma and chroma use video-range levels rather than full range.
    pub video_range: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PlaneKey {
    plane: usize,
    desc: TextureDesc,
}

/// Plane textures keyed by `(plane index, width, height, format)`.
///
/// Holds at most one entry per plane index: a plane arriving with a new shape
/// evicts the old entry, so the cache stays bounded across resolution changes.
pub struct TextureCache<D: GpuDevice> {
    entries: DashMap<PlaneKey, D::Texture>,
}

impl<D: GpuDevice> TextureCache<D> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Texture for `plane` with shape `desc`, created on first use.
    pub fn texture_for(&self, device: &D, plane: usize, desc: TextureDesc) -> D::Texture {
        let key = PlaneKey { plane, desc };
        if let Some(texture) = self.entries.get(&key) {
            return texture.value().clone();
        }

        let before = self.entries.len();
        self.entries.retain(|k, _| k.plane != plane);
        if self.entries.len() != before {
            tracing::debug!(plane, ?desc, "evicted stale camera plane texture");
        }

        let label = format!("camera_plane_{}", plane);
        self.entries
            .entry(key)
            .or_insert_with(|| device.create_texture(&label, desc))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached texture.
    pub fn flush(&self) {
        self.entries.clear();
    }
}

impl<D: GpuDevice> Default for TextureCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces per-frame [`CameraPlanes`] from captured camera buffers.
pub struct FramePlaneExtractor<D: GpuDevice> {
    cache: TextureCache<D>,
}

impl<D: GpuDevice> FramePlaneExtractor<D> {
    pub fn new() -> Self {
        Self {
            cache: TextureCache::new(),
        }
    }

    /// Upload both planes of `buffer`. Returns `None` (skip this frame) when the
    /// buffer has fewer than two planes, a plane is malformed, or a plane is
    /// larger than the device accepts.
    pub fn extract(&self, device: &D, buffer: &PixelBuffer) -> Option<CameraPlanes<D::Texture>> {
        if buffer.plane_count() < 2 {
            tracing::debug!(
                planes = buffer.plane_count(),
                "captured image has fewer than two planes, skipping"
            );
            return None;
        }
        let luma = self.plane_texture(device, buffer, 0, TextureFormat::R8Unorm)?;
        let chroma = self.plane_texture(device, buffer, 1, TextureFormat::Rg8Unorm)?;
        Some(CameraPlanes {
            luma,
            chroma,
            video_range: buffer.layout.is_video_range(),
        })
    }

    fn plane_texture(
        &self,
        device: &D,
        buffer: &PixelBuffer,
        index: usize,
        format: TextureFormat,
    ) -> Option<D::Texture> {
        let plane = buffer.plane(index)?;
        let desc = TextureDesc::new(plane.width, plane.height, format);
        if plane.width == 0
            || plane.height == 0
            || plane.bytes_per_row < desc.bytes_per_row()
            || !plane.is_complete()
        {
            tracing::debug!(
                plane = index,
                width = plane.width,
                height = plane.height,
                bytes_per_row = plane.bytes_per_row,
                len = plane.data.len(),
                "malformed camera plane, skipping"
            );
            return None;
        }
        let max = device.max_texture_dimension();
        if plane.width > max || plane.height > max {
            tracing::debug!(
                plane = index,
                width = plane.width,
                height = plane.height,
                max,
                "camera plane exceeds the device texture limit, skipping"
            );
            return None;
        }

        let texture = self.cache.texture_for(device, index, desc);
        let len = plane.bytes_per_row as usize * plane.height as usize;
        device.write_texture(&texture, &plane.data[..len], plane.bytes_per_row);
        Some(texture)
    }

    pub fn cache(&self) -> &TextureCache<D> {
        &self.cache
    }
}

impl<D: GpuDevice> Default for FramePlaneExtractor<D> {
    fn default() -> Self {
        Self::new()
    }
}
