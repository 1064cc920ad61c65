//! Full-screen quad geometry.
//!
//! Two quads share the same clip-space positions. The video quad's texture
//! coordinates are remapped on every viewport change so the camera image
//! fills the screen without distortion; the overlay quad always samples the
//! layers with the identity mapping.

use matte_core::{AffineTransform, DeviceOrientation, Frame, Point2D, Size2D};

/// Interleaved `(x, y, u, v)` for a 4-vertex triangle strip.
pub const IMAGE_PLANE_VERTEX_DATA: [f32; 16] = [
    -1.0, -1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, //
    1.0, 1.0, 1.0, 0.0,
];

pub const FLOATS_PER_VERTEX: usize = 4;
pub const VERTEX_COUNT: u32 = 4;
pub const VERTEX_STRIDE: u64 = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as u64;

/// Vertex data for one quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexPlane {
    data: [f32; 16],
}

impl VertexPlane {
    pub fn base() -> Self {
        Self {
            data: IMAGE_PLANE_VERTEX_DATA,
        }
    }

    pub fn position(&self, vertex: usize) -> [f32; 2] {
        let i = vertex * FLOATS_PER_VERTEX;
        [self.data[i], self.data[i + 1]]
    }

    pub fn tex_coord(&self, vertex: usize) -> [f32; 2] {
        let i = vertex * FLOATS_PER_VERTEX + 2;
        [self.data[i], self.data[i + 1]]
    }

    pub fn set_tex_coord(&mut self, vertex: usize, uv: [f32; 2]) {
        let i = vertex * FLOATS_PER_VERTEX + 2;
        self.data[i] = uv[0];
        self.data[i + 1] = uv[1];
    }

    pub fn tex_coords(&self) -> [[f32; 2]; 4] {
        [
            self.tex_coord(0),
            self.tex_coord(1),
            self.tex_coord(2),
            self.tex_coord(3),
        ]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

impl Default for VertexPlane {
    fn default() -> Self {
        Self::base()
    }
}

/// Keeps the video and overlay quads in sync with the viewport.
#[derive(Debug, Clone)]
pub struct GeometryUpdater {
    video_plane: VertexPlane,
    overlay_plane: VertexPlane,
    viewport: Size2D,
    orientation: DeviceOrientation,
    dirty: bool,
}

impl GeometryUpdater {
    pub fn new(orientation: DeviceOrientation) -> Self {
        Self {
            video_plane: VertexPlane::base(),
            overlay_plane: VertexPlane::base(),
            viewport: Size2D::default(),
            orientation,
            dirty: false,
        }
    }

    /// Record a new drawable size; the quads are rebuilt on the next frame.
    pub fn resize(&mut self, viewport: Size2D) {
        tracing::debug!(
            width = viewport.width,
            height = viewport.height,
            "viewport resized"
        );
        self.viewport = viewport;
        self.dirty = true;
    }

    pub fn set_orientation(&mut self, orientation: DeviceOrientation) {
        if orientation != self.orientation {
            self.orientation = orientation;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild the quads from `frame` if the viewport changed. Returns `true`
    /// when new vertex data must be uploaded.
    pub fn update_if_needed(&mut self, frame: &Frame) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.update_image_planes(frame);
        true
    }

    fn update_image_planes(&mut self, frame: &Frame) {
        let display = frame.display_transform(self.orientation, self.viewport);
        let inverse = display.inverted().unwrap_or_else(|| {
            tracing::warn!("display transform is singular, using identity");
            AffineTransform::IDENTITY
        });

        let base = VertexPlane::base();
        for vertex in 0..VERTEX_COUNT as usize {
            let [u, v] = base.tex_coord(vertex);
            let mapped = inverse.apply(Point2D::new(u as f64, v as f64));
            self.video_plane
                .set_tex_coord(vertex, [mapped.x as f32, mapped.y as f32]);
        }
        self.overlay_plane = base;
    }

    pub fn video_plane(&self) -> &VertexPlane {
        &self.video_plane
    }

    pub fn overlay_plane(&self) -> &VertexPlane {
        &self.overlay_plane
    }

    pub fn viewport(&self) -> Size2D {
        self.viewport
    }
}
