use serde::{Deserialize, Serialize};

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Apply an affine transform to this point.
    pub fn applying(&self, t: &AffineTransform) -> Point2D {
        t.apply(*self)
    }
}

impl Default for Point2D {
    fn default() -> Self {
        Self::zero()
    }
}

/// A 2D size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size2D {
    pub width: f64,
    pub height: f64,
}

impl Size2D {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Compute the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0.0 {
            return 0.0;
        }
        self.width / self.height
    }

    /// True when either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// The same size with width and height exchanged.
    pub fn transposed(&self) -> Size2D {
        Size2D::new(self.height, self.width)
    }
}

/// A 2D affine transform in row-vector form:
/// `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    /// Scale by `sx`/`sy` about the point (`cx`, `cy`).
    pub fn scale_about(sx: f64, sy: f64, cx: f64, cy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, cx * (1.0 - sx), cy * (1.0 - sy))
    }

    pub fn apply(&self, p: Point2D) -> Point2D {
        Point2D {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    /// `self` followed by `other`.
    pub fn then(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// The inverse transform, or `None` when the matrix is singular.
    pub fn inverted(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        Some(AffineTransform {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Physical orientation of the display relative to the camera sensor.
///
/// The sensor's native orientation is landscape-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl DeviceOrientation {
    /// Rotation taking normalized sensor coordinates to normalized display coordinates.
    pub fn rotation(&self) -> AffineTransform {
        match self {
            DeviceOrientation::LandscapeRight => AffineTransform::IDENTITY,
            DeviceOrientation::LandscapeLeft => {
                AffineTransform::new(-1.0, 0.0, 0.0, -1.0, 1.0, 1.0)
            }
            DeviceOrientation::Portrait => AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1.0, 0.0),
            DeviceOrientation::PortraitUpsideDown => {
                AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, 1.0)
            }
        }
    }

    pub fn is_portrait(&self) -> bool {
        matches!(
            self,
            DeviceOrientation::Portrait | DeviceOrientation::PortraitUpsideDown
        )
    }
}

/// Transform from normalized camera-image coordinates to normalized viewport
/// coordinates: rotate for `orientation`, then aspect-fill the viewport.
///
/// Empty sizes skip the fill step and yield the bare rotation.
pub fn display_transform(
    image_size: Size2D,
    orientation: DeviceOrientation,
    viewport: Size2D,
) -> AffineTransform {
    let rotation = orientation.rotation();
    if image_size.is_empty() || viewport.is_empty() {
        return rotation;
    }

    let rotated = if orientation.is_portrait() {
        image_size.transposed()
    } else {
        image_size
    };
    let image_aspect = rotated.aspect_ratio();
    let view_aspect = viewport.aspect_ratio();

    let fill = if image_aspect > view_aspect {
        AffineTransform::scale_about(image_aspect / view_aspect, 1.0, 0.5, 0.5)
    } else {
        AffineTransform::scale_about(1.0, view_aspect / image_aspect, 0.5, 0.5)
    };
    rotation.then(&fill)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point(p: Point2D, x: f64, y: f64) {
        assert!((p.x - x).abs() < 1e-9, "x: {} != {}", p.x, x);
        assert!((p.y - y).abs() < 1e-9, "y: {} != {}", p.y, y);
    }

    #[test]
    fn test_size_aspect_ratio() {
        let s = Size2D::new(1920.0, 1080.0);
        assert!((s.aspect_ratio() - 16.0 / 9.0).abs() < 0.01);
        assert_eq!(Size2D::new(10.0, 0.0).aspect_ratio(), 0.0);
    }

    #[test]
    fn test_affine_invert_roundtrip() {
        let t = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1.0, 0.0)
            .then(&AffineTransform::scale_about(1.3, 1.0, 0.5, 0.5));
        let inv = t.inverted().unwrap();
        let p = Point2D::new(0.25, 0.75);
        assert_point(p.applying(&t).applying(&inv), 0.25, 0.75);
    }

    #[test]
    fn test_affine_singular_has_no_inverse() {
        let t = AffineTransform::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0);
        assert!(t.inverted().is_none());
    }

    #[test]
    fn test_portrait_rotation_maps_corners() {
        let r = DeviceOrientation::Portrait.rotation();
        // sensor top-left lands on display top-right
        assert_point(r.apply(Point2D::new(0.0, 0.0)), 1.0, 0.0);
        assert_point(r.apply(Point2D::new(1.0, 1.0)), 0.0, 1.0);
    }

    #[test]
    fn test_display_transform_matching_aspect_is_pure_rotation() {
        let t = display_transform(
            Size2D::new(1280.0, 720.0),
            DeviceOrientation::Portrait,
            Size2D::new(720.0, 1280.0),
        );
        assert_eq!(t, DeviceOrientation::Portrait.rotation());
    }

    #[test]
    fn test_display_transform_landscape_identity() {
        let t = display_transform(
            Size2D::new(1920.0, 1080.0),
            DeviceOrientation::LandscapeRight,
            Size2D::new(1920.0, 1080.0),
        );
        assert_point(t.apply(Point2D::new(0.2, 0.8)), 0.2, 0.8);
    }

    #[test]
    fn test_display_transform_aspect_fill_crops_wide_image() {
        // 4:3 sensor on a 1:1 viewport in landscape: image is wider, crop horizontally.
        let t = display_transform(
            Size2D::new(400.0, 300.0),
            DeviceOrientation::LandscapeRight,
            Size2D::new(300.0, 300.0),
        );
        let center = t.apply(Point2D::new(0.5, 0.5));
        assert_point(center, 0.5, 0.5);
        // visible image spans 3/4 of its width, so the left edge falls outside the view
        let left = t.apply(Point2D::new(0.0, 0.5));
        assert!(left.x < 0.0);
        assert_point(t.apply(Point2D::new(0.125, 0.0)), 0.0, 0.0);
    }

    #[test]
    fn test_display_transform_empty_viewport_falls_back_to_rotation() {
        let t = display_transform(
            Size2D::new(1280.0, 720.0),
            DeviceOrientation::Portrait,
            Size2D::default(),
        );
        assert_eq!(t, DeviceOrientation::Portrait.rotation());
    }
}
