use serde::{Deserialize, Serialize};

/// GPU texture formats used by the compositing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextureFormat {
    /// Single 8-bit channel (camera luma, alpha matte).
    R8Unorm,
    /// Two 8-bit channels (camera chroma).
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    /// Single 32-bit float channel (dilated depth).
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    /// Bytes per texel for this format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

impl std::fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TextureFormat::R8Unorm => "r8-unorm",
            TextureFormat::Rg8Unorm => "rg8-unorm",
            TextureFormat::Rgba8Unorm => "rgba8-unorm",
            TextureFormat::Bgra8Unorm => "bgra8-unorm",
            TextureFormat::R32Float => "r32-float",
            TextureFormat::Depth32Float => "depth32-float",
        };
        write!(f, "{}", name)
    }
}

/// Fragment-stage texture inputs of the composite pass and their binding indices.
///
/// Indices 2 and 3 are held back for per-anchor textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureSlot {
    CameraLuma,
    CameraChroma,
    AlphaMatte,
    DilatedDepth,
    FrontLayer,
    BackLayer,
}

impl TextureSlot {
    /// Every slot, in binding order.
    pub const ALL: [TextureSlot; 6] = [
        TextureSlot::CameraLuma,
        TextureSlot::CameraChroma,
        TextureSlot::AlphaMatte,
        TextureSlot::DilatedDepth,
        TextureSlot::FrontLayer,
        TextureSlot::BackLayer,
    ];

    /// Binding indices no slot may use.
    pub const RESERVED: [u32; 2] = [2, 3];

    /// Binding index of the sampler shared by all slots.
    pub const SAMPLER_BINDING: u32 = 8;

    /// Binding index of the shared per-frame uniforms.
    pub const UNIFORM_BINDING: u32 = 9;

    pub fn index(&self) -> u32 {
        match self {
            TextureSlot::CameraLuma => 0,
            TextureSlot::CameraChroma => 1,
            TextureSlot::AlphaMatte => 4,
            TextureSlot::DilatedDepth => 5,
            TextureSlot::FrontLayer => 6,
            TextureSlot::BackLayer => 7,
        }
    }

    /// Format the composite shader expects in this slot.
    pub fn format(&self) -> TextureFormat {
        match self {
            TextureSlot::CameraLuma | TextureSlot::AlphaMatte => TextureFormat::R8Unorm,
            TextureSlot::CameraChroma => TextureFormat::Rg8Unorm,
            TextureSlot::DilatedDepth => TextureFormat::R32Float,
            TextureSlot::FrontLayer | TextureSlot::BackLayer => TextureFormat::Rgba8Unorm,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TextureSlot::CameraLuma => "camera_luma",
            TextureSlot::CameraChroma => "camera_chroma",
            TextureSlot::AlphaMatte => "alpha_matte",
            TextureSlot::DilatedDepth => "dilated_depth",
            TextureSlot::FrontLayer => "front_layer",
            TextureSlot::BackLayer => "back_layer",
        }
    }
}

/// Resolution at which the segmentation subsystem computes its matte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatteResolution {
    Full,
    #[default]
    Half,
}

impl MatteResolution {
    /// Scale a camera dimension to the matte resolution (never below 1).
    pub fn scale(&self, dimension: u32) -> u32 {
        match self {
            MatteResolution::Full => dimension.max(1),
            MatteResolution::Half => (dimension / 2).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareFunction {
    Always,
    Less,
    LessEqual,
}

/// Scalar state read once per frame by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeParameters {
    /// Virtual depth of the back layer, in `[MIN_DISTANCE, MIN_DISTANCE + DISTANCE_RANGE]`.
    pub back_layer_distance: f32,
}

impl CompositeParameters {
    pub const MIN_DISTANCE: f32 = 1.0;
    pub const DISTANCE_RANGE: f32 = 4.0;

    /// Remap a normalized control value to a back-layer distance.
    /// Inputs outside `[0, 1]` are clamped.
    pub fn distance_from_normalized(value: f32) -> f32 {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        value * Self::DISTANCE_RANGE + Self::MIN_DISTANCE
    }

    pub fn set_normalized_distance(&mut self, value: f32) {
        self.back_layer_distance = Self::distance_from_normalized(value);
    }
}

impl Default for CompositeParameters {
    fn default() -> Self {
        Self {
            back_layer_distance: 2.5,
        }
    }
}
