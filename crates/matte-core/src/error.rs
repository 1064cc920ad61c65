/// Core error types for the Matte compositor.
use std::path::PathBuf;

/// A specialized Result type for Matte operations.
pub type MatteResult<T> = Result<T, MatteError>;

/// Shader stage a pipeline function belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Top-level error type for the compositing core.
///
/// Only setup and layer replacement produce these. Per-frame hiccups such as a
/// missing camera frame are reported as skipped frames, not errors.
#[derive(Debug, thiserror::Error)]
pub enum MatteError {
    #[error("GPU device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("{stage} shader function '{name}' not found in pipeline library")]
    ShaderFunctionMissing { stage: ShaderStage, name: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("asset error: {message} ({path:?})")]
    Asset { message: String, path: PathBuf },

    #[error("image decode error: {0}")]
    ImageDecode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatteError {
    /// Create an asset error.
    pub fn asset(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        MatteError::Asset {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create a missing-shader-function error.
    pub fn shader_missing(stage: ShaderStage, name: impl Into<String>) -> Self {
        MatteError::ShaderFunctionMissing {
            stage,
            name: name.into(),
        }
    }
}
