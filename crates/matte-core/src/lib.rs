//! # matte-core
//!
//! Core types and primitives for the Matte AR compositor.
//! This crate contains the GPU-agnostic pieces shared by every Matte crate:
//! camera frames and planes, 2-D transforms, texture slot tables,
//! configuration, and error types.

pub mod config;
pub mod error;
pub mod frame;
pub mod math;
pub mod types;

pub use config::*;

pub use error::{MatteError, MatteResult, ShaderStage};
pub use frame::{Frame, FrameBuffer, PixelBuffer, PixelFormat, PlanarLayout, Plane};
pub use math::{display_transform, AffineTransform, DeviceOrientation, Point2D, Size2D};
pub use types::{
    CompareFunction, CompositeParameters, CullMode, MatteResolution, PrimitiveTopology,
    TextureFormat, TextureSlot,
};
