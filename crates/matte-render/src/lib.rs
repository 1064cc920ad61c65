//! # matte-render
//!
//! The compositing core. Turns a camera frame, a person matte and two layer
//! images into one presented frame per display refresh, with at most a fixed
//! number of frames in flight on the GPU.
//!
//! Everything above [`device`] is generic over [`GpuDevice`]; [`gpu`] is the
//! wgpu backend and [`recording`] a CPU-only one for tests and dry runs.

pub mod compositor;
pub mod context;
pub mod device;
pub mod geometry;
pub mod gpu;
pub mod image_loader;
pub mod matte;
pub mod offscreen;
pub mod planes;
pub mod recording;
pub mod ring;
pub mod scheduler;
pub mod shader;

pub use compositor::Compositor;
pub use context::RenderContext;
pub use device::{GpuDevice, GpuTexture, RenderEncoder, RenderTarget, TextureDesc};
pub use geometry::{GeometryUpdater, VertexPlane};
pub use gpu::GpuContext;
pub use image_loader::{load_layer_from_bytes, load_layer_image, LayerImage};
pub use matte::{FrameSource, MatteProvider, MatteTextures};
pub use offscreen::OffscreenTarget;
pub use planes::{CameraPlanes, FramePlaneExtractor};
pub use recording::{RecordingDevice, RecordingTarget};
pub use ring::{RingAllocator, UniformRing};
pub use scheduler::{FrameOutcome, FrameScheduler, SkipReason};
