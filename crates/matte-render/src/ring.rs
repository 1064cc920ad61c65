//! Rotating uniform slots.
//!
//! The CPU writes frame `k`'s parameters into slot `k mod N` while the GPU may
//! still be reading older slots. Nothing here stops the CPU from lapping the
//! GPU; the frame scheduler's in-flight throttle does that.

use crate::device::{BufferUsage, GpuDevice};

/// Required alignment of a uniform binding offset.
pub const UNIFORM_ALIGNMENT: usize = 256;

/// Round `size` up to the next multiple of [`UNIFORM_ALIGNMENT`].
pub fn align_uniform_size(size: usize) -> usize {
    (size + UNIFORM_ALIGNMENT - 1) & !(UNIFORM_ALIGNMENT - 1)
}

/// Parameters shared by every fragment of a frame.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SharedUniforms {
    pub viewport_size: [f32; 2],
    pub back_layer_distance: f32,
    pub frame_index: u32,
    /// Non-zero when the camera planes carry video-range levels.
    pub video_range: u32,
    pub _padding: u32,
}

/// Per-anchor instance data.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceUniforms {
    pub model: [[f32; 4]; 4],
}

impl Default for InstanceUniforms {
    fn default() -> Self {
        Self {
            model: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

/// Slot arithmetic for a ring of `slots` fixed-stride regions.
#[derive(Debug, Clone)]
pub struct RingAllocator {
    slots: usize,
    stride: usize,
    counter: u64,
}

impl RingAllocator {
    /// A ring of `slots` entries (at least one), each holding `element_size` bytes.
    pub fn new(slots: usize, element_size: usize) -> Self {
        Self {
            slots: slots.max(1),
            stride: align_uniform_size(element_size.max(1)),
            counter: 0,
        }
    }

    /// Next slot index in `[0, slots)`.
    pub fn acquire_slot(&mut self) -> usize {
        let index = (self.counter % self.slots as u64) as usize;
        self.counter += 1;
        index
    }

    /// Byte offset of `index` within the backing buffer.
    pub fn offset_for(&self, index: usize) -> u64 {
        (index * self.stride) as u64
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes the backing buffer must provide.
    pub fn capacity(&self) -> u64 {
        (self.stride * self.slots) as u64
    }
}

/// A [`RingAllocator`] together with the GPU buffer it carves up.
pub struct UniformRing<D: GpuDevice> {
    allocator: RingAllocator,
    buffer: D::Buffer,
    current_offset: u64,
}

impl<D: GpuDevice> UniformRing<D> {
    pub fn new(device: &D, label: &str, slots: usize, element_size: usize) -> Self {
        let allocator = RingAllocator::new(slots, element_size);
        let buffer = device.create_buffer(label, allocator.capacity(), BufferUsage::Uniform);
        tracing::debug!(
            label,
            slots = allocator.slots(),
            stride = allocator.stride(),
            "allocated uniform ring"
        );
        Self {
            allocator,
            buffer,
            current_offset: 0,
        }
    }

    /// Move to the next slot and return its byte offset.
    pub fn advance(&mut self) -> u64 {
        let slot = self.allocator.acquire_slot();
        self.current_offset = self.allocator.offset_for(slot);
        tracing::trace!(slot, offset = self.current_offset, "uniform ring advanced");
        self.current_offset
    }

    /// Write `data` at the start of the current slot. Excess bytes beyond the
    /// stride are dropped.
    pub fn write_current(&self, device: &D, data: &[u8]) {
        let len = data.len().min(self.allocator.stride());
        device.write_buffer(&self.buffer, self.current_offset, &data[..len]);
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn allocator(&self) -> &RingAllocator {
        &self.allocator
    }
}
