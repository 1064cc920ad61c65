//! Headless presentation surface backed by a wgpu texture.

use matte_core::{FrameBuffer, MatteError, MatteResult, PixelFormat, TargetConfig, TextureFormat};

use crate::device::{GpuDevice, GpuTexture, RenderTarget, TextureDesc};
use crate::gpu::{GpuContext, WgpuPassTarget};

/// Renders into an offscreen color texture that can be read back.
#[derive(Default)]
pub struct OffscreenTarget {
    pass: Option<WgpuPassTarget>,
    presented: u64,
}

impl OffscreenTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Copy the color attachment back to the CPU. Waits for all submitted work.
    pub fn read_frame(&self, gpu: &GpuContext) -> MatteResult<FrameBuffer> {
        let pass = self
            .pass
            .as_ref()
            .ok_or_else(|| MatteError::Render("offscreen target is not configured".to_string()))?;
        let desc = pass.color.desc();
        let (width, height) = (desc.width, desc.height);

        let unpadded_bytes_per_row = desc.bytes_per_row();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (unpadded_bytes_per_row + align - 1) / align * align;

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: pass.color.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                return Err(MatteError::Render(
                    "failed to map offscreen readback buffer".to_string(),
                ))
            }
        }

        let format = match desc.format {
            TextureFormat::Bgra8Unorm => PixelFormat::Bgra8,
            _ => PixelFormat::Rgba8,
        };
        let mut fb = FrameBuffer::new(width, height, format);
        {
            let data = slice.get_mapped_range();
            let row = unpadded_bytes_per_row as usize;
            for y in 0..height as usize {
                let src = y * padded_bytes_per_row as usize;
                fb.data[y * row..(y + 1) * row].copy_from_slice(&data[src..src + row]);
            }
        }
        readback.unmap();
        Ok(fb)
    }
}

impl RenderTarget<GpuContext> for OffscreenTarget {
    fn configure(&mut self, gpu: &GpuContext, config: &TargetConfig) -> MatteResult<()> {
        if !matches!(
            config.color_format,
            TextureFormat::Bgra8Unorm | TextureFormat::Rgba8Unorm
        ) {
            return Err(MatteError::InvalidArgument(format!(
                "{} is not a presentable color format",
                config.color_format
            )));
        }
        let max = gpu.max_texture_dimension();
        if config.width > max || config.height > max {
            return Err(MatteError::InvalidArgument(format!(
                "target {}x{} exceeds the device limit of {}",
                config.width, config.height, max
            )));
        }

        let color = gpu.create_texture_with_usage(
            "offscreen_color",
            TextureDesc::new(config.width, config.height, config.color_format),
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = gpu.create_texture_with_usage(
            "offscreen_depth",
            TextureDesc::new(config.width, config.height, config.depth_format),
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        tracing::debug!(
            width = config.width,
            height = config.height,
            color = %config.color_format,
            "offscreen target configured"
        );
        self.pass = Some(WgpuPassTarget { color, depth });
        Ok(())
    }

    fn current_pass(&mut self) -> Option<WgpuPassTarget> {
        self.pass.clone()
    }

    fn present(
        &mut self,
        _gpu: &GpuContext,
        _cmd: &mut wgpu::CommandEncoder,
        _pass: WgpuPassTarget,
    ) {
        self.presented += 1;
    }
}
