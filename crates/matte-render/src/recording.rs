//! A CPU-only [`GpuDevice`] that records what the compositor asks of it.
//!
//! Used by the test suite and by `matte render --dry-run`. Buffers and
//! textures keep the bytes written to them, encoders append to a bounded
//! command log, and completion callbacks fire on commit, on a blocking poll,
//! or only when [`RecordingDevice::complete_next`] releases them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use matte_core::{
    MatteError, MatteResult, PrimitiveTopology, TargetConfig, TextureFormat, TextureSlot,
};

use crate::device::{
    BufferUsage, CompletionHandler, GpuDevice, GpuTexture, PipelineDesc, RenderEncoder,
    RenderTarget, TextureDesc,
};
use crate::shader::{check_entry_points, COMPOSITE_SHADER};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct TextureRecord {
    id: u64,
    label: String,
    desc: TextureDesc,
    data: Mutex<Vec<u8>>,
}

/// Texture handle whose contents live in host memory.
#[derive(Debug, Clone)]
pub struct RecordedTexture(Arc<TextureRecord>);

impl RecordedTexture {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Tightly packed texel bytes.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.0.data).clone()
    }
}

impl GpuTexture for RecordedTexture {
    fn desc(&self) -> TextureDesc {
        self.0.desc
    }
}

#[derive(Debug)]
struct BufferRecord {
    id: u64,
    label: String,
    usage: BufferUsage,
    data: Mutex<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RecordedBuffer(Arc<BufferRecord>);

impl RecordedBuffer {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn usage(&self) -> BufferUsage {
        self.0.usage
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.0.data).clone()
    }
}

#[derive(Debug, Clone)]
pub struct RecordedPipeline {
    pub desc: PipelineDesc,
}

/// One operation recorded into a command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass { target: u64 },
    PushDebugGroup(String),
    PopDebugGroup,
    SetPipeline(String),
    SetVertexBuffer { slot: u32, buffer: String },
    SetUniformBuffer { buffer: String, offset: u64 },
    SetTexture { slot: TextureSlot, texture: u64 },
    Draw {
        topology: PrimitiveTopology,
        vertex_start: u32,
        vertex_count: u32,
    },
    EndPass,
    Present { target: u64 },
}

#[derive(Debug, Default)]
pub struct RecordedCommandBuffer {
    pub label: String,
    pub commands: Vec<Command>,
}

/// A committed command buffer.
#[derive(Debug, Clone)]
pub struct Submission {
    pub index: u64,
    pub label: String,
    pub commands: Vec<Command>,
}

impl Submission {
    pub fn draws(&self) -> Vec<&Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .collect()
    }

    pub fn bound_textures(&self) -> Vec<TextureSlot> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::SetTexture { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }

    pub fn presented(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, Command::Present { .. }))
    }
}

/// Color/depth destination of a recorded pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingPass {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// Submissions kept in the command log; older ones are dropped.
pub const SUBMISSION_LOG_LIMIT: usize = 256;

/// Same default as wgpu's `Limits::default().max_texture_dimension_2d`.
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// When committed command buffers report completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionMode {
    OnCommit,
    /// A blocking poll retires the oldest; `wait_idle` retires all.
    OnPoll,
    Manual,
}

pub struct RecordingDevice {
    next_id: AtomicU64,
    mode: CompletionMode,
    max_texture_dimension: u32,
    textures_created: AtomicU64,
    validation_errors: AtomicU64,
    blocking_polls: AtomicU64,
    idle_waits: AtomicU64,
    submitted: AtomicU64,
    textures: Mutex<Vec<Weak<TextureRecord>>>,
    buffers: Mutex<Vec<RecordedBuffer>>,
    submissions: Mutex<VecDeque<Submission>>,
    pending: Mutex<VecDeque<CompletionHandler>>,
}

impl RecordingDevice {
    /// A device that signals completion as soon as a command buffer is committed.
    pub fn new() -> Self {
        Self::with_mode(CompletionMode::OnCommit)
    }

    /// A device running on its own timeline: completions are held until a
    /// blocking [`poll`](GpuDevice::poll) retires the oldest one, or until
    /// [`complete_next`](Self::complete_next).
    pub fn deferred() -> Self {
        Self::with_mode(CompletionMode::OnPoll)
    }

    /// A device whose completions only retire through
    /// [`complete_next`](Self::complete_next).
    pub fn manual() -> Self {
        Self::with_mode(CompletionMode::Manual)
    }

    fn with_mode(mode: CompletionMode) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            mode,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            textures_created: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            blocking_polls: AtomicU64::new(0),
            idle_waits: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            textures: Mutex::new(Vec::new()),
            buffers: Mutex::new(Vec::new()),
            submissions: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max.max(1);
        self
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Retire the oldest outstanding command buffer. Returns `false` if none.
    pub fn complete_next(&self) -> bool {
        let handler = lock(&self.pending).pop_front();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Retire every outstanding command buffer, oldest first.
    pub fn complete_all(&self) -> usize {
        let mut retired = 0;
        while self.complete_next() {
            retired += 1;
        }
        retired
    }

    pub fn pending_completions(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Textures created so far, including ones since dropped.
    pub fn texture_count(&self) -> usize {
        self.textures_created.load(Ordering::Relaxed) as usize
    }

    /// Textures still referenced somewhere.
    pub fn textures(&self) -> Vec<RecordedTexture> {
        lock(&self.textures)
            .iter()
            .filter_map(|t| t.upgrade().map(RecordedTexture))
            .collect()
    }

    /// Texture creations a real device would have rejected.
    pub fn validation_errors(&self) -> u64 {
        self.validation_errors.load(Ordering::Relaxed)
    }

    /// Calls to `poll(true)`.
    pub fn blocking_polls(&self) -> u64 {
        self.blocking_polls.load(Ordering::Relaxed)
    }

    /// Calls to `wait_idle`.
    pub fn idle_waits(&self) -> u64 {
        self.idle_waits.load(Ordering::Relaxed)
    }

    pub fn buffers(&self) -> Vec<RecordedBuffer> {
        lock(&self.buffers).clone()
    }

    pub fn buffer_named(&self, label: &str) -> Option<RecordedBuffer> {
        lock(&self.buffers)
            .iter()
            .find(|b| b.label() == label)
            .cloned()
    }

    /// The most recent submissions, oldest first, at most
    /// [`SUBMISSION_LOG_LIMIT`] of them.
    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.submissions).iter().cloned().collect()
    }

    pub fn last_submission(&self) -> Option<Submission> {
        lock(&self.submissions).back().cloned()
    }

    /// Command buffers committed so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for RecordingDevice {
    type Texture = RecordedTexture;
    type Buffer = RecordedBuffer;
    type Pipeline = RecordedPipeline;
    type CommandBuffer = RecordedCommandBuffer;
    type PassTarget = RecordingPass;
    type Encoder<'a> = RecordingEncoder<'a>;

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> RecordedBuffer {
        let buffer = RecordedBuffer(Arc::new(BufferRecord {
            id: self.next_id(),
            label: label.to_string(),
            usage,
            data: Mutex::new(vec![0u8; size as usize]),
        }));
        lock(&self.buffers).push(buffer.clone());
        buffer
    }

    fn write_buffer(&self, buffer: &RecordedBuffer, offset: u64, data: &[u8]) {
        let mut contents = lock(&buffer.0.data);
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            tracing::warn!(
                label = buffer.label(),
                end,
                size = contents.len(),
                "buffer write out of bounds, ignored"
            );
            return;
        }
        contents[start..end].copy_from_slice(data);
    }

    fn create_texture(&self, label: &str, desc: TextureDesc) -> RecordedTexture {
        if desc.width > self.max_texture_dimension || desc.height > self.max_texture_dimension {
            self.validation_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                label,
                width = desc.width,
                height = desc.height,
                max = self.max_texture_dimension,
                "texture exceeds the device dimension limit"
            );
        }
        let size = (desc.bytes_per_row() * desc.height) as usize;
        let texture = RecordedTexture(Arc::new(TextureRecord {
            id: self.next_id(),
            label: label.to_string(),
            desc,
            data: Mutex::new(vec![0u8; size]),
        }));
        self.textures_created.fetch_add(1, Ordering::Relaxed);
        let mut textures = lock(&self.textures);
        textures.retain(|t| t.strong_count() > 0);
        textures.push(Arc::downgrade(&texture.0));
        texture
    }

    fn write_texture(&self, texture: &RecordedTexture, data: &[u8], bytes_per_row: u32) {
        let desc = texture.desc();
        let row = desc.bytes_per_row() as usize;
        let pitch = bytes_per_row as usize;
        let mut contents = lock(&texture.0.data);
        for y in 0..desc.height as usize {
            let src = y * pitch;
            if pitch < row || src + row > data.len() {
                tracing::warn!(label = texture.label(), "texture write too short, truncated");
                break;
            }
            contents[y * row..(y + 1) * row].copy_from_slice(&data[src..src + row]);
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> MatteResult<RecordedPipeline> {
        check_entry_points(COMPOSITE_SHADER, &desc.vertex_entry, &desc.fragment_entry)?;
        if desc.sample_count != 1 {
            return Err(MatteError::Pipeline(format!(
                "unsupported sample count {}",
                desc.sample_count
            )));
        }
        if !desc.depth_format.is_depth() {
            return Err(MatteError::Pipeline(format!(
                "{} is not a depth format",
                desc.depth_format
            )));
        }
        Ok(RecordedPipeline { desc: desc.clone() })
    }

    fn create_command_buffer(&self, label: &str) -> RecordedCommandBuffer {
        RecordedCommandBuffer {
            label: label.to_string(),
            commands: Vec::new(),
        }
    }

    fn begin_render_pass<'a>(
        &'a self,
        cmd: &'a mut RecordedCommandBuffer,
        target: &'a RecordingPass,
    ) -> RecordingEncoder<'a> {
        cmd.commands.push(Command::BeginPass { target: target.id });
        RecordingEncoder { cmd }
    }

    fn commit(&self, cmd: RecordedCommandBuffer, on_complete: CompletionHandler) {
        let index = self.submitted.fetch_add(1, Ordering::Relaxed);
        {
            let mut submissions = lock(&self.submissions);
            if submissions.len() == SUBMISSION_LOG_LIMIT {
                submissions.pop_front();
            }
            submissions.push_back(Submission {
                index,
                label: cmd.label,
                commands: cmd.commands,
            });
        }
        match self.mode {
            CompletionMode::OnCommit => on_complete(),
            CompletionMode::OnPoll | CompletionMode::Manual => {
                lock(&self.pending).push_back(on_complete)
            }
        }
    }

    fn poll(&self, wait: bool) {
        if wait {
            self.blocking_polls.fetch_add(1, Ordering::Relaxed);
            if self.mode == CompletionMode::OnPoll {
                self.complete_next();
            }
        }
    }

    fn wait_idle(&self) {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
        if self.mode == CompletionMode::OnPoll {
            self.complete_all();
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }
}

pub struct RecordingEncoder<'a> {
    cmd: &'a mut RecordedCommandBuffer,
}

impl RenderEncoder<RecordingDevice> for RecordingEncoder<'_> {
    fn push_debug_group(&mut self, label: &str) {
        self.cmd
            .commands
            .push(Command::PushDebugGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.cmd.commands.push(Command::PopDebugGroup);
    }

    fn set_pipeline(&mut self, pipeline: &RecordedPipeline) {
        self.cmd
            .commands
            .push(Command::SetPipeline(pipeline.desc.label.clone()));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &RecordedBuffer) {
        self.cmd.commands.push(Command::SetVertexBuffer {
            slot,
            buffer: buffer.label().to_string(),
        });
    }

    fn set_uniform_buffer(&mut self, buffer: &RecordedBuffer, offset: u64) {
        self.cmd.commands.push(Command::SetUniformBuffer {
            buffer: buffer.label().to_string(),
            offset,
        });
    }

    fn set_texture(&mut self, slot: TextureSlot, texture: &RecordedTexture) {
        self.cmd.commands.push(Command::SetTexture {
            slot,
            texture: texture.id(),
        });
    }

    fn draw_primitives(
        &mut self,
        topology: PrimitiveTopology,
        vertex_start: u32,
        vertex_count: u32,
    ) {
        self.cmd.commands.push(Command::Draw {
            topology,
            vertex_start,
            vertex_count,
        });
    }

    fn end_encoding(self) {
        self.cmd.commands.push(Command::EndPass);
    }
}

/// A presentation surface that can be toggled between ready and not ready.
#[derive(Debug)]
pub struct RecordingTarget {
    ready: bool,
    config: Option<TargetConfig>,
    pass_id: u64,
    presented: u64,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self {
            ready: true,
            config: None,
            pass_id: 0,
            presented: 0,
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn config(&self) -> Option<&TargetConfig> {
        self.config.as_ref()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Default for RecordingTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget<RecordingDevice> for RecordingTarget {
    fn configure(&mut self, device: &RecordingDevice, config: &TargetConfig) -> MatteResult<()> {
        if config.color_format.is_depth() || config.color_format == TextureFormat::R32Float {
            return Err(MatteError::InvalidArgument(format!(
                "{} is not a presentable color format",
                config.color_format
            )));
        }
        let max = device.max_texture_dimension();
        if config.width > max || config.height > max {
            return Err(MatteError::InvalidArgument(format!(
                "target {}x{} exceeds the device limit of {}",
                config.width, config.height, max
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn current_pass(&mut self) -> Option<RecordingPass> {
        let config = self.config.as_ref()?;
        if !self.ready {
            return None;
        }
        self.pass_id += 1;
        Some(RecordingPass {
            id: self.pass_id,
            width: config.width,
            height: config.height,
        })
    }

    fn present(
        &mut self,
        _device: &RecordingDevice,
        cmd: &mut RecordedCommandBuffer,
        pass: RecordingPass,
    ) {
        cmd.commands.push(Command::Present { target: pass.id });
        self.presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_write_texture_repacks_padded_rows() {
        let device = RecordingDevice::new();
        let texture = device.create_texture("t", TextureDesc::new(2, 2, TextureFormat::R8Unorm));
        device.write_texture(&texture, &[1, 2, 0, 0, 3, 4, 0, 0], 4);
        assert_eq!(texture.contents(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_write_buffer_at_offset() {
        let device = RecordingDevice::new();
        let buffer = device.create_buffer("b", 8, BufferUsage::Uniform);
        device.write_buffer(&buffer, 4, &[9, 9]);
        assert_eq!(buffer.contents(), vec![0, 0, 0, 0, 9, 9, 0, 0]);
    }

    #[test]
    fn test_deferred_completion_runs_in_order() {
        let device = RecordingDevice::manual();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            device.commit(
                device.create_command_buffer("frame"),
                Box::new(move || order.lock().unwrap().push(i)),
            );
        }
        assert_eq!(device.pending_completions(), 3);
        assert!(device.complete_next());
        assert_eq!(device.complete_all(), 2);
        assert!(!device.complete_next());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_auto_completion_fires_on_commit() {
        let device = RecordingDevice::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        device.commit(
            device.create_command_buffer("frame"),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_target_not_ready_yields_no_pass() {
        let device = RecordingDevice::new();
        let mut target = RecordingTarget::new();
        assert!(target.current_pass().is_none());

        target.configure(&device, &TargetConfig::default()).unwrap();
        assert!(target.current_pass().is_some());

        target.set_ready(false);
        assert!(target.current_pass().is_none());
    }

    #[test]
    fn test_blocking_poll_retires_only_the_oldest() {
        let device = RecordingDevice::deferred();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            device.commit(
                device.create_command_buffer("frame"),
                Box::new(move || order.lock().unwrap().push(i)),
            );
        }
        device.poll(false);
        assert_eq!(device.pending_completions(), 3);

        device.poll(true);
        assert_eq!(*order.lock().unwrap(), vec![0]);
        assert_eq!(device.pending_completions(), 2);

        device.wait_idle();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!((device.blocking_polls(), device.idle_waits()), (1, 1));
    }

    #[test]
    fn test_manual_device_ignores_polls() {
        let device = RecordingDevice::manual();
        device.commit(device.create_command_buffer("frame"), Box::new(|| {}));
        device.poll(true);
        device.wait_idle();
        assert_eq!(device.pending_completions(), 1);
    }

    #[test]
    fn test_submission_log_is_bounded() {
        let device = RecordingDevice::new();
        for _ in 0..SUBMISSION_LOG_LIMIT + 10 {
            device.commit(device.create_command_buffer("frame"), Box::new(|| {}));
        }
        let submissions = device.submissions();
        assert_eq!(submissions.len(), SUBMISSION_LOG_LIMIT);
        assert_eq!(submissions[0].index, 10);
        assert_eq!(device.submitted(), (SUBMISSION_LOG_LIMIT + 10) as u64);
        assert_eq!(
            device.last_submission().unwrap().index,
            (SUBMISSION_LOG_LIMIT + 9) as u64
        );
    }

    #[test]
    fn test_dropped_textures_leave_the_registry() {
        let device = RecordingDevice::new();
        let kept = device.create_texture("kept", TextureDesc::new(1, 1, TextureFormat::R8Unorm));
        for _ in 0..5 {
            device.create_texture("temp", TextureDesc::new(1, 1, TextureFormat::R8Unorm));
        }
        assert_eq!(device.texture_count(), 6);
        let live = device.textures();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), kept.id());
    }

    #[test]
    fn test_oversized_texture_is_a_validation_error() {
        let device = RecordingDevice::new().with_max_texture_dimension(16);
        device.create_texture("ok", TextureDesc::new(16, 16, TextureFormat::R8Unorm));
        assert_eq!(device.validation_errors(), 0);
        device.create_texture("big", TextureDesc::new(17, 4, TextureFormat::R8Unorm));
        assert_eq!(device.validation_errors(), 1);
    }

    #[test]
    fn test_target_larger_than_device_limit_is_rejected() {
        let device = RecordingDevice::new().with_max_texture_dimension(512);
        let mut target = RecordingTarget::new();
        let result = target.configure(&device, &TargetConfig::default());
        assert!(matches!(result, Err(MatteError::InvalidArgument(_))));
    }
}
