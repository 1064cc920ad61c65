use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use matte_core::{
    Frame, FrameBuffer, MatteConfig, MatteError, MatteResolution, PixelBuffer, PlanarLayout, Plane,
    PrimitiveTopology, TextureFormat, TextureSlot,
};
use matte_render::compositor::{OVERLAY_PLANE_BUFFER, SHARED_UNIFORM_BUFFER, VIDEO_PLANE_BUFFER};
use matte_render::geometry::VertexPlane;
use matte_render::recording::{Command, RecordedTexture, RecordingDevice, RecordingTarget};
use matte_render::ring::SharedUniforms;
use matte_render::{
    FrameOutcome, FrameScheduler, FrameSource, GpuDevice, LayerImage, RenderContext, SkipReason,
    TextureDesc,
};

fn nv12(width: u32, height: u32) -> PixelBuffer {
    let y = Plane::new(width, height, width, vec![120u8; (width * height) as usize]);
    let uv = Plane::new(
        width / 2,
        height / 2,
        width,
        vec![128u8; (width * height / 2) as usize],
    );
    PixelBuffer::new(PlanarLayout::BiPlanarYCbCr420FullRange, vec![y, uv])
}

/// Replays queued frames, then repeats `fallback`.
struct ScriptedSource {
    queue: VecDeque<Option<Frame>>,
    fallback: Option<Frame>,
    matte_requests: usize,
}

impl ScriptedSource {
    fn steady(width: u32, height: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: Some(Frame::new(0, 0.0, nv12(width, height))),
            matte_requests: 0,
        }
    }

    fn empty() -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: None,
            matte_requests: 0,
        }
    }
}

impl FrameSource<RecordingDevice> for ScriptedSource {
    fn current_frame(&mut self) -> Option<Frame> {
        match self.queue.pop_front() {
            Some(frame) => frame,
            None => self.fallback.clone(),
        }
    }

    fn generate_matte(
        &mut self,
        device: &RecordingDevice,
        frame: &Frame,
        resolution: MatteResolution,
        _cmd: &mut <RecordingDevice as GpuDevice>::CommandBuffer,
    ) -> RecordedTexture {
        self.matte_requests += 1;
        let desc = TextureDesc::new(
            resolution.scale(frame.captured_image.width()),
            resolution.scale(frame.captured_image.height()),
            TextureFormat::R8Unorm,
        );
        device.create_texture("alpha_matte", desc)
    }

    fn generate_dilated_depth(
        &mut self,
        device: &RecordingDevice,
        _frame: &Frame,
        _resolution: MatteResolution,
        _cmd: &mut <RecordingDevice as GpuDevice>::CommandBuffer,
    ) -> RecordedTexture {
        device.create_texture(
            "dilated_depth",
            TextureDesc::new(4, 4, TextureFormat::R32Float),
        )
    }
}

struct Session {
    device: Arc<RecordingDevice>,
    ctx: RenderContext<RecordingDevice>,
    target: RecordingTarget,
    scheduler: FrameScheduler,
}

fn session(device: RecordingDevice) -> Session {
    let device = Arc::new(device);
    let mut target = RecordingTarget::new();
    let ctx = RenderContext::new(device.clone(), &mut target, MatteConfig::default()).unwrap();
    let scheduler = FrameScheduler::for_context(&ctx).unwrap();
    Session {
        device,
        ctx,
        target,
        scheduler,
    }
}

impl Session {
    fn draw(&mut self, source: &mut ScriptedSource) -> FrameOutcome {
        self.scheduler
            .draw_frame(&mut self.ctx, source, &mut self.target)
            .unwrap()
    }
}

fn uniform_offsets(device: &RecordingDevice) -> Vec<u64> {
    device
        .submissions()
        .iter()
        .flat_map(|s| s.commands.clone())
        .filter_map(|c| match c {
            Command::SetUniformBuffer { offset, .. } => Some(offset),
            _ => None,
        })
        .collect()
}

#[test]
fn test_frame_encodes_exactly_one_strip_draw() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);

    let outcome = s.draw(&mut source);
    assert_eq!(outcome, FrameOutcome::Presented { frame: 0 });

    let submission = s.device.last_submission().unwrap();
    assert_eq!(
        submission.draws(),
        vec![&Command::Draw {
            topology: PrimitiveTopology::TriangleStrip,
            vertex_start: 0,
            vertex_count: 4,
        }]
    );
    assert_eq!(submission.bound_textures(), TextureSlot::ALL.to_vec());
    assert!(submission.presented());
    assert!(submission.commands.contains(&Command::SetVertexBuffer {
        slot: 0,
        buffer: VIDEO_PLANE_BUFFER.to_string(),
    }));
    assert!(submission.commands.contains(&Command::SetVertexBuffer {
        slot: 1,
        buffer: OVERLAY_PLANE_BUFFER.to_string(),
    }));
    assert_eq!(source.matte_requests, 1);
}

#[test]
fn test_missing_chroma_plane_skips_draw_but_commits() {
    let mut s = session(RecordingDevice::new());
    let mut buffer = nv12(64, 32);
    buffer.planes.truncate(1);
    let mut source = ScriptedSource::empty();
    source.queue.push_back(Some(Frame::new(0, 0.0, buffer)));

    let outcome = s.draw(&mut source);
    assert_eq!(
        outcome,
        FrameOutcome::Skipped {
            frame: 0,
            reason: SkipReason::MissingPlanes
        }
    );
    let submissions = s.device.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].draws().is_empty());
}

#[test]
fn test_no_frame_skips_without_matte_request() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::empty();

    let outcome = s.draw(&mut source);
    assert_eq!(
        outcome,
        FrameOutcome::Skipped {
            frame: 0,
            reason: SkipReason::NoFrame
        }
    );
    assert_eq!(source.matte_requests, 0);
    assert_eq!(s.device.submissions().len(), 1);
}

#[test]
fn test_target_not_ready_skips_and_returns_slot() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);
    s.target.set_ready(false);

    for _ in 0..5 {
        let outcome = s.draw(&mut source);
        assert!(matches!(
            outcome,
            FrameOutcome::Skipped {
                reason: SkipReason::TargetNotReady,
                ..
            }
        ));
    }
    assert_eq!(s.device.submissions().len(), 5);
    assert_eq!(s.target.presented(), 0);

    s.target.set_ready(true);
    assert!(s.draw(&mut source).is_presented());
}

#[test]
fn test_uniform_offsets_cycle_through_ring() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);
    for _ in 0..7 {
        s.draw(&mut source);
    }
    assert_eq!(
        uniform_offsets(&s.device),
        vec![0, 256, 512, 0, 256, 512, 0]
    );
}

#[test]
fn test_distance_change_reaches_next_frame() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);
    s.draw(&mut source);

    s.ctx.set_back_layer_distance(0.0);
    s.draw(&mut source);

    let offset = *uniform_offsets(&s.device).last().unwrap() as usize;
    let bytes = s.device.buffer_named(SHARED_UNIFORM_BUFFER).unwrap().contents();
    let shared: SharedUniforms = bytemuck::pod_read_unaligned(
        &bytes[offset..offset + std::mem::size_of::<SharedUniforms>()],
    );
    assert_eq!(shared.back_layer_distance, 1.0);
    assert_eq!(shared.frame_index, 1);
    assert_eq!(shared.viewport_size, [720.0, 1280.0]);
}

#[test]
fn test_resize_rewrites_video_plane_only() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(1920, 1080);
    s.draw(&mut source);

    let base = VertexPlane::base();
    let video = s.device.buffer_named(VIDEO_PLANE_BUFFER).unwrap().contents();
    let overlay = s.device.buffer_named(OVERLAY_PLANE_BUFFER).unwrap().contents();
    assert_ne!(video, base.as_bytes());
    assert_eq!(overlay, base.as_bytes());

    s.ctx.resize(1280, 720);
    s.draw(&mut source);
    let resized = s.device.buffer_named(VIDEO_PLANE_BUFFER).unwrap().contents();
    assert_ne!(resized, video);
}

#[test]
fn test_camera_cache_stays_bounded() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);
    for _ in 0..10 {
        s.draw(&mut source);
    }
    source.fallback = Some(Frame::new(10, 0.0, nv12(128, 64)));
    for _ in 0..10 {
        s.draw(&mut source);
    }
    assert_eq!(s.ctx.extractor().cache().len(), 2);
}

#[test]
fn test_set_layers_twice_is_idempotent() {
    let mut s = session(RecordingDevice::new());
    let front = LayerImage::from_frame_buffer(FrameBuffer::solid(4, 4, [255, 0, 0, 255])).unwrap();
    let back = LayerImage::from_frame_buffer(FrameBuffer::solid(8, 2, [0, 0, 255, 64])).unwrap();

    s.ctx.set_layers(&front, &back).unwrap();
    let first = (
        s.ctx.compositor().front_layer().contents(),
        s.ctx.compositor().back_layer().contents(),
    );
    s.ctx.set_layers(&front, &back).unwrap();
    let second = (
        s.ctx.compositor().front_layer().contents(),
        s.ctx.compositor().back_layer().contents(),
    );
    assert_eq!(first, second);
}

#[test]
fn test_all_completions_are_counted() {
    let mut s = session(RecordingDevice::new());
    let mut source = ScriptedSource::steady(64, 32);
    for _ in 0..6 {
        s.draw(&mut source);
    }
    s.scheduler.wait_idle(s.device.as_ref()).unwrap();
    assert_eq!(s.scheduler.frames_submitted(), 6);
    assert_eq!(s.scheduler.frames_completed(), 6);
    assert_eq!(s.scheduler.in_flight(), 0);
}

#[test]
fn test_throttle_blocks_until_a_frame_completes() {
    let mut s = session(RecordingDevice::manual());
    let mut source = ScriptedSource::steady(64, 32);
    for _ in 0..3 {
        s.draw(&mut source);
    }
    assert_eq!(s.device.pending_completions(), 3);

    let device = s.device.clone();
    let (tx, rx) = mpsc::channel();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let outcome = s.draw(&mut source);
            let _ = tx.send(outcome);
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "fourth frame must wait for a free slot"
        );
        // The three earlier frames still hold their uniform slots.
        assert_eq!(uniform_offsets(&device), vec![0, 256, 512]);

        assert!(device.complete_next());
        let outcome = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("fourth frame should proceed after a completion");
        assert!(outcome.is_presented());
    });

    assert_eq!(uniform_offsets(&s.device), vec![0, 256, 512, 0]);
    s.device.complete_all();
}

#[test]
fn test_scheduler_sized_from_context_ring() {
    let s = session(RecordingDevice::new());
    assert_eq!(s.scheduler.throttle().limit(), 3);
    assert_eq!(
        s.ctx.compositor().shared_uniforms().allocator().slots(),
        s.scheduler.throttle().limit()
    );
}

#[test]
fn test_more_frames_in_flight_than_ring_slots_is_rejected() {
    let mut s = session(RecordingDevice::manual());
    s.scheduler = FrameScheduler::new(4).unwrap();
    let mut source = ScriptedSource::steady(64, 32);

    let result = s
        .scheduler
        .draw_frame(&mut s.ctx, &mut source, &mut s.target);
    assert!(matches!(result, Err(MatteError::InvalidArgument(_))));
    // Nothing was touched: no submission, no slot advanced, no permit held.
    assert!(s.device.submissions().is_empty());
    assert_eq!(s.scheduler.frames_submitted(), 0);
    assert_eq!(s.scheduler.in_flight(), 0);
    assert_eq!(s.ctx.compositor().shared_uniforms().current_offset(), 0);
}

#[test]
fn test_full_throttle_waits_for_the_oldest_frame_only() {
    let mut s = session(RecordingDevice::deferred());
    let mut source = ScriptedSource::steady(64, 32);
    for _ in 0..3 {
        s.draw(&mut source);
    }
    assert_eq!(s.device.pending_completions(), 3);

    // The blocking poll retires frame 0 and leaves frames 1 and 2 queued.
    let outcome = s.draw(&mut source);
    assert_eq!(outcome, FrameOutcome::Presented { frame: 3 });
    assert_eq!(s.device.blocking_polls(), 1);
    assert_eq!(s.device.idle_waits(), 0);
    assert_eq!(s.device.pending_completions(), 3);
    assert_eq!(uniform_offsets(&s.device), vec![0, 256, 512, 0]);

    s.scheduler.wait_idle(s.device.as_ref()).unwrap();
    assert_eq!(s.device.pending_completions(), 0);
    assert_eq!(s.scheduler.frames_completed(), 4);
}

#[test]
fn test_video_range_frame_reaches_shared_uniforms() {
    let mut s = session(RecordingDevice::new());
    let mut frame = Frame::new(0, 0.0, nv12(64, 32));
    frame.captured_image.layout = PlanarLayout::BiPlanarYCbCr420VideoRange;
    let mut source = ScriptedSource {
        queue: VecDeque::from([Some(frame)]),
        fallback: None,
        matte_requests: 0,
    };

    assert!(s.draw(&mut source).is_presented());
    let ring = s.device.buffer_named(SHARED_UNIFORM_BUFFER).unwrap();
    let bytes = ring.contents();
    let size = std::mem::size_of::<SharedUniforms>();
    let shared: SharedUniforms = bytemuck::pod_read_unaligned(&bytes[..size]);
    assert_eq!(shared.video_range, 1);
}
