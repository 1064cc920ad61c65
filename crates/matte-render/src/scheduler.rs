//! Per-frame orchestration and the in-flight throttle.
//!
//! At most `max_frames_in_flight` command buffers are outstanding at once.
//! Each frame holds a semaphore permit from before any uniform slot is
//! touched until the GPU reports completion; the completion callback hands
//! the permit to a dedicated thread that releases it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use matte_core::{MatteError, MatteResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::context::RenderContext;
use crate::device::{GpuDevice, RenderEncoder, RenderTarget};
use crate::matte::FrameSource;

/// Why a frame produced no composite draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source had no captured frame.
    NoFrame,
    /// The captured image could not be split into luma and chroma planes.
    MissingPlanes,
    /// The presentation surface had no pass target to render into.
    TargetNotReady,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoFrame => write!(f, "no-frame"),
            SkipReason::MissingPlanes => write!(f, "missing-planes"),
            SkipReason::TargetNotReady => write!(f, "target-not-ready"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame: u64 },
    Skipped { frame: u64, reason: SkipReason },
}

impl FrameOutcome {
    pub fn frame(&self) -> u64 {
        match self {
            FrameOutcome::Presented { frame } | FrameOutcome::Skipped { frame, .. } => *frame,
        }
    }

    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented { .. })
    }
}

struct Completion {
    frame_index: u64,
    _permit: OwnedSemaphorePermit,
}

/// Counting semaphore bounding the number of frames the GPU may hold.
pub struct InFlightThrottle {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl InFlightThrottle {
    pub fn new(limit: usize) -> MatteResult<Self> {
        if limit == 0 {
            return Err(MatteError::InvalidArgument(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    /// Take a frame slot, blocking the caller until one is free.
    pub fn acquire<D: GpuDevice + ?Sized>(&self, device: &D) -> MatteResult<OwnedSemaphorePermit> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(permit);
        }
        tracing::trace!(
            limit = self.limit,
            "all frame slots in flight, waiting for the GPU"
        );
        device.poll(true);
        pollster::block_on(self.permits.clone().acquire_owned())
            .map_err(|_| MatteError::Render("frame throttle closed".to_string()))
    }

    /// Block until every outstanding slot has been returned.
    pub fn wait_idle<D: GpuDevice + ?Sized>(&self, device: &D) -> MatteResult<()> {
        device.wait_idle();
        let all = pollster::block_on(self.permits.clone().acquire_many_owned(self.limit as u32))
            .map_err(|_| MatteError::Render("frame throttle closed".to_string()))?;
        drop(all);
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

/// Drives one frame at a time through a [`RenderContext`].
pub struct FrameScheduler {
    throttle: InFlightThrottle,
    completions: mpsc::Sender<Completion>,
    completed: Arc<AtomicU64>,
    next_frame: u64,
}

impl FrameScheduler {
    pub fn new(max_in_flight: usize) -> MatteResult<Self> {
        let throttle = InFlightThrottle::new(max_in_flight)?;

        let (completions, rx) = mpsc::channel::<Completion>();
        let completed = Arc::new(AtomicU64::new(0));
        let retired = completed.clone();
        std::thread::Builder::new()
            .name("matte-completions".to_string())
            .spawn(move || {
                for completion in rx {
                    retired.fetch_add(1, Ordering::SeqCst);
                    tracing::trace!(frame = completion.frame_index, "frame retired");
                }
            })?;

        Ok(Self {
            throttle,
            completions,
            completed,
            next_frame: 0,
        })
    }

    /// A scheduler allowing as many frames in flight as `ctx` has uniform
    /// ring slots.
    pub fn for_context<D: GpuDevice>(ctx: &RenderContext<D>) -> MatteResult<Self> {
        Self::new(ring_slots(ctx))
    }

    /// Run one frame: throttle, gather inputs, encode, present and commit.
    ///
    /// The command buffer is committed even when the draw is skipped, so the
    /// frame's permit is always returned.
    pub fn draw_frame<D, S, T>(
        &mut self,
        ctx: &mut RenderContext<D>,
        source: &mut S,
        target: &mut T,
    ) -> MatteResult<FrameOutcome>
    where
        D: GpuDevice,
        S: FrameSource<D> + ?Sized,
        T: RenderTarget<D>,
    {
        // A frame slot is only safe to rewrite once its frame has retired.
        let slots = ring_slots(ctx);
        if self.throttle.limit() > slots {
            return Err(MatteError::InvalidArgument(format!(
                "{} frames in flight would overrun {} uniform ring slots",
                self.throttle.limit(),
                slots
            )));
        }

        let device = ctx.device().clone();
        let permit = self.throttle.acquire(device.as_ref())?;

        let frame_number = self.next_frame;
        self.next_frame += 1;
        let mut cmd = device.create_command_buffer(&format!("frame_{}", frame_number));

        ctx.compositor_mut().prepare_frame();

        let frame = source.current_frame();
        let mut skip = match &frame {
            Some(frame) => {
                let found = ctx.update_camera(frame);
                ctx.update_geometry(frame);
                (!found).then_some(SkipReason::MissingPlanes)
            }
            None => {
                ctx.compositor_mut().set_camera_planes(None);
                Some(SkipReason::NoFrame)
            }
        };
        ctx.update_matte(source, frame.as_ref(), &mut cmd);

        match target.current_pass() {
            Some(pass) => {
                {
                    let mut encoder = device.begin_render_pass(&mut cmd, &pass);
                    ctx.compositor_mut().composite(&mut encoder);
                    encoder.end_encoding();
                }
                target.present(&device, &mut cmd, pass);
            }
            None => {
                ctx.compositor_mut().set_camera_planes(None);
                skip.get_or_insert(SkipReason::TargetNotReady);
            }
        }

        let completions = self.completions.clone();
        device.commit(
            cmd,
            Box::new(move || {
                // A closed channel means the scheduler is gone; the permit
                // is released when the completion drops here.
                let _ = completions.send(Completion {
                    frame_index: frame_number,
                    _permit: permit,
                });
            }),
        );

        Ok(match skip {
            Some(reason) => {
                tracing::debug!(frame = frame_number, %reason, "frame skipped");
                FrameOutcome::Skipped {
                    frame: frame_number,
                    reason,
                }
            }
            None => {
                tracing::trace!(frame = frame_number, "frame presented");
                FrameOutcome::Presented {
                    frame: frame_number,
                }
            }
        })
    }

    pub fn throttle(&self) -> &InFlightThrottle {
        &self.throttle
    }

    /// Frames whose command buffers have not yet been retired.
    pub fn in_flight(&self) -> usize {
        self.throttle.in_flight()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.next_frame
    }

    pub fn frames_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Block until every submitted frame has been retired.
    pub fn wait_idle<D: GpuDevice + ?Sized>(&self, device: &D) -> MatteResult<()> {
        self.throttle.wait_idle(device)
    }
}

fn ring_slots<D: GpuDevice>(ctx: &RenderContext<D>) -> usize {
    let compositor = ctx.compositor();
    compositor
        .shared_uniforms()
        .allocator()
        .slots()
        .min(compositor.anchor_uniforms().allocator().slots())
}
