//! Frame orchestration: acquire, record, submit, present.
//!
//! [`FrameLoop`] owns N frame slots (command buffer, acquire semaphore,
//! render-complete semaphore, in-flight fence each), created once at startup
//! and reused every cycle. [`FrameLoop::draw`] runs one tick of the
//! acquire → record → submit → present cycle and sweeps deferred destruction
//! before the caller's commands are recorded.
//!
//! The CPU suspends in exactly two places: swapchain image acquisition and
//! the current slot's fence wait. Both are bounded waits on driver
//! primitives.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use hybrid_rhi::command::{CommandBuffer, CommandPool};
use hybrid_rhi::device::DeviceContext;
use hybrid_rhi::swapchain::Swapchain;
use hybrid_rhi::sync::{Fence, Semaphore};
use hybrid_rhi::RhiError;

use crate::error::RenderResult;
use crate::lifetime::ResourceLifetimeTracker;
use crate::pacing::FrameSlots;

/// Result of one draw tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A frame was recorded, submitted and presented.
    Rendered,
    /// Acquire or present reported the swapchain out of date or suboptimal.
    /// The caller must rebuild the swapchain and its dependent resources
    /// before drawing again.
    SwapchainOutOfDate,
    /// The render extent is zero (minimized window); no GPU work was
    /// submitted. A valid steady state, not a failure.
    Idle,
}

/// Per-slot GPU-side synchronization.
struct FrameSync {
    /// Signaled when the acquired image is ready to be rendered to.
    acquire: Semaphore,
    /// Signaled when the slot's submission finishes; presentation waits on
    /// it.
    render_complete: Semaphore,
}

/// Drives the per-frame cycle and owns all per-slot resources.
pub struct FrameLoop {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Pool the per-slot command buffers are allocated from.
    command_pool: CommandPool,
    /// One command buffer per frame slot, reused every cycle.
    command_buffers: Vec<vk::CommandBuffer>,
    /// One semaphore pair per frame slot.
    sync: Vec<FrameSync>,
    /// Slot cycling and fence state.
    slots: FrameSlots<Fence>,
    /// Deferred destruction queue, swept once per draw.
    tracker: ResourceLifetimeTracker,
    /// Current render extent; zero suspends submission.
    extent: vk::Extent2D,
}

impl FrameLoop {
    /// Creates the frame loop with `frame_count` slots.
    ///
    /// Fences start signaled so the first cycle through each slot does not
    /// block.
    ///
    /// # Errors
    ///
    /// Returns an error if command buffer or synchronization primitive
    /// creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        frame_count: u32,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
        let command_buffers = command_pool.allocate_command_buffers(frame_count)?;

        let mut sync = Vec::with_capacity(frame_count as usize);
        let mut fences = Vec::with_capacity(frame_count as usize);

        for i in 0..frame_count {
            sync.push(FrameSync {
                acquire: Semaphore::new(device.clone())?,
                render_complete: Semaphore::new(device.clone())?,
            });
            fences.push(Fence::new(device.clone(), true)?);
            debug!("Created frame slot {}", i);
        }

        info!("Frame loop created with {} slots", frame_count);

        Ok(Self {
            device,
            command_pool,
            command_buffers,
            sync,
            slots: FrameSlots::new(fences),
            tracker: ResourceLifetimeTracker::new(),
            extent,
        })
    }

    /// Returns the number of frame slots.
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.slots.slot_count()
    }

    /// Returns the current frame slot index.
    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.slots.current()
    }

    /// Non-blocking check whether the given slot's submission is still in
    /// flight.
    #[inline]
    pub fn is_frame_active(&self, index: u32) -> bool {
        !self.slots.is_complete(index)
    }

    /// Updates the render extent.
    ///
    /// A zero extent suspends submission: subsequent [`FrameLoop::draw`]
    /// calls return [`DrawOutcome::Idle`] without touching the GPU until the
    /// extent becomes nonzero again.
    pub fn resize(&mut self, extent: vk::Extent2D) {
        if extent.width == 0 || extent.height == 0 {
            debug!("Render extent is zero; frame loop idles");
        }
        self.extent = extent;
    }

    /// Requests deferred destruction of a GPU resource.
    ///
    /// Snapshots the frame slots currently in flight; the closure runs
    /// during a later sweep, once every snapshotted slot has signaled.
    /// Returns immediately.
    pub fn destroy_deferred(&mut self, destroy: impl FnOnce() + 'static) {
        self.tracker
            .request_destroy(self.slots.active_slots(), destroy);
    }

    /// Waits for the device to idle and force-completes every deferred
    /// entry.
    ///
    /// Must run before the frame-slot count changes (swapchain transition):
    /// snapshots taken against the old slot count are not trustworthy across
    /// the change, so the conservative full wait replaces them.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-idle wait fails.
    pub fn flush_deferred(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.tracker.force_complete_all();
        Ok(())
    }

    /// Runs one tick of the frame cycle.
    ///
    /// Sequence: acquire the next swapchain image with the slot's acquire
    /// semaphore, wait the slot's fence, sweep deferred destruction, reset
    /// the fence, record the caller's commands, submit (waiting on the
    /// acquire semaphore, signaling the render-complete semaphore and the
    /// slot fence), present, advance the slot index.
    ///
    /// The callback must not block and must not call `draw` itself.
    ///
    /// # Errors
    ///
    /// Out-of-date/suboptimal swapchain conditions are surfaced as
    /// [`DrawOutcome::SwapchainOutOfDate`], never as `Err`. Any other native
    /// failure is unrecoverable and propagated.
    pub fn draw(
        &mut self,
        swapchain: &Swapchain,
        callback: impl FnOnce(&CommandBuffer, u32) -> RenderResult<()>,
    ) -> RenderResult<DrawOutcome> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Ok(DrawOutcome::Idle);
        }

        let slot = self.slots.current() as usize;
        let sync = &self.sync[slot];

        // Acquire before any state change so an out-of-date swapchain
        // abandons the frame with nothing to unwind.
        let (image_index, acquire_suboptimal) =
            match swapchain.acquire_next_image(sync.acquire.handle()) {
                Ok(result) => result,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("Swapchain out of date on acquire");
                    return Ok(DrawOutcome::SwapchainOutOfDate);
                }
                Err(e) => return Err(RhiError::VulkanError(e).into()),
            };

        // The only hard backpressure point: slot reuse waits for the GPU to
        // finish the slot's previous submission.
        self.slots.wait_current()?;

        // Sweep while the waited fence still reads signaled, so entries
        // pending on this slot drain before the reset hides the signal.
        let Self { tracker, slots, .. } = self;
        tracker.sweep(|frame| slots.is_complete(frame));

        self.slots.reset_current()?;

        let cmd = CommandBuffer::from_handle(self.device.clone(), self.command_buffers[slot]);
        cmd.reset()?;
        cmd.begin()?;
        callback(&cmd, image_index)?;
        cmd.end()?;

        let wait_semaphores = [sync.acquire.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[slot]];
        let signal_semaphores = [sync.render_complete.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], self.slots.current_fence().handle())?;
        }

        let present_result = swapchain.present(
            self.device.present_queue(),
            image_index,
            sync.render_complete.handle(),
        );

        // Presentation order equals submission order; the index advances
        // even when the present reports a stale swapchain, since the
        // submission itself went through and will signal the slot fence.
        self.slots.advance();

        let outcome = match present_result {
            Ok(false) if !acquire_suboptimal => DrawOutcome::Rendered,
            Ok(_) => {
                debug!("Swapchain suboptimal; surfacing rebuild condition");
                DrawOutcome::SwapchainOutOfDate
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain out of date on present");
                DrawOutcome::SwapchainOutOfDate
            }
            Err(e) => return Err(RhiError::VulkanError(e).into()),
        };

        Ok(outcome)
    }

    /// Shuts the loop down: waits out pending GPU work, then force-completes
    /// every deferred entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-idle wait fails; deferred entries are
    /// force-completed regardless.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        let wait_result = self.device.wait_idle();
        self.tracker.force_complete_all();
        wait_result?;
        Ok(())
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        // Pending GPU work must be waited out before per-slot resources and
        // deferred entries are torn down.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during frame loop drop: {:?}", e);
        }
        self.tracker.force_complete_all();

        debug!(
            "Releasing {} frame command buffers from queue family {}",
            self.command_buffers.len(),
            self.command_pool.queue_family_index()
        );

        info!("Frame loop destroyed");
        // Semaphores, fences and the command pool drop afterwards.
    }
}
