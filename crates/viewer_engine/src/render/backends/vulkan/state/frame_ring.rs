//! Frames in flight
//!
//! Each [`RenderFrame`] is one buffering slot: acquire and render-finished
//! semaphores, a fence signalled when the GPU is done with the slot, a command
//! pool with one primary and up to [`MAX_SECONDARY`] secondary command
//! buffers, and the framebuffer for the current render target.
//!
//! The fence wait before a slot is re-recorded is the only thing bounding how
//! far the CPU runs ahead of the GPU.

use std::sync::Arc;

use ash::vk;

use super::sync::{Fence, Semaphore};
use crate::render::backends::vulkan::initialization::gfx::{DeviceCore, Gfx, QueueGuard};
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::rendering::render_pass::RenderTarget;
use crate::render::backends::vulkan::resources::handle::{Framebuffer, Owned};

/// Secondary command buffers per frame
pub const MAX_SECONDARY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FramebufferKey {
    render_pass: vk::RenderPass,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

/// One buffering slot
pub struct RenderFrame {
    core: Arc<DeviceCore>,
    draw: Semaphore,
    present: Semaphore,
    fence: Fence,
    pool: vk::CommandPool,
    primary: vk::CommandBuffer,
    secondaries: Vec<vk::CommandBuffer>,
    open: usize,
    framebuffer: Option<(Framebuffer, FramebufferKey)>,
    inheritance: Option<(vk::RenderPass, vk::Framebuffer)>,
}

impl RenderFrame {
    fn new(gfx: &Gfx) -> VulkanResult<Self> {
        let core = gfx.core().clone();
        let device = &core.device;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(gfx.queue_family());
        let pool = unsafe {
            device.create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let allocate = |level, count| {
            let info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(level)
                .command_buffer_count(count);
            unsafe { device.allocate_command_buffers(&info) }
        };
        let buffers = allocate(vk::CommandBufferLevel::PRIMARY, 1)
            .and_then(|primary| Ok((primary, allocate(vk::CommandBufferLevel::SECONDARY, MAX_SECONDARY as u32)?)));
        let (primary, secondaries) = match buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let sync = (|| -> VulkanResult<_> {
            Ok((
                Semaphore::new(core.clone())?,
                Semaphore::new(core.clone())?,
                Fence::new(core.clone(), true)?,
            ))
        })();
        let (draw, present, fence) = match sync {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            core: core.clone(),
            draw,
            present,
            fence,
            pool,
            primary: primary[0],
            secondaries,
            open: 0,
            framebuffer: None,
            inheritance: None,
        })
    }

    /// Signalled when the acquired image is ready to be drawn to
    pub fn draw_semaphore(&self) -> vk::Semaphore {
        self.draw.handle()
    }

    /// Signalled when rendering finished and the image may be presented
    pub fn present_semaphore(&self) -> vk::Semaphore {
        self.present.handle()
    }

    /// Signalled when the GPU finished this slot's last submission
    pub fn fence(&self) -> vk::Fence {
        self.fence.handle()
    }

    /// Primary command buffer executing the secondaries
    pub fn primary(&self) -> vk::CommandBuffer {
        self.primary
    }

    /// Framebuffer of the current target
    pub fn framebuffer(&self) -> VulkanResult<vk::Framebuffer> {
        self.framebuffer
            .as_ref()
            .map(|(framebuffer, _)| framebuffer.raw())
            .ok_or_else(|| VulkanError::usage("frame has no framebuffer, refresh it first"))
    }

    /// First secondary command buffer, recording
    pub fn secondary(&self) -> VulkanResult<vk::CommandBuffer> {
        if self.open == 0 {
            return Err(VulkanError::usage("no secondary command buffer is recording"));
        }
        Ok(self.secondaries[0])
    }

    /// Secondary command buffers begun this frame
    pub fn open_secondaries(&self) -> &[vk::CommandBuffer] {
        &self.secondaries[..self.open]
    }

    /// Begin one more secondary command buffer for the current render pass
    pub fn begin_secondary(&mut self) -> VulkanResult<vk::CommandBuffer> {
        let (render_pass, framebuffer) = self
            .inheritance
            .ok_or_else(|| VulkanError::usage("secondary begun before the frame was refreshed"))?;
        let cmd = next_secondary(&self.secondaries, self.open)?;

        let inheritance = vk::CommandBufferInheritanceInfo::builder()
            .render_pass(render_pass)
            .subpass(0)
            .framebuffer(framebuffer);
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance);
        unsafe {
            self.core.device.begin_command_buffer(cmd, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        self.open += 1;
        Ok(cmd)
    }

    fn update_framebuffer(&mut self, gfx: &Gfx, render_pass: vk::RenderPass, target: &RenderTarget) -> VulkanResult<()> {
        let key = FramebufferKey {
            render_pass,
            views: target.views(),
            extent: target.extent,
        };
        if self.framebuffer.as_ref().is_some_and(|(_, current)| *current == key) {
            return Ok(());
        }

        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&key.views)
            .width(key.extent.width)
            .height(key.extent.height)
            .layers(1);
        let raw = unsafe {
            self.core.device.create_framebuffer(&info, None)
                .map_err(VulkanError::Api)?
        };

        if let Some((old, _)) = self.framebuffer.replace((Owned::new(self.core.clone(), raw), key)) {
            gfx.retire(old);
        }
        Ok(())
    }
}

/// The secondary command buffer after the `open` ones already begun
fn next_secondary(secondaries: &[vk::CommandBuffer], open: usize) -> VulkanResult<vk::CommandBuffer> {
    secondaries.get(open).copied().ok_or_else(|| {
        VulkanError::usage(format!("at most {MAX_SECONDARY} secondary command buffers per frame"))
    })
}

impl Drop for RenderFrame {
    fn drop(&mut self) {
        unsafe {
            self.core.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Round-robin ring of [`RenderFrame`]s
pub struct FrameRing {
    gfx: Gfx,
    frames: Vec<RenderFrame>,
    index: usize,
}

impl FrameRing {
    /// One slot per frame in flight
    pub fn new(gfx: Gfx) -> VulkanResult<Self> {
        let frames = (0..gfx.buffering().max(1))
            .map(|_| RenderFrame::new(&gfx))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!("Frame ring with {} slot(s)", frames.len());
        Ok(Self { gfx, frames, index: 0 })
    }

    /// Slot being recorded
    pub fn current(&self) -> &RenderFrame {
        &self.frames[self.index]
    }

    /// Slot being recorded, mutably
    pub fn current_mut(&mut self) -> &mut RenderFrame {
        &mut self.frames[self.index]
    }

    /// Index of the current slot
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of slots, the buffering depth
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True for a ring without slots
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Block until the GPU finished the last submission of the current slot
    pub fn wait(&self) -> VulkanResult<()> {
        self.gfx.wait(self.current().fence())
    }

    /// Prepare the current slot for recording against `target`
    ///
    /// The framebuffer is rebuilt only when the target's views or extent
    /// changed. The command pool is reset and the first secondary command
    /// buffer begun. The slot's fence must have been waited on.
    pub fn refresh(&mut self, render_pass: vk::RenderPass, target: &RenderTarget) -> VulkanResult<()> {
        let gfx = self.gfx.clone();
        let frame = self.current_mut();
        frame.update_framebuffer(&gfx, render_pass, target)?;

        unsafe {
            frame.core.device.reset_command_pool(frame.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        frame.open = 0;
        frame.inheritance = Some((render_pass, frame.framebuffer()?));
        frame.begin_secondary()?;
        Ok(())
    }

    /// End every secondary command buffer begun this frame
    pub fn end_secondaries(&mut self) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let frame = self.current_mut();
        let open = frame.open_secondaries().to_vec();
        for &cmd in &open {
            unsafe {
                frame.core.device.end_command_buffer(cmd)
                    .map_err(VulkanError::Api)?;
            }
        }
        frame.open = 0;
        frame.inheritance = None;
        Ok(open)
    }

    /// Submit the current slot's primary command buffer
    ///
    /// Waits for the acquire semaphore at colour output, signals the
    /// render-finished semaphore and the slot's fence.
    pub fn submit(&self, queue: &QueueGuard<'_>) -> VulkanResult<()> {
        let frame = self.current();
        frame.fence.reset()?;

        let wait_semaphores = [frame.draw_semaphore()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.primary];
        let signal_semaphores = [frame.present_semaphore()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            frame.core.device.queue_submit(queue.queue(), &[submit_info.build()], frame.fence())
                .map_err(VulkanError::Api)
        }
    }

    /// Undo a frame that failed between acquire and submit
    ///
    /// An empty submission consumes the pending acquire signal on the draw
    /// semaphore and re-signals the slot's fence, leaving the slot ready for
    /// the next `wait`.
    pub fn abandon(&mut self, queue: &QueueGuard<'_>) -> VulkanResult<()> {
        let frame = self.current_mut();
        frame.open = 0;
        frame.inheritance = None;
        frame.fence.reset()?;

        let wait_semaphores = [frame.draw_semaphore()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            frame.core.device.queue_submit(queue.queue(), &[submit_info.build()], frame.fence())
                .map_err(VulkanError::Api)
        }
    }

    /// Move to the next slot
    pub fn rotate(&mut self) {
        self.index = (self.index + 1) % self.frames.len();
    }

    /// Drop every framebuffer, e.g. after the render pass was rebuilt
    pub fn invalidate(&mut self) {
        for frame in &mut self.frames {
            if let Some((framebuffer, _)) = frame.framebuffer.take() {
                self.gfx.retire(framebuffer);
            }
        }
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_secondaries_limited_per_frame() {
        let secondaries: Vec<_> = (1..=MAX_SECONDARY as u64).map(vk::CommandBuffer::from_raw).collect();
        for open in 0..MAX_SECONDARY {
            assert_eq!(next_secondary(&secondaries, open).unwrap(), secondaries[open]);
        }
        let over = next_secondary(&secondaries, MAX_SECONDARY);
        assert!(matches!(over, Err(VulkanError::InvalidUsage { .. })));
    }
}
