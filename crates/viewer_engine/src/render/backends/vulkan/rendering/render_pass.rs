//! Render pass and render targets
//!
//! [`RenderPass`] owns the multisampled colour image and the depth image,
//! sized to the framebuffer and recreated only when the extent changes. Each
//! frame `refresh` pairs them with the acquired swapchain image into a
//! [`RenderTarget`].
//!
//! Layout transitions are explicit barriers: `to_draw` moves every attachment
//! out of UNDEFINED before the pass, after the previous frame's attachment
//! writes and the acquire semaphore wait. `to_present` moves the swapchain
//! image to PRESENT_SRC after it.

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::gfx::Gfx;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::handle::Owned;
use crate::render::backends::vulkan::resources::image::{Image, ImageDesc};

/// Depth formats in order of preference
const DEPTH_CANDIDATES: [vk::Format; 2] = [vk::Format::D32_SFLOAT, vk::Format::D16_UNORM];

/// First candidate usable as an optimal-tiling depth attachment
pub fn pick_depth_format<F>(properties: F) -> Option<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    DEPTH_CANDIDATES.into_iter().find(|&format| {
        properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Attachment indices of the render pass and its framebuffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSlots {
    /// Color attachment, always first
    pub color: u32,
    /// Depth attachment when the pass has one
    pub depth: Option<u32>,
    /// Single-sample resolve target when multisampled
    pub resolve: Option<u32>,
}

impl AttachmentSlots {
    /// Slots for a pass with optional depth and MSAA resolve
    pub fn new(has_depth: bool, multisampled: bool) -> Self {
        let depth = has_depth.then_some(1);
        let resolve = multisampled.then_some(if has_depth { 2 } else { 1 });
        Self {
            color: 0,
            depth,
            resolve,
        }
    }

    /// Number of attachments
    pub fn count(&self) -> usize {
        1 + usize::from(self.depth.is_some()) + usize::from(self.resolve.is_some())
    }
}

fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;
    let mut attachments = vec![vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()];

    if let Some(format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }

    if multisampled {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }
    attachments
}

fn create_render_pass(
    gfx: &Gfx,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
) -> VulkanResult<Owned<vk::RenderPass>> {
    let attachments = attachment_descriptions(color_format, depth_format, samples);
    let slots = AttachmentSlots::new(depth_format.is_some(), samples != vk::SampleCountFlags::TYPE_1);

    let color_refs = [vk::AttachmentReference {
        attachment: slots.color,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = slots.depth.map(|attachment| vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    });
    let resolve_refs: Vec<_> = slots
        .resolve
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .into_iter()
        .collect();

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    if !resolve_refs.is_empty() {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    let subpasses = [subpass.build()];

    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(DRAW_SRC_STAGES)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(DRAW_DST_STAGES)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .build()];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let raw = unsafe {
        gfx.device().create_render_pass(&info, None)
            .map_err(VulkanError::Api)?
    };
    Ok(Owned::new(gfx.core().clone(), raw))
}

/// An image with the view used as an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// Backing image
    pub image: vk::Image,
    /// View bound in the framebuffer
    pub view: vk::ImageView,
}

/// Attachments of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// Rendered to; the multisampled image when MSAA is on, else the
    /// swapchain image
    pub color: Attachment,
    /// Swapchain image receiving the resolve when MSAA is on
    pub resolve: Option<Attachment>,
    /// Depth buffer when the pass has one
    pub depth: Option<Attachment>,
    /// Size shared by every attachment
    pub extent: vk::Extent2D,
}

impl RenderTarget {
    /// The image that ends up presented
    pub fn presented(&self) -> Attachment {
        self.resolve.unwrap_or(self.color)
    }

    /// Views in render pass attachment order
    pub fn views(&self) -> Vec<vk::ImageView> {
        let mut views = vec![self.color.view];
        views.extend(self.depth.map(|d| d.view));
        views.extend(self.resolve.map(|r| r.view));
        views
    }
}

struct Target {
    extent: vk::Extent2D,
    color: Option<Image>,
    depth: Option<Image>,
}

/// Render pass plus the persistent attachments
pub struct RenderPass {
    gfx: Gfx,
    raw: Owned<vk::RenderPass>,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
    target: Option<Target>,
}

impl RenderPass {
    /// Pick a supported depth format and build the pass
    pub fn new(gfx: Gfx, color_format: vk::Format, samples: vk::SampleCountFlags) -> VulkanResult<Self> {
        let depth_format = pick_depth_format(|format| gfx.format_properties(format));
        match depth_format {
            Some(format) => log::debug!("Depth format {format:?}"),
            None => log::warn!("No depth format supported, rendering without depth"),
        }
        let raw = create_render_pass(&gfx, color_format, depth_format, samples)?;
        Ok(Self {
            gfx,
            raw,
            color_format,
            depth_format,
            samples,
            target: None,
        })
    }

    /// Raw render pass handle
    pub fn raw(&self) -> vk::RenderPass {
        self.raw.raw()
    }

    /// Samples of the color and depth attachments
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Format of the color and resolve attachments
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Format of the depth attachment, if any
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// True when rendering with more than one sample
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Rebuild for a new colour format or sample count
    ///
    /// Returns the replaced render pass handle, already retired, when
    /// anything changed. Pipelines and framebuffers built against it must be
    /// dropped by the caller.
    pub fn rebuild(&mut self, color_format: vk::Format, samples: vk::SampleCountFlags) -> VulkanResult<Option<vk::RenderPass>> {
        if color_format == self.color_format && samples == self.samples {
            return Ok(None);
        }
        let raw = create_render_pass(&self.gfx, color_format, self.depth_format, samples)?;
        let old = std::mem::replace(&mut self.raw, raw);
        let old_handle = old.raw();
        self.gfx.retire(old);
        self.release_target();

        log::info!(
            "Render pass rebuilt: {:?} -> {color_format:?}, {} -> {} samples",
            self.color_format,
            self.samples.as_raw(),
            samples.as_raw()
        );
        self.color_format = color_format;
        self.samples = samples;
        Ok(Some(old_handle))
    }

    /// Pair the swapchain image with the persistent attachments, recreating
    /// them if `extent` changed
    pub fn refresh(&mut self, image: vk::Image, view: vk::ImageView, extent: vk::Extent2D) -> VulkanResult<RenderTarget> {
        if self.target.as_ref().map_or(true, |t| t.extent != extent) {
            self.release_target();
            self.target = Some(self.create_target(extent)?);
        }
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| VulkanError::usage("render target missing after creation"))?;

        let attach = |image: &Image| Attachment {
            image: image.handle(),
            view: image.view(),
        };
        let swapchain = Attachment { image, view };
        let (color, resolve) = match target.color.as_ref() {
            Some(msaa) => (attach(msaa), Some(swapchain)),
            None => (swapchain, None),
        };

        Ok(RenderTarget {
            color,
            resolve,
            depth: target.depth.as_ref().map(attach),
            extent,
        })
    }

    fn create_target(&self, extent: vk::Extent2D) -> VulkanResult<Target> {
        let color = if self.is_multisampled() {
            let desc = ImageDesc::color(
                extent,
                self.color_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            )
            .with_samples(self.samples);
            Some(self.gfx.create_image(&desc)?)
        } else {
            None
        };

        let depth = match self.depth_format {
            Some(format) => {
                let desc = ImageDesc::color(
                    extent,
                    format,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                )
                .with_samples(self.samples)
                .with_aspect(vk::ImageAspectFlags::DEPTH);
                Some(self.gfx.create_image(&desc)?)
            }
            None => None,
        };

        log::debug!("Render target {}x{} created", extent.width, extent.height);
        Ok(Target { extent, color, depth })
    }

    fn release_target(&mut self) {
        if let Some(target) = self.target.take() {
            for image in [target.color, target.depth].into_iter().flatten() {
                self.gfx.retire(image);
            }
        }
    }

    /// Record the whole primary command buffer: transitions, the render pass
    /// executing `secondaries`, and the transition to present
    pub fn execute(
        &self,
        primary: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        target: &RenderTarget,
        secondaries: &[vk::CommandBuffer],
        clear_color: [f32; 4],
    ) -> VulkanResult<()> {
        let device = self.gfx.device();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.begin_command_buffer(primary, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        to_draw(device, primary, target);

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        if target.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }
        if target.resolve.is_some() {
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            });
        }

        let begin = vk::RenderPassBeginInfo::builder()
            .render_pass(self.raw())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(primary, &begin, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS);
            if !secondaries.is_empty() {
                device.cmd_execute_commands(primary, secondaries);
            }
            device.cmd_end_render_pass(primary);
        }

        to_present(device, primary, target);

        unsafe {
            device.end_command_buffer(primary)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.release_target();
    }
}

/// Stages that last touched the attachments: the previous frame's colour
/// writes and depth tests, and the acquire semaphore wait
const DRAW_SRC_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

const DRAW_DST_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

fn layout_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build()
}

/// Barriers moving every attachment of `target` from UNDEFINED to its
/// attachment layout
///
/// The persistent MSAA and depth images are shared by all frames in flight,
/// so each barrier waits for the previous frame's writes to them.
fn draw_barriers(target: &RenderTarget) -> Vec<vk::ImageMemoryBarrier> {
    let color_access = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    let color = |image| {
        layout_barrier(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            color_access,
        )
    };

    let mut barriers = vec![color(target.color.image)];
    barriers.extend(target.resolve.map(|resolve| color(resolve.image)));
    if let Some(depth) = target.depth {
        barriers.push(layout_barrier(
            depth.image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ));
    }
    barriers
}

/// Move every attachment from UNDEFINED to its attachment layout
pub fn to_draw(device: &Device, cmd: vk::CommandBuffer, target: &RenderTarget) {
    let barriers = draw_barriers(target);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            DRAW_SRC_STAGES,
            DRAW_DST_STAGES,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &barriers,
        );
    }
}

/// Move the presented image to PRESENT_SRC
pub fn to_present(device: &Device, cmd: vk::CommandBuffer, target: &RenderTarget) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(target.presented().image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn with_features(supported: &'static [vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_depth_prefers_32_bit_float() {
        let pick = pick_depth_format(with_features(&[vk::Format::D16_UNORM, vk::Format::D32_SFLOAT]));
        assert_eq!(pick, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_depth_falls_back_to_16_bit() {
        assert_eq!(
            pick_depth_format(with_features(&[vk::Format::D16_UNORM])),
            Some(vk::Format::D16_UNORM)
        );
        assert_eq!(pick_depth_format(with_features(&[])), None);
    }

    #[test]
    fn test_attachment_slots() {
        assert_eq!(AttachmentSlots::new(true, true), AttachmentSlots { color: 0, depth: Some(1), resolve: Some(2) });
        assert_eq!(AttachmentSlots::new(false, true), AttachmentSlots { color: 0, depth: None, resolve: Some(1) });
        assert_eq!(AttachmentSlots::new(true, false).count(), 2);
        assert_eq!(AttachmentSlots::new(false, false).count(), 1);
    }

    #[test]
    fn test_descriptions_match_slots() {
        let msaa = attachment_descriptions(vk::Format::B8G8R8A8_SRGB, Some(vk::Format::D32_SFLOAT), vk::SampleCountFlags::TYPE_4);
        assert_eq!(msaa.len(), AttachmentSlots::new(true, true).count());
        assert_eq!(msaa[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(msaa[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(msaa[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(msaa[2].store_op, vk::AttachmentStoreOp::STORE);

        let single = attachment_descriptions(vk::Format::B8G8R8A8_SRGB, None, vk::SampleCountFlags::TYPE_1);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn test_target_views_follow_attachment_order() {
        let attachment = |n: u64| Attachment {
            image: vk::Image::from_raw(n),
            view: vk::ImageView::from_raw(n + 100),
        };
        let target = RenderTarget {
            color: attachment(1),
            resolve: Some(attachment(2)),
            depth: Some(attachment(3)),
            extent: vk::Extent2D { width: 4, height: 4 },
        };
        let views: Vec<u64> = target.views().iter().map(|v| v.as_raw()).collect();
        assert_eq!(views, vec![101, 103, 102]);
        assert_eq!(target.presented(), attachment(2));

        let direct = RenderTarget { resolve: None, ..target };
        assert_eq!(direct.presented(), attachment(1));
    }

    #[test]
    fn test_draw_barriers_wait_for_previous_writes() {
        assert!(!DRAW_SRC_STAGES.contains(vk::PipelineStageFlags::TOP_OF_PIPE));
        assert!(DRAW_SRC_STAGES.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(DRAW_SRC_STAGES.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(DRAW_DST_STAGES.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));

        let target = RenderTarget {
            color: Attachment {
                image: vk::Image::from_raw(1),
                view: vk::ImageView::from_raw(11),
            },
            resolve: Some(Attachment {
                image: vk::Image::from_raw(2),
                view: vk::ImageView::from_raw(12),
            }),
            depth: Some(Attachment {
                image: vk::Image::from_raw(3),
                view: vk::ImageView::from_raw(13),
            }),
            extent: vk::Extent2D { width: 4, height: 4 },
        };
        let barriers = draw_barriers(&target);
        assert_eq!(barriers.len(), 3);
        for barrier in &barriers[..2] {
            assert_eq!(barrier.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
            assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        assert_eq!(barriers[2].image, vk::Image::from_raw(3));
        assert_eq!(barriers[2].src_access_mask, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);
        assert!(barriers[2].dst_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }
}
