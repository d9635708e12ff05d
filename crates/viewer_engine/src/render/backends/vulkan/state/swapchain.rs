//! Swapchain management
//!
//! The swapchain is never changed in place. Every resize, format or present
//! mode change builds a new one with `old_swapchain` pointing at the previous
//! handle, and the previous handle with its image views is retired into the
//! deferred-destruction queue.
//!
//! Acquire and present take a [`QueueGuard`] so that callers serialize them
//! against every other queue operation.

use std::sync::Arc;

use ash::vk;

use crate::core::config::{ColorSpace, PresentMode};
use crate::render::backends::vulkan::initialization::context::SurfaceCore;
use crate::render::backends::vulkan::initialization::gfx::{DeviceCore, Gfx, QueueGuard};
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::handle::ImageView;
use crate::render::backends::vulkan::resources::image::create_view;

/// Preferred number of swapchain images
const PREFERRED_IMAGE_COUNT: u32 = 3;

/// A live or retired swapchain with its image views
pub struct SwapchainHandle {
    core: Arc<DeviceCore>,
    _surface: Arc<SurfaceCore>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<ImageView>,
}

impl SwapchainHandle {
    /// Raw swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        self.views.clear();
        unsafe {
            self.core.swapchain_loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// What the caller wants the swapchain to look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSpec {
    /// Framebuffer size in pixels
    pub extent: vk::Extent2D,
    /// Presentation mode; must be supported by the surface unless FIFO
    pub present_mode: PresentMode,
    /// Preferred output color space
    pub color_space: ColorSpace,
}

impl SwapchainSpec {
    /// Default modes at `extent`
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            present_mode: PresentMode::default(),
            color_space: ColorSpace::default(),
        }
    }
}

/// Number of images to request from the surface
///
/// A maximum below the minimum means the surface has no upper bound.
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count < caps.min_image_count {
        PREFERRED_IMAGE_COUNT.max(caps.min_image_count)
    } else {
        PREFERRED_IMAGE_COUNT.clamp(caps.min_image_count, caps.max_image_count)
    }
}

/// Image extent: the surface's current extent when defined, else the
/// requested one clamped to the allowed range
pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX && caps.current_extent.height != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn is_srgb(format: &vk::SurfaceFormatKHR) -> bool {
    format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        && matches!(
            format.format,
            vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32
        )
}

/// Surface format for the requested colour space
///
/// Formats split into an sRGB bucket and a linear bucket. The requested
/// bucket is searched first; anything else falls back to the first linear
/// format.
pub fn select_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    color_space: ColorSpace,
) -> VulkanResult<vk::SurfaceFormatKHR> {
    let (srgb, linear): (Vec<_>, Vec<_>) = formats.iter().copied().partition(is_srgb);

    let chosen = match color_space {
        ColorSpace::Srgb => srgb.first().or_else(|| linear.first()),
        ColorSpace::Linear => linear.first().or_else(|| srgb.first()),
    };
    chosen
        .copied()
        .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".into()))
}

/// FIFO is always accepted; other modes must be supported by the surface
pub fn validate_present_mode(
    requested: PresentMode,
    supported: &[vk::PresentModeKHR],
) -> VulkanResult<vk::PresentModeKHR> {
    let mode = requested.to_vk();
    if mode == vk::PresentModeKHR::FIFO || supported.contains(&mode) {
        Ok(mode)
    } else {
        Err(VulkanError::usage(format!(
            "present mode {requested:?} not supported by the surface (supported: {supported:?})"
        )))
    }
}

/// At most one acquired, not yet presented image
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcquireSlot {
    acquired: Option<u32>,
}

impl AcquireSlot {
    /// Whether a new image may be acquired
    pub fn is_free(&self) -> bool {
        self.acquired.is_none()
    }

    /// Record an acquired image; fails if one is already outstanding
    pub fn hold(&mut self, index: u32) -> bool {
        if self.acquired.is_some() {
            return false;
        }
        self.acquired = Some(index);
        true
    }

    /// Index held by the slot
    pub fn current(&self) -> Option<u32> {
        self.acquired
    }

    /// Release the acquired image for presentation
    pub fn take(&mut self) -> Option<u32> {
        self.acquired.take()
    }
}

/// The presentable surface images
pub struct Swapchain {
    gfx: Gfx,
    surface: Arc<SurfaceCore>,
    current: Option<SwapchainHandle>,
    spec: SwapchainSpec,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    acquired: AcquireSlot,
    dirty: bool,
    generation: u64,
}

impl Swapchain {
    /// Manager with no swapchain yet; the first `refresh` builds one
    pub fn new(gfx: Gfx, surface: Arc<SurfaceCore>, spec: SwapchainSpec) -> Self {
        Self {
            gfx,
            surface,
            current: None,
            spec,
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            acquired: AcquireSlot::default(),
            dirty: true,
            generation: 0,
        }
    }

    /// Ask for a different swapchain; it is rebuilt at the next acquire
    pub fn request(&mut self, spec: SwapchainSpec) {
        if spec != self.spec {
            self.spec = spec;
            self.dirty = true;
        }
    }

    /// Present modes the surface supports
    pub fn supported_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        self.surface.present_modes(self.gfx.physical_device())
    }

    /// Format a swapchain in `color_space` would use
    pub fn surface_format(&self, color_space: ColorSpace) -> VulkanResult<vk::Format> {
        let formats = self.surface.formats(self.gfx.physical_device())?;
        Ok(select_surface_format(&formats, color_space)?.format)
    }

    /// Build a new swapchain for `spec`, retiring the current one
    ///
    /// A zero-area extent leaves the current swapchain alone and keeps the
    /// rebuild pending.
    pub fn refresh(&mut self, spec: SwapchainSpec) -> VulkanResult<()> {
        self.spec = spec;
        let physical = self.gfx.physical_device();
        let caps = self.surface.capabilities(physical)?;
        let extent = select_extent(&caps, spec.extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Swapchain refresh skipped for zero-area extent");
            self.dirty = true;
            return Ok(());
        }

        let format = select_surface_format(&self.surface.formats(physical)?, spec.color_space)?;
        let present_mode = validate_present_mode(spec.present_mode, &self.surface.present_modes(physical)?)?;
        let image_count = select_image_count(&caps);

        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        ]
        .into_iter()
        .find(|&flag| caps.supported_composite_alpha.contains(flag))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let old = self.current.as_ref().map_or_else(vk::SwapchainKHR::null, SwapchainHandle::handle);
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let core = self.gfx.core().clone();
        let handle = unsafe {
            core.swapchain_loader.create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut new = SwapchainHandle {
            core: core.clone(),
            _surface: self.surface.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
        };
        // from here on `new` destroys the swapchain on error
        new.images = unsafe {
            core.swapchain_loader.get_swapchain_images(handle)
                .map_err(VulkanError::Api)?
        };
        for &image in &new.images {
            let view = create_view(&core, image, format.format, vk::ImageAspectFlags::COLOR, 1)?;
            new.views.push(view);
        }

        if let Some(old) = self.current.replace(new) {
            self.gfx.retire(old);
        }
        self.format = format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.acquired = AcquireSlot::default();
        self.dirty = false;
        self.generation += 1;

        log::info!(
            "Swapchain #{}: {}x{} {:?}/{:?} {:?}, {} images",
            self.generation,
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            self.image_count()
        );
        Ok(())
    }

    /// Acquire the next image, signalling `semaphore` when it is ready
    ///
    /// Returns `None` when no image can be rendered this frame: an image is
    /// already outstanding, the surface has zero area, or the swapchain was
    /// out of date and has been rebuilt.
    pub fn acquire(&mut self, _queue: &QueueGuard<'_>, semaphore: vk::Semaphore) -> VulkanResult<Option<u32>> {
        if !self.acquired.is_free() {
            return Ok(None);
        }
        if self.dirty || self.current.is_none() {
            self.refresh(self.spec)?;
        }
        let Some(current) = self.current.as_ref() else {
            return Ok(None);
        };
        if self.dirty {
            return Ok(None);
        }

        let result = unsafe {
            self.gfx.core().swapchain_loader.acquire_next_image(
                current.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    // the semaphore is already pending, so render this image
                    // and rebuild after presenting it
                    log::debug!("Swapchain suboptimal on acquire");
                    self.dirty = true;
                }
                self.acquired.hold(index);
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on acquire, rebuilding");
                self.refresh(self.spec)?;
                Ok(None)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Present the acquired image once `wait` signals
    ///
    /// Returns false when nothing was acquired or the swapchain turned out to
    /// be out of date; it is rebuilt in that case.
    pub fn present(&mut self, queue: &QueueGuard<'_>, wait: vk::Semaphore) -> VulkanResult<bool> {
        let Some(index) = self.acquired.take() else {
            return Ok(false);
        };
        let Some(current) = self.current.as_ref() else {
            return Ok(false);
        };

        let wait_semaphores = [wait];
        let swapchains = [current.handle];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.gfx.core().swapchain_loader.queue_present(queue.queue(), &present_info)
        };
        match result {
            Ok(suboptimal) => {
                if suboptimal || self.dirty {
                    self.refresh(self.spec)?;
                }
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date on present, rebuilding");
                self.refresh(self.spec)?;
                Ok(false)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Drop the acquired image without presenting it
    ///
    /// The image stays owned by this swapchain, so it is rebuilt at the next
    /// acquire and the old one retired with the image.
    pub fn abandon(&mut self) -> Option<u32> {
        let index = self.acquired.take()?;
        log::warn!("Swapchain image {index} abandoned, rebuilding");
        self.dirty = true;
        Some(index)
    }

    /// Image and view of swapchain image `index`
    pub fn image(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let current = self.current.as_ref()?;
        let image = *current.images.get(index as usize)?;
        let view = current.views.get(index as usize)?.raw();
        Some((image, view))
    }

    /// Currently acquired image, if any
    pub fn acquired(&self) -> Option<u32> {
        self.acquired.current()
    }

    /// Surface format of the images
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Size of the images in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Mode the swapchain was actually created with
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// What the swapchain was last asked to be
    pub fn spec(&self) -> SwapchainSpec {
        self.spec
    }

    /// Number of images; zero before the first build
    pub fn image_count(&self) -> usize {
        self.current.as_ref().map_or(0, |c| c.images.len())
    }

    /// Incremented on every rebuild
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once built and not waiting for a rebuild
    pub fn is_ready(&self) -> bool {
        self.current.is_some() && !self.dirty
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Some(current) = self.current.take() {
            self.gfx.retire(current);
        }
    }
}
