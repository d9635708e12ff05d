//! Device-local images with a default view

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use super::handle::{ImageView, Owned};
use crate::render::backends::vulkan::initialization::gfx::DeviceCore;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Parameters for [`Image::new`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Single-sampled colour image without mips
    pub fn color(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}

/// Image, its allocation and a view over every mip level
pub struct Image {
    core: Arc<DeviceCore>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: ManuallyDrop<ImageView>,
    desc: ImageDesc,
}

// SAFETY: the allocation handle is only touched in Drop, which has exclusive access.
unsafe impl Send for Image {}
unsafe impl Sync for Image {}

impl Image {
    /// Allocate a device-local 2D image and create its view
    pub fn new(core: &Arc<DeviceCore>, desc: &ImageDesc) -> VulkanResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::usage("image extent must be non-zero"));
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let allocator = core.allocator();
        let (image, mut allocation) = unsafe {
            allocator.create_image(&image_info, &alloc_info)
                .map_err(|e| VulkanError::AllocationFailed(format!(
                    "{}x{} {:?} image: {e:?}",
                    desc.extent.width, desc.extent.height, desc.format
                )))?
        };

        let view = match create_view(core, image, desc.format, desc.aspect, desc.mip_levels) {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(e);
            }
        };

        Ok(Self {
            core: core.clone(),
            image,
            allocation,
            view: ManuallyDrop::new(view),
            desc: *desc,
        })
    }

    /// Raw image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over every mip level
    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            // the view goes before the image it refers to
            ManuallyDrop::drop(&mut self.view);
            self.core.allocator().destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Create a 2D view over `image`
pub fn create_view(
    core: &Arc<DeviceCore>,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> VulkanResult<ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe {
        core.device.create_image_view(&view_info, None)
            .map_err(VulkanError::Api)?
    };
    Ok(Owned::new(core.clone(), view))
}
