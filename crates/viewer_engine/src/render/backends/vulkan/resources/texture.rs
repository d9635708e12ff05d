//! Sampled textures
//!
//! Decoded RGBA8 pixels are uploaded through a staging buffer; the mip chain
//! is generated on the GPU with linear blits when the format allows it.

use std::sync::Arc;

use ash::{vk, Device};

use super::buffer::{Buffer, MemoryLocation};
use super::defer::Deferred;
use super::handle::{Owned, Sampler};
use super::image::{Image, ImageDesc};
use crate::core::config::ColorSpace;
use crate::render::backends::vulkan::initialization::gfx::Gfx;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Texture image plus a shared sampler reference
///
/// Both are retired on drop rather than destroyed, so a texture may be
/// dropped while a submitted frame still samples it.
pub struct Texture {
    image: Deferred<Image>,
    sampler: Deferred<Arc<Sampler>>,
    color_space: ColorSpace,
}

impl Texture {
    /// Upload tightly packed RGBA8 `pixels` of size `extent`
    ///
    /// sRGB data gets an `_SRGB` format so sampling returns linear values.
    pub fn from_pixels(
        gfx: &Gfx,
        pixels: &[u8],
        extent: vk::Extent2D,
        color_space: ColorSpace,
        sampler: Arc<Sampler>,
    ) -> VulkanResult<Self> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::usage(format!(
                "texture of {}x{} needs {expected} bytes, got {}",
                extent.width,
                extent.height,
                pixels.len()
            )));
        }

        let format = texture_format(color_space);
        let properties = gfx.format_properties(format);
        let can_blit = properties.optimal_tiling_features.contains(
            vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
        );
        let mip_levels = if can_blit { mip_level_count(extent) } else { 1 };

        let staging = Buffer::new(
            gfx.core(),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, pixels)?;

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = gfx.create_image(&ImageDesc::color(extent, format, usage).with_mip_levels(mip_levels))?;

        gfx.one_shot(|device, cmd| {
            record_upload(device, cmd, staging.handle(), image.handle(), extent, mip_levels);
        })?;

        log::debug!(
            "Uploaded {}x{} texture ({:?}, {} mips)",
            extent.width,
            extent.height,
            color_space,
            mip_levels
        );

        Ok(Self {
            image: gfx.defer(image),
            sampler: gfx.defer(sampler),
            color_space,
        })
    }

    /// 1x1 texture of a single colour
    pub fn solid(gfx: &Gfx, rgba: [u8; 4], sampler: Arc<Sampler>) -> VulkanResult<Self> {
        Self::from_pixels(gfx, &rgba, vk::Extent2D { width: 1, height: 1 }, ColorSpace::Srgb, sampler)
    }

    /// View over every mip level
    pub fn image_view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Sampler shared with other textures
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.raw()
    }

    /// Mip levels generated at upload
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }

    /// Size of the base level
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Colour space the pixels were uploaded in
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }
}

/// Trilinear, repeating sampler with anisotropy when the device allows it
pub fn create_sampler(gfx: &Gfx) -> VulkanResult<Arc<Sampler>> {
    let shared = gfx.shared();
    let anisotropy = shared.features.sampler_anisotropy == vk::TRUE;

    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(shared.limits.max_sampler_anisotropy.min(16.0))
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE);

    let sampler = unsafe {
        gfx.device().create_sampler(&info, None)
            .map_err(VulkanError::Api)?
    };
    Ok(Arc::new(Owned::new(gfx.core().clone(), sampler)))
}

/// Format used for RGBA8 data in the given colour space
pub const fn texture_format(color_space: ColorSpace) -> vk::Format {
    match color_space {
        ColorSpace::Srgb => vk::Format::R8G8B8A8_SRGB,
        ColorSpace::Linear => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Full mip chain length down to 1x1
pub fn mip_level_count(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

fn record_upload(
    device: &Device,
    cmd: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
    mip_levels: u32,
) {
    barrier(
        device,
        cmd,
        image,
        0,
        mip_levels,
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
        (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
    );

    let region = vk::BufferImageCopy::builder()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .build();

    unsafe {
        device.cmd_copy_buffer_to_image(cmd, staging, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
    }

    let mut mip_width = extent.width as i32;
    let mut mip_height = extent.height as i32;

    for level in 1..mip_levels {
        barrier(
            device,
            cmd,
            image,
            level - 1,
            1,
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_READ),
            (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        );

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: mip_width, y: mip_height, z: 1 },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: next_width, y: next_height, z: 1 },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        barrier(
            device,
            cmd,
            image,
            level - 1,
            1,
            (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::SHADER_READ),
            (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        );

        mip_width = next_width;
        mip_height = next_height;
    }

    // the last level was only ever written
    barrier(
        device,
        cmd,
        image,
        mip_levels - 1,
        1,
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
        (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
    );
}

fn barrier(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    base_mip_level: u32,
    level_count: u32,
    layouts: (vk::ImageLayout, vk::ImageLayout),
    access: (vk::AccessFlags, vk::AccessFlags),
    stages: (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(layouts.0)
        .new_layout(layouts.1)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(access.0)
        .dst_access_mask(access.1)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            stages.0,
            stages.1,
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

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(vk::Extent2D { width: 1, height: 1 }), 1);
        assert_eq!(mip_level_count(vk::Extent2D { width: 2, height: 1 }), 2);
        assert_eq!(mip_level_count(vk::Extent2D { width: 256, height: 256 }), 9);
        assert_eq!(mip_level_count(vk::Extent2D { width: 300, height: 20 }), 9);
        assert_eq!(mip_level_count(vk::Extent2D { width: 1024, height: 512 }), 11);
    }

    #[test]
    fn test_texture_format_follows_color_space() {
        assert_eq!(texture_format(ColorSpace::Srgb), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(texture_format(ColorSpace::Linear), vk::Format::R8G8B8A8_UNORM);
    }
}
