//! Owned device-level handles
//!
//! [`Owned`] pairs a raw Vulkan handle with the device core that created it
//! and destroys it on drop. The handle kinds are a small closed set, each
//! knowing its own destroy call.

use std::sync::Arc;

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::gfx::DeviceCore;

/// A raw handle destroyed through the logical device
pub trait DeviceHandle: Copy {
    /// Destroy the handle
    ///
    /// # Safety
    /// The GPU must no longer use the handle.
    unsafe fn destroy(self, device: &Device);
}

impl DeviceHandle for vk::ImageView {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_image_view(self, None);
    }
}

impl DeviceHandle for vk::Sampler {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_sampler(self, None);
    }
}

impl DeviceHandle for vk::Framebuffer {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_framebuffer(self, None);
    }
}

impl DeviceHandle for vk::RenderPass {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_render_pass(self, None);
    }
}

impl DeviceHandle for vk::Pipeline {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_pipeline(self, None);
    }
}

impl DeviceHandle for vk::PipelineLayout {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_pipeline_layout(self, None);
    }
}

impl DeviceHandle for vk::DescriptorSetLayout {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_descriptor_set_layout(self, None);
    }
}

impl DeviceHandle for vk::DescriptorPool {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_descriptor_pool(self, None);
    }
}

impl DeviceHandle for vk::ShaderModule {
    unsafe fn destroy(self, device: &Device) {
        device.destroy_shader_module(self, None);
    }
}

/// Handle destroyed on drop
pub struct Owned<H: DeviceHandle> {
    core: Arc<DeviceCore>,
    raw: H,
}

impl<H: DeviceHandle> Owned<H> {
    /// Take ownership of `raw`
    pub fn new(core: Arc<DeviceCore>, raw: H) -> Self {
        Self { core, raw }
    }

    /// Raw handle
    pub fn raw(&self) -> H {
        self.raw
    }
}

impl<H: DeviceHandle> Drop for Owned<H> {
    fn drop(&mut self) {
        unsafe { self.raw.destroy(&self.core.device) };
    }
}

/// Owned image view
pub type ImageView = Owned<vk::ImageView>;
/// Owned sampler
pub type Sampler = Owned<vk::Sampler>;
/// Owned framebuffer
pub type Framebuffer = Owned<vk::Framebuffer>;
