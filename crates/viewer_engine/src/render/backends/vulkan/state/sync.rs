//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences. Both keep the device core alive.

use std::sync::Arc;

use ash::vk;

use crate::render::backends::vulkan::initialization::gfx::DeviceCore;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive
///
/// Signaled by one queue operation and waited on by another:
/// image acquisition signals before rendering, rendering signals before
/// presentation.
pub struct Semaphore {
    core: Arc<DeviceCore>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(core: Arc<DeviceCore>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            core.device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { core, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.core.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    core: Arc<DeviceCore>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(core: Arc<DeviceCore>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            core.device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { core, fence })
    }

    /// Reset to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.core.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Non-blocking status query
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe {
            self.core.device.get_fence_status(self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.core.device.destroy_fence(self.fence, None);
        }
    }
}
