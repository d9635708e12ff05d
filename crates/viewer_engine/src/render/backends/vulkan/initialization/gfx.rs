//! Device context shared by every rendering component
//!
//! [`Gfx`] is a cheap, clonable bundle of handles that is passed by value to
//! every component needing device access. It owns nothing on its own: the
//! logical device and the memory allocator live in a reference-counted
//! [`DeviceCore`] that is destroyed only after the last resource holding it.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::{InstanceCore, PhysicalDeviceInfo, SurfaceCore, ValidationSink, VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::buffer::{Buffer, MemoryLocation};
use crate::render::backends::vulkan::resources::defer::{DeferQueue, Deferred, Retired};
use crate::render::backends::vulkan::resources::image::{Image, ImageDesc};
use crate::render::backends::vulkan::state::sync::Fence;

/// Logical device and memory allocator, destroyed last
pub struct DeviceCore {
    /// Logical device
    pub device: Device,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    instance: Arc<InstanceCore>,
}

// SAFETY: the VMA allocator is internally synchronized and ash::Device is a
// table of function pointers.
unsafe impl Send for DeviceCore {}
unsafe impl Sync for DeviceCore {}

impl DeviceCore {
    /// GPU memory allocator
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    /// Owning instance
    pub fn instance(&self) -> &Arc<InstanceCore> {
        &self.instance
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

/// Process-wide state reachable from every [`Gfx`] clone
pub struct Shared {
    /// Device limits
    pub limits: vk::PhysicalDeviceLimits,
    /// Features enabled at device creation
    pub features: vk::PhysicalDeviceFeatures,
    /// Frames the CPU may run ahead of the GPU
    pub buffering: usize,
    defer: Arc<DeferQueue<Retired>>,
    queue: Mutex<vk::Queue>,
    validation: Arc<ValidationSink>,
}

/// Exclusive access to the graphics queue
///
/// Swapchain acquire/present and every submission take one of these, so
/// frame submission never races a one-shot upload.
pub struct QueueGuard<'a>(MutexGuard<'a, vk::Queue>);

impl QueueGuard<'_> {
    /// Queue handle, valid while the guard is held
    pub fn queue(&self) -> vk::Queue {
        *self.0
    }
}

/// Cheap handle bundle for device access
#[derive(Clone)]
pub struct Gfx {
    core: Arc<DeviceCore>,
    shared: Arc<Shared>,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
}

impl Gfx {
    /// Pick a physical device for `surface`, create the logical device,
    /// the graphics queue and the allocator
    pub fn new(surface: &SurfaceCore, buffering: usize) -> VulkanResult<Self> {
        let instance = surface.instance().clone();
        let info = PhysicalDeviceInfo::select_suitable_device(&instance, surface)?;

        let supported = info.features;
        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
            .sample_rate_shading(supported.sample_rate_shading == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
            .wide_lines(supported.wide_lines == vk::TRUE)
            .build();

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(info.queue_family)
            .queue_priorities(&priorities)
            .build()];

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance.instance.create_device(info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let allocator_info = vk_mem::AllocatorCreateInfo::new(&instance.instance, &device, info.device);
        #[allow(unused_unsafe)]
        let allocator = match unsafe { vk_mem::Allocator::new(allocator_info) } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::InitializationFailed(format!("Allocator creation failed: {e:?}")));
            }
        };

        let queue = unsafe { device.get_device_queue(info.queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);
        let validation = instance.validation().clone();

        let core = Arc::new(DeviceCore {
            device,
            swapchain_loader,
            allocator: ManuallyDrop::new(allocator),
            instance,
        });

        let shared = Arc::new(Shared {
            limits: info.properties.limits,
            features,
            buffering,
            defer: Arc::new(DeferQueue::new(buffering)),
            queue: Mutex::new(queue),
            validation,
        });

        log::info!("Logical device ready on queue family {}", info.queue_family);

        Ok(Self {
            core,
            shared,
            physical_device: info.device,
            queue_family: info.queue_family,
        })
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.core.device
    }

    /// Reference-counted device core, held by owned resources
    pub fn core(&self) -> &Arc<DeviceCore> {
        &self.core
    }

    /// Selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Graphics/present queue family
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Device limits and enabled features
    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Frames in flight
    pub fn buffering(&self) -> usize {
        self.shared.buffering
    }

    /// Lock the graphics queue for submission or presentation
    pub fn lock_queue(&self) -> QueueGuard<'_> {
        // a poisoned queue mutex still guards a valid handle
        QueueGuard(self.shared.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Block until `fence` signals
    pub fn wait(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe {
            self.core.device.wait_for_fences(&[fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }

    /// Hand a resource to the deferred-destruction queue
    pub fn retire(&self, resource: impl Into<Retired>) {
        self.shared.defer.push(resource.into());
    }

    /// Wrap a caller-owned resource so that dropping it retires it
    pub fn defer<T: Into<Retired>>(&self, resource: T) -> Deferred<T> {
        Deferred::new(self.shared.defer.clone(), resource)
    }

    /// Advance the deferred-destruction queue by one presented frame
    pub fn rotate_deferred(&self) {
        self.shared.defer.next();
    }

    /// Destroy everything waiting in the deferred queue; the device must be idle
    pub fn flush_deferred(&self) {
        self.shared.defer.flush();
    }

    /// Resources waiting for destruction
    pub fn deferred_len(&self) -> usize {
        self.shared.defer.len()
    }

    /// Surface validation errors recorded since the last check
    pub fn check_validation(&self) -> VulkanResult<()> {
        self.shared.validation.check()
    }

    /// Record commands into a throwaway command buffer, submit and wait
    ///
    /// Used for uploads; the queue is locked only for the submission itself.
    pub fn one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let device = &self.core.device;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.queue_family);
        let pool = unsafe {
            device.create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let result = (|| {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cmd = unsafe {
                device.allocate_command_buffers(&alloc_info)
                    .map_err(VulkanError::Api)?[0]
            };

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                device.begin_command_buffer(cmd, &begin_info)
                    .map_err(VulkanError::Api)?;
            }
            record(device, cmd);
            unsafe {
                device.end_command_buffer(cmd)
                    .map_err(VulkanError::Api)?;
            }

            let fence = Fence::new(self.core.clone(), false)?;
            let buffers = [cmd];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            {
                let guard = self.lock_queue();
                unsafe {
                    device.queue_submit(guard.queue(), &[submit], fence.handle())
                        .map_err(VulkanError::Api)?;
                }
            }
            self.wait(fence.handle())
        })();

        unsafe { device.destroy_command_pool(pool, None) };
        result
    }

    /// Create a buffer; host-visible locations are mapped persistently
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> VulkanResult<Buffer> {
        Buffer::new(&self.core, size, usage, location)
    }

    /// Create a device-local image with a default view
    pub fn create_image(&self, desc: &ImageDesc) -> VulkanResult<Image> {
        Image::new(&self.core, desc)
    }

    /// Format properties for optimal-tiling checks
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.core.instance().instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }
}
