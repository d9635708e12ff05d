//! GPU buffers backed by the VMA allocator
//!
//! Host-visible buffers are mapped once at creation and stay mapped for their
//! whole lifetime. Device-local buffers are filled through a staging copy.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use crate::render::backends::vulkan::initialization::gfx::{DeviceCore, Gfx};
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not mappable
    GpuOnly,
    /// Host-visible, written sequentially by the CPU and read by the GPU
    CpuToGpu,
}

/// Buffer wrapper with memory management
pub struct Buffer {
    core: Arc<DeviceCore>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    mapped: Option<NonNull<u8>>,
}

// SAFETY: the mapped pointer refers to memory owned by this buffer's
// allocation; writes go through `&self` methods that copy bytes and never
// hand the pointer out.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        core: &Arc<DeviceCore>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::usage("buffer size must be non-zero"));
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc_info = match location {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
        };

        let allocator = core.allocator();
        let (buffer, mut allocation) = unsafe {
            allocator.create_buffer(&buffer_info, &alloc_info)
                .map_err(|e| VulkanError::AllocationFailed(format!("{size} byte buffer: {e:?}")))?
        };

        let mapped = if location == MemoryLocation::CpuToGpu {
            match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => NonNull::new(ptr),
                Err(e) => {
                    unsafe { allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(VulkanError::AllocationFailed(format!("mapping buffer: {e:?}")));
                }
            }
        } else {
            None
        };

        Ok(Self {
            core: core.clone(),
            buffer,
            allocation,
            size,
            usage,
            mapped,
        })
    }

    /// Device-local buffer filled with `bytes` through a staging copy
    pub fn upload(gfx: &Gfx, bytes: &[u8], usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = Self::new(gfx.core(), size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)?;
        staging.write(0, bytes)?;

        let buffer = Self::new(
            gfx.core(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        gfx.one_shot(|device, cmd| {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
            unsafe { device.cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]) };
        })?;

        Ok(buffer)
    }

    /// Copy raw bytes into a mapped buffer at `offset`
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let ptr = self.mapped.ok_or_else(|| VulkanError::usage("buffer is not host visible"))?;
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::usage(format!(
                "write of {} bytes at {offset} overflows {} byte buffer",
                bytes.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset as usize), bytes.len());
        }

        // HOST_ACCESS_SEQUENTIAL_WRITE may land on non-coherent memory
        unsafe {
            self.core.allocator()
                .flush_allocation(&self.allocation, offset as usize, bytes.len())
                .map_err(VulkanError::Api)
        }
    }

    /// Copy plain-old-data values into a mapped buffer
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> VulkanResult<()> {
        self.write(offset, bytemuck::cast_slice(data))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Whether the buffer is persistently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let allocator = self.core.allocator();
        unsafe {
            if self.mapped.take().is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}
