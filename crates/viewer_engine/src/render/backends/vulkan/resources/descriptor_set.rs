//! Descriptor set management
//!
//! A [`DescriptorSetAllocator`] is an arena of descriptor sets for one set
//! layout. `acquire` hands out the next unused set, growing the backing pools
//! in batches; `release_all` rewinds the cursor once per rotation without
//! freeing anything. The arena is only rewound after the frame that last
//! used its sets has completed, which is what makes the reuse safe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;

use super::buffer::{Buffer, MemoryLocation};
use super::handle::Owned;
use super::texture::Texture;
use crate::render::backends::vulkan::initialization::gfx::Gfx;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Sets allocated per growth step
pub const ALLOCATION_BATCH: u32 = 8;

/// Sets (and descriptors per binding) each new pool can hold
pub const POOL_MULTIPLIER: u32 = 32;

/// Uniform buffers are rounded up to this size so they can be reused
const UNIFORM_GRANULARITY: vk::DeviceSize = 256;

/// Device operations needed to pool descriptor sets
pub trait DescriptorDevice: Send + Sync {
    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Allocate one set per entry in `layouts`; the raw result is returned so
    /// the caller can react to pool exhaustion
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result>;

    /// Destroy a pool once no in-flight frame uses its sets
    fn retire_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Destroy a buffer once no in-flight frame reads it
    fn retire_buffer(&self, buffer: Buffer);
}

impl DescriptorDevice for Gfx {
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(sizes)
            .max_sets(max_sets);
        unsafe {
            self.device().create_descriptor_pool(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.device().allocate_descriptor_sets(&info) }
    }

    fn retire_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.retire(Owned::new(self.core().clone(), pool));
    }

    fn retire_buffer(&self, buffer: Buffer) {
        self.retire(buffer);
    }
}

/// One binding of a set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Descriptor set layout for one set number
///
/// The raw handle is owned by whoever built the layout (the pipeline cache)
/// and retired by it.
#[derive(Debug)]
pub struct SetLayout {
    pub set: u32,
    pub bindings: Vec<Binding>,
    pub raw: vk::DescriptorSetLayout,
}

impl SetLayout {
    /// Placeholder layouts fill gaps between used set numbers
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Look up a binding, failing for bindings the layout does not declare
    pub fn binding(&self, binding: u32) -> VulkanResult<&Binding> {
        self.bindings.iter().find(|b| b.binding == binding).ok_or_else(|| {
            VulkanError::usage(format!("set {} has no binding {binding}", self.set))
        })
    }

    /// Pool sizes for a pool holding `multiplier` sets of this layout
    pub fn pool_sizes(&self, multiplier: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut per_type: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            match per_type.iter_mut().find(|size| size.ty == binding.ty) {
                Some(size) => size.descriptor_count += binding.count * multiplier,
                None => per_type.push(vk::DescriptorPoolSize {
                    ty: binding.ty,
                    descriptor_count: binding.count * multiplier,
                }),
            }
        }
        per_type
    }
}

/// What a descriptor update points at
#[derive(Clone, Copy)]
pub enum Resource<'a> {
    /// Sampled texture with its sampler
    Texture(&'a Texture),
    /// Whole buffer
    Buffer(&'a Buffer),
}

impl Resource<'_> {
    fn kind(&self) -> ResourceKind {
        match self {
            Self::Texture(_) => ResourceKind::Texture,
            Self::Buffer(buffer) => ResourceKind::Buffer(buffer.usage()),
        }
    }
}

/// The parts of a [`Resource`] that decide which bindings accept it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    Buffer(vk::BufferUsageFlags),
}

/// Check that `resource` may be bound to a binding of type `ty`
pub fn check_compatible(ty: vk::DescriptorType, resource: &Resource<'_>) -> VulkanResult<()> {
    check_kind(ty, resource.kind())
}

fn check_kind(ty: vk::DescriptorType, kind: ResourceKind) -> VulkanResult<()> {
    let compatible = match kind {
        ResourceKind::Texture => matches!(
            ty,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER | vk::DescriptorType::SAMPLED_IMAGE
        ),
        ResourceKind::Buffer(usage) => match ty {
            vk::DescriptorType::UNIFORM_BUFFER => usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER),
            vk::DescriptorType::STORAGE_BUFFER => usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER),
            _ => false,
        },
    };
    if compatible {
        Ok(())
    } else {
        let what = match kind {
            ResourceKind::Texture => "texture",
            ResourceKind::Buffer(_) => "buffer",
        };
        Err(VulkanError::usage(format!("cannot bind a {what} to a {ty:?} binding")))
    }
}

/// A pooled descriptor set
///
/// Uniform buffers created by [`DescriptorSet::write`] belong to the set and
/// are reused by later writes of the same binding; they are released with the
/// allocator.
pub struct DescriptorSet {
    raw: vk::DescriptorSet,
    layout: Arc<SetLayout>,
    generation: AtomicU64,
    uniforms: Mutex<HashMap<u32, Buffer>>,
}

impl DescriptorSet {
    fn new(raw: vk::DescriptorSet, layout: Arc<SetLayout>) -> Self {
        Self {
            raw,
            layout,
            generation: AtomicU64::new(0),
            uniforms: Mutex::new(HashMap::new()),
        }
    }

    pub fn raw(&self) -> vk::DescriptorSet {
        self.raw
    }

    pub fn layout(&self) -> &Arc<SetLayout> {
        &self.layout
    }

    /// Set number in the pipeline layout
    pub fn set_number(&self) -> u32 {
        self.layout.set
    }

    /// Rotation in which the set was last acquired
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Point `binding` at a texture or buffer
    pub fn update(&self, gfx: &Gfx, binding: u32, resource: Resource<'_>) -> VulkanResult<()> {
        let info = self.layout.binding(binding)?;
        check_compatible(info.ty, &resource)?;

        match resource {
            Resource::Texture(texture) => {
                let image_info = [vk::DescriptorImageInfo {
                    sampler: texture.sampler(),
                    image_view: texture.image_view(),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }];
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(self.raw)
                    .dst_binding(binding)
                    .descriptor_type(info.ty)
                    .image_info(&image_info)
                    .build();
                unsafe { gfx.device().update_descriptor_sets(&[write], &[]) };
            }
            Resource::Buffer(buffer) => self.point_at(gfx, info.ty, binding, buffer.handle(), buffer.size()),
        }
        Ok(())
    }

    /// Copy `bytes` into a set-owned uniform buffer bound at `binding`
    pub fn write(&self, gfx: &Gfx, binding: u32, bytes: &[u8]) -> VulkanResult<()> {
        let info = self.layout.binding(binding)?;
        let usage = match info.ty {
            vk::DescriptorType::UNIFORM_BUFFER => vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER => vk::BufferUsageFlags::STORAGE_BUFFER,
            ty => {
                return Err(VulkanError::usage(format!(
                    "raw bytes cannot be written to a {ty:?} binding"
                )))
            }
        };
        if bytes.is_empty() {
            return Err(VulkanError::usage("empty uniform write"));
        }

        let mut uniforms = self.uniforms.lock().map_err(|_| VulkanError::usage("descriptor set poisoned"))?;
        let size = (bytes.len() as vk::DeviceSize).next_multiple_of(UNIFORM_GRANULARITY);
        let reusable = uniforms
            .get(&binding)
            .is_some_and(|buffer| buffer.size() >= size && buffer.usage().contains(usage));
        if !reusable {
            let buffer = gfx.create_buffer(size, usage, MemoryLocation::CpuToGpu)?;
            if let Some(old) = uniforms.insert(binding, buffer) {
                gfx.retire(old);
            }
        }

        let buffer = uniforms
            .get(&binding)
            .ok_or_else(|| VulkanError::usage("uniform buffer missing after insert"))?;
        buffer.write(0, bytes)?;
        self.point_at(gfx, info.ty, binding, buffer.handle(), bytes.len() as vk::DeviceSize);
        Ok(())
    }

    fn point_at(&self, gfx: &Gfx, ty: vk::DescriptorType, binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.raw)
            .dst_binding(binding)
            .descriptor_type(ty)
            .buffer_info(&buffer_info)
            .build();
        unsafe { gfx.device().update_descriptor_sets(&[write], &[]) };
    }

    fn take_uniforms(&self) -> Vec<Buffer> {
        self.uniforms
            .lock()
            .map(|mut uniforms| uniforms.drain().map(|(_, buffer)| buffer).collect())
            .unwrap_or_default()
    }
}

/// Arena of descriptor sets for one layout
pub struct DescriptorSetAllocator<D: DescriptorDevice> {
    device: D,
    layout: Arc<SetLayout>,
    pools: Vec<vk::DescriptorPool>,
    sets: Vec<Arc<DescriptorSet>>,
    cursor: usize,
    generation: u64,
    empty: bool,
}

impl<D: DescriptorDevice> DescriptorSetAllocator<D> {
    /// Allocator for `layout`; nothing is allocated until the first acquire
    pub fn new(device: D, layout: Arc<SetLayout>) -> Self {
        let empty = layout.is_empty();
        if empty {
            log::debug!("Descriptor set {} has no bindings, allocator marked empty", layout.set);
        }
        Self {
            device,
            layout,
            pools: Vec::new(),
            sets: Vec::new(),
            cursor: 0,
            generation: 0,
            empty,
        }
    }

    /// Next unused set, growing the pool on exhaustion
    pub fn acquire(&mut self) -> VulkanResult<Arc<DescriptorSet>> {
        if self.empty {
            return Err(VulkanError::EmptyDescriptorLayout { set: self.layout.set });
        }
        if self.cursor == self.sets.len() {
            self.grow()?;
        }

        let set = self.sets[self.cursor].clone();
        self.cursor += 1;
        set.generation.store(self.generation, Ordering::Release);
        Ok(set)
    }

    /// Mark every set unused again; storage is kept
    ///
    /// Returns how many sets are still referenced from outside the arena,
    /// which indicates a caller kept a set past its rotation.
    pub fn release_all(&mut self) -> usize {
        let leaked = self.sets[..self.cursor]
            .iter()
            .filter(|set| Arc::strong_count(set) > 1)
            .count();
        if leaked > 0 {
            log::warn!(
                "{leaked} descriptor set(s) of set {} still referenced after rotation",
                self.layout.set
            );
        }
        self.cursor = 0;
        self.generation += 1;
        leaked
    }

    /// Whether the layout has no bindings
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Sets handed out since the last release
    pub fn in_use(&self) -> usize {
        self.cursor
    }

    /// Sets allocated in total
    pub fn capacity(&self) -> usize {
        self.sets.len()
    }

    /// Descriptor pools created so far
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layout(&self) -> &Arc<SetLayout> {
        &self.layout
    }

    fn grow(&mut self) -> VulkanResult<()> {
        let layouts = vec![self.layout.raw; ALLOCATION_BATCH as usize];

        let first = match self.pools.last() {
            Some(&pool) => self.device.allocate_descriptor_sets(pool, &layouts).ok(),
            None => None,
        };

        let raw_sets = match first {
            Some(sets) => sets,
            None => {
                let pool = self.add_pool()?;
                self.device
                    .allocate_descriptor_sets(pool, &layouts)
                    .map_err(|e| {
                        log::error!("Descriptor allocation failed after growing pool: {e:?}");
                        VulkanError::DescriptorPoolExhausted
                    })?
            }
        };

        self.sets.extend(
            raw_sets
                .into_iter()
                .map(|raw| Arc::new(DescriptorSet::new(raw, self.layout.clone()))),
        );
        Ok(())
    }

    fn add_pool(&mut self) -> VulkanResult<vk::DescriptorPool> {
        let sizes = self.layout.pool_sizes(POOL_MULTIPLIER);
        let pool = self.device.create_descriptor_pool(&sizes, POOL_MULTIPLIER)?;
        self.pools.push(pool);
        log::debug!(
            "Descriptor pool #{} created for set {} ({} sets)",
            self.pools.len(),
            self.layout.set,
            POOL_MULTIPLIER
        );
        Ok(pool)
    }
}

impl<D: DescriptorDevice> Drop for DescriptorSetAllocator<D> {
    fn drop(&mut self) {
        for set in self.sets.drain(..) {
            for buffer in set.take_uniforms() {
                self.device.retire_buffer(buffer);
            }
        }
        for pool in self.pools.drain(..) {
            self.device.retire_descriptor_pool(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::FakeDevice;

    fn layout(device: &FakeDevice, set: u32, bindings: Vec<Binding>) -> Arc<SetLayout> {
        Arc::new(SetLayout {
            set,
            raw: device.fake_set_layout(),
            bindings,
        })
    }

    fn uniform(binding: u32) -> Binding {
        Binding {
            binding,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
        }
    }

    #[test]
    fn test_acquire_grows_past_first_pool() {
        let device = FakeDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 0, vec![uniform(0)]));

        let wanted = POOL_MULTIPLIER as usize + 1;
        let mut raws = std::collections::HashSet::new();
        for _ in 0..wanted {
            raws.insert(allocator.acquire().unwrap().raw());
        }

        assert_eq!(raws.len(), wanted, "every acquire returns a distinct set");
        assert_eq!(allocator.pool_count(), 2);
        assert_eq!(device.pools_created(), 2);
        assert_eq!(allocator.in_use(), wanted);
    }

    #[test]
    fn test_release_all_recycles_storage() {
        let device = FakeDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 1, vec![uniform(0)]));

        let first: Vec<_> = (0..3).map(|_| allocator.acquire().unwrap().raw()).collect();
        assert_eq!(allocator.release_all(), 0);
        let second: Vec<_> = (0..3).map(|_| allocator.acquire().unwrap().raw()).collect();

        assert_eq!(first, second);
        assert_eq!(allocator.capacity(), ALLOCATION_BATCH as usize);
        assert_eq!(device.sets_allocated(), ALLOCATION_BATCH as usize);
        assert_eq!(allocator.generation(), 1);
    }

    #[test]
    fn test_acquired_set_carries_generation() {
        let device = FakeDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 0, vec![uniform(0)]));

        allocator.release_all();
        allocator.release_all();
        let set = allocator.acquire().unwrap();
        assert_eq!(set.generation(), 2);
        assert_eq!(set.set_number(), 0);
    }

    #[test]
    fn test_held_set_reported_on_release() {
        let device = FakeDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 0, vec![uniform(0)]));

        let held = allocator.acquire().unwrap();
        let _ = allocator.acquire().unwrap();
        assert_eq!(allocator.release_all(), 1);
        drop(held);
    }

    #[test]
    fn test_empty_layout_fails_fast() {
        let device = FakeDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 2, Vec::new()));

        assert!(allocator.is_empty());
        match allocator.acquire() {
            Err(VulkanError::EmptyDescriptorLayout { set }) => assert_eq!(set, 2),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("empty layout handed out a set"),
        }
        assert_eq!(device.pools_created(), 0);
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let device = FakeDevice::default();
        device.fail_allocations(true);
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 0, vec![uniform(0)]));

        assert!(matches!(allocator.acquire(), Err(VulkanError::DescriptorPoolExhausted)));
        assert_eq!(device.pools_created(), 1, "exactly one growth attempt");
    }

    #[test]
    fn test_pools_retired_on_drop() {
        let device = FakeDevice::default();
        {
            let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(&device, 0, vec![uniform(0)]));
            for _ in 0..POOL_MULTIPLIER + 1 {
                allocator.acquire().unwrap();
            }
        }
        assert_eq!(device.pools_retired(), 2);
    }

    #[test]
    fn test_pool_sizes_scale_binding_counts() {
        let device = FakeDevice::default();
        let sampler = Binding {
            binding: 1,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 4,
            stages: vk::ShaderStageFlags::FRAGMENT,
        };
        let layout = layout(&device, 0, vec![uniform(0), sampler, uniform(2)]);
        let sizes = layout.pool_sizes(POOL_MULTIPLIER);

        assert_eq!(sizes.len(), 2);
        let uniform_size = sizes.iter().find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER).unwrap();
        let sampler_size = sizes.iter().find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER).unwrap();
        assert_eq!(uniform_size.descriptor_count, 2 * POOL_MULTIPLIER);
        assert_eq!(sampler_size.descriptor_count, 4 * POOL_MULTIPLIER);
    }

    #[test]
    fn test_unknown_binding_rejected() {
        let device = FakeDevice::default();
        let layout = layout(&device, 3, vec![uniform(0)]);
        assert!(layout.binding(0).is_ok());
        assert!(matches!(layout.binding(5), Err(VulkanError::InvalidUsage { .. })));
    }

    #[test]
    fn test_mismatched_resource_rejected() {
        let uniform = ResourceKind::Buffer(vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert!(check_kind(vk::DescriptorType::UNIFORM_BUFFER, uniform).is_ok());
        assert!(check_kind(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ResourceKind::Texture).is_ok());

        for (ty, kind) in [
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, uniform),
            (vk::DescriptorType::UNIFORM_BUFFER, ResourceKind::Texture),
            (vk::DescriptorType::STORAGE_BUFFER, uniform),
            (vk::DescriptorType::STORAGE_IMAGE, ResourceKind::Texture),
        ] {
            assert!(
                matches!(check_kind(ty, kind), Err(VulkanError::InvalidUsage { .. })),
                "{kind:?} accepted by {ty:?}"
            );
        }
    }
}
