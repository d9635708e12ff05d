//! Device double for GPU-free tests
//!
//! Hands out unique fake handles and counts calls. Each fake descriptor pool
//! holds `max_sets` sets and rejects batches larger than what remains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk::{self, Handle};

use super::initialization::{VulkanError, VulkanResult};
use super::rendering::pipes::{PipelineDesc, PipelineDevice};
use super::rendering::render_state::RenderState;
use super::resources::buffer::Buffer;
use super::resources::descriptor_set::{Binding, DescriptorDevice};

#[derive(Default)]
struct FakeState {
    next_handle: u64,
    pools: HashMap<vk::DescriptorPool, u32>,
    pools_created: usize,
    pools_retired: usize,
    sets_allocated: usize,
    fail_allocations: bool,
    fail_pipelines: bool,
    set_layouts_created: usize,
    set_layouts_retired: usize,
    pipeline_layouts_created: usize,
    pipeline_layouts_retired: usize,
    pipelines_created: usize,
    pipelines_retired: usize,
    last_state: Option<RenderState>,
    last_samples: Option<vk::SampleCountFlags>,
}

impl FakeState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fake_set_layout(&self) -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(self.state().handle())
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.state().fail_allocations = fail;
    }

    pub fn fail_pipelines(&self, fail: bool) {
        self.state().fail_pipelines = fail;
    }

    pub fn pools_created(&self) -> usize {
        self.state().pools_created
    }

    pub fn pools_retired(&self) -> usize {
        self.state().pools_retired
    }

    pub fn sets_allocated(&self) -> usize {
        self.state().sets_allocated
    }

    pub fn set_layouts_created(&self) -> usize {
        self.state().set_layouts_created
    }

    pub fn set_layouts_retired(&self) -> usize {
        self.state().set_layouts_retired
    }

    pub fn pipeline_layouts_created(&self) -> usize {
        self.state().pipeline_layouts_created
    }

    pub fn pipeline_layouts_retired(&self) -> usize {
        self.state().pipeline_layouts_retired
    }

    pub fn pipelines_created(&self) -> usize {
        self.state().pipelines_created
    }

    pub fn pipelines_retired(&self) -> usize {
        self.state().pipelines_retired
    }

    pub fn last_pipeline_state(&self) -> Option<RenderState> {
        self.state().last_state
    }

    pub fn last_pipeline_samples(&self) -> Option<vk::SampleCountFlags> {
        self.state().last_samples
    }
}

impl DescriptorDevice for FakeDevice {
    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        let mut state = self.state();
        let pool = vk::DescriptorPool::from_raw(state.handle());
        state.pools.insert(pool, max_sets);
        state.pools_created += 1;
        Ok(pool)
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let mut state = self.state();
        if state.fail_allocations {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        let wanted = layouts.len() as u32;
        let remaining = state.pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        if *remaining < wanted {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        *remaining -= wanted;
        state.sets_allocated += layouts.len();
        Ok((0..layouts.len())
            .map(|_| vk::DescriptorSet::from_raw(state.handle()))
            .collect())
    }

    fn retire_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.pools.remove(&pool);
        state.pools_retired += 1;
    }

    fn retire_buffer(&self, _buffer: Buffer) {}
}

impl PipelineDevice for FakeDevice {
    fn create_set_layout(&self, _bindings: &[Binding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        state.set_layouts_created += 1;
        Ok(vk::DescriptorSetLayout::from_raw(state.handle()))
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<vk::PipelineLayout> {
        let mut state = self.state();
        state.pipeline_layouts_created += 1;
        Ok(vk::PipelineLayout::from_raw(state.handle()))
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let mut state = self.state();
        if state.fail_pipelines {
            return Err(VulkanError::PipelineCreation(vk::Result::ERROR_UNKNOWN));
        }
        state.pipelines_created += 1;
        state.last_state = Some(desc.state);
        state.last_samples = Some(desc.samples);
        Ok(vk::Pipeline::from_raw(state.handle()))
    }

    fn create_instance_buffer(&self, _size: vk::DeviceSize) -> VulkanResult<Buffer> {
        Err(VulkanError::AllocationFailed("fake device has no memory".into()))
    }

    fn retire_pipeline(&self, _pipeline: vk::Pipeline) {
        self.state().pipelines_retired += 1;
    }

    fn retire_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.state().pipeline_layouts_retired += 1;
    }

    fn retire_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.state().set_layouts_retired += 1;
    }

    fn sample_shading_supported(&self) -> bool {
        false
    }
}
