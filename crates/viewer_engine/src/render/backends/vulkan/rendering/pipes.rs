//! Pipeline and descriptor cache
//!
//! [`Pipes`] maps (render state, shader program, vertex layout) to a cache
//! entry holding the reflected descriptor set layouts, the pipeline layout,
//! one pipeline per render pass and a ring of descriptor set allocators, one
//! row per frame in flight.
//!
//! Entries are populated once on first lookup. Pipelines are compiled on
//! demand per render pass since a pipeline is only valid with the render pass
//! it was built against.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;

use super::reflect;
use super::render_state::RenderState;
use super::shader::{ShaderKey, ShaderSet};
use super::vertex_layout::{InstanceData, VertexLayout};
use crate::render::backends::vulkan::initialization::gfx::Gfx;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::resources::buffer::{Buffer, MemoryLocation};
use crate::render::backends::vulkan::resources::descriptor_set::{
    Binding, DescriptorDevice, DescriptorSet, DescriptorSetAllocator, SetLayout,
};
use crate::render::backends::vulkan::resources::handle::Owned;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Minimum size of one instance-data chunk
const INSTANCE_CHUNK: vk::DeviceSize = 64 * 1024;

/// Everything needed to compile one graphics pipeline
pub struct PipelineDesc<'a> {
    /// Pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Layout built from shader reflection
    pub layout: vk::PipelineLayout,
    /// Vertex and fragment SPIR-V
    pub shader: &'a ShaderSet,
    /// Per-vertex and per-instance attributes
    pub vertex_layout: VertexLayout,
    /// Fixed-function state
    pub state: RenderState,
    /// Rasterization samples of the render pass
    pub samples: vk::SampleCountFlags,
    /// Enable per-sample shading
    pub sample_shading: bool,
}

/// Device operations needed by the pipeline cache
pub trait PipelineDevice: DescriptorDevice + Clone {
    fn create_set_layout(&self, bindings: &[Binding]) -> VulkanResult<vk::DescriptorSetLayout>;

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<vk::PipelineLayout>;

    /// Compile a pipeline; driver failure is reported as `PipelineCreation`
    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> VulkanResult<vk::Pipeline>;

    /// Host-visible buffer for per-instance vertex data
    fn create_instance_buffer(&self, size: vk::DeviceSize) -> VulkanResult<Buffer>;

    fn retire_pipeline(&self, pipeline: vk::Pipeline);

    fn retire_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn retire_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn sample_shading_supported(&self) -> bool;
}

impl PipelineDevice for Gfx {
    fn create_set_layout(&self, bindings: &[Binding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings: Vec<_> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.ty)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe {
            self.device().create_descriptor_set_layout(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        unsafe {
            self.device().create_pipeline_layout(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let device = self.device();
        let module = |words: &[u32]| -> VulkanResult<Owned<vk::ShaderModule>> {
            let info = vk::ShaderModuleCreateInfo::builder().code(words);
            let raw = unsafe {
                device.create_shader_module(&info, None)
                    .map_err(|e| VulkanError::InvalidShader(format!("{}: {e}", desc.shader.id())))?
            };
            Ok(Owned::new(self.core().clone(), raw))
        };
        // modules are only needed until the pipeline exists
        let vertex = module(desc.shader.vertex())?;
        let fragment = module(desc.shader.fragment())?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.raw())
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.raw())
                .name(ENTRY_POINT)
                .build(),
        ];

        let bindings = desc.vertex_layout.bindings();
        let attributes = desc.vertex_layout.attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.state.topology)
            .primitive_restart_enable(false);

        // viewport, scissor and line width are set per draw
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut polygon_mode = desc.state.polygon_mode;
        if polygon_mode != vk::PolygonMode::FILL && self.shared().features.fill_mode_non_solid != vk::TRUE {
            log::warn!("{polygon_mode:?} polygons unsupported, falling back to FILL");
            polygon_mode = vk::PolygonMode::FILL;
        }
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(desc.samples)
            .sample_shading_enable(desc.sample_shading)
            .min_sample_shading(if desc.sample_shading { 0.2 } else { 1.0 });

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.state.depth_test)
            .depth_write_enable(desc.state.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None
            ).map_err(|(_, err)| {
                log::error!("Pipeline creation for shader '{}' failed: {err:?}", desc.shader.id());
                VulkanError::PipelineCreation(err)
            })?
        };

        log::debug!(
            "Compiled pipeline for '{}' ({:?}, {:?}, {} samples)",
            desc.shader.id(),
            desc.state.polygon_mode,
            desc.state.topology,
            desc.samples.as_raw()
        );
        Ok(pipelines[0])
    }

    fn create_instance_buffer(&self, size: vk::DeviceSize) -> VulkanResult<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::CpuToGpu)
    }

    fn retire_pipeline(&self, pipeline: vk::Pipeline) {
        self.retire(Owned::new(self.core().clone(), pipeline));
    }

    fn retire_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.retire(Owned::new(self.core().clone(), layout));
    }

    fn retire_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.retire(Owned::new(self.core().clone(), layout));
    }

    fn sample_shading_supported(&self) -> bool {
        self.shared().features.sample_rate_shading == vk::TRUE
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache key; equality is full equality of every component
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PipeKey {
    /// Fixed-function state
    pub state: RenderState,
    /// Shader pair identity
    pub shader: ShaderKey,
    /// Vertex input layout
    pub layout: VertexLayout,
}

/// Cached layouts, pipelines and descriptor pools for one key
pub struct PipeEntry<D: PipelineDevice> {
    device: D,
    set_layouts: Vec<Arc<SetLayout>>,
    pipeline_layout: vk::PipelineLayout,
    pipelines: Mutex<HashMap<vk::RenderPass, vk::Pipeline>>,
    // [frame slot][set number]
    allocators: Mutex<Vec<Vec<DescriptorSetAllocator<D>>>>,
}

impl<D: PipelineDevice> PipeEntry<D> {
    fn populate(device: &D, shader: &ShaderSet, buffering: usize) -> VulkanResult<Self> {
        let reflected = reflect::descriptor_sets(&[shader.vertex(), shader.fragment()])?;

        let mut set_layouts = Vec::with_capacity(reflected.len());
        for set in reflected {
            match device.create_set_layout(&set.bindings) {
                Ok(raw) => set_layouts.push(Arc::new(SetLayout {
                    set: set.set,
                    bindings: set.bindings,
                    raw,
                })),
                Err(e) => {
                    set_layouts.iter().for_each(|l: &Arc<SetLayout>| device.retire_set_layout(l.raw));
                    return Err(e);
                }
            }
        }

        let raws: Vec<_> = set_layouts.iter().map(|l| l.raw).collect();
        let pipeline_layout = match device.create_pipeline_layout(&raws) {
            Ok(layout) => layout,
            Err(e) => {
                raws.iter().for_each(|&raw| device.retire_set_layout(raw));
                return Err(e);
            }
        };

        let allocators = (0..buffering)
            .map(|_| {
                set_layouts
                    .iter()
                    .map(|layout| DescriptorSetAllocator::new(device.clone(), layout.clone()))
                    .collect()
            })
            .collect();

        log::debug!(
            "Pipeline cache entry for '{}': {} descriptor set(s)",
            shader.id(),
            set_layouts.len()
        );

        Ok(Self {
            device: device.clone(),
            set_layouts,
            pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
            allocators: Mutex::new(allocators),
        })
    }

    /// Layouts ordered by set number
    pub fn set_layouts(&self) -> &[Arc<SetLayout>] {
        &self.set_layouts
    }

    /// Layout shared by every pipeline of the entry
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Render passes this entry has pipelines for
    pub fn pipeline_count(&self) -> usize {
        lock(&self.pipelines).len()
    }

    fn pipeline_for<F>(&self, render_pass: vk::RenderPass, compile: F) -> VulkanResult<vk::Pipeline>
    where
        F: FnOnce() -> VulkanResult<vk::Pipeline>,
    {
        let mut pipelines = lock(&self.pipelines);
        if let Some(&pipeline) = pipelines.get(&render_pass) {
            return Ok(pipeline);
        }
        let pipeline = compile()?;
        pipelines.insert(render_pass, pipeline);
        Ok(pipeline)
    }

    fn acquire_set(&self, slot: usize, set: u32) -> VulkanResult<Arc<DescriptorSet>> {
        let mut allocators = lock(&self.allocators);
        let row = allocators
            .get_mut(slot)
            .ok_or_else(|| VulkanError::usage(format!("frame slot {slot} out of range")))?;
        let count = row.len();
        let allocator = row.get_mut(set as usize).ok_or_else(|| {
            VulkanError::usage(format!("set {set} out of range, shader declares {count} set(s)"))
        })?;
        allocator.acquire()
    }

    fn release_slot(&self, slot: usize) -> usize {
        lock(&self.allocators)
            .get_mut(slot)
            .map_or(0, |row| row.iter_mut().map(DescriptorSetAllocator::release_all).sum())
    }

    fn forget(&self, render_pass: vk::RenderPass) {
        if let Some(pipeline) = lock(&self.pipelines).remove(&render_pass) {
            self.device.retire_pipeline(pipeline);
        }
    }
}

impl<D: PipelineDevice> Drop for PipeEntry<D> {
    fn drop(&mut self) {
        lock(&self.allocators).clear();
        for (_, pipeline) in lock(&self.pipelines).drain() {
            self.device.retire_pipeline(pipeline);
        }
        self.device.retire_pipeline_layout(self.pipeline_layout);
        for layout in &self.set_layouts {
            self.device.retire_set_layout(layout.raw);
        }
    }
}

/// A pipeline ready to bind, with access to this frame's descriptor sets
pub struct Pipe<D: PipelineDevice = Gfx> {
    entry: Arc<PipeEntry<D>>,
    pipeline: vk::Pipeline,
    slot: usize,
}

impl<D: PipelineDevice> Pipe<D> {
    /// Compiled pipeline for the current render pass
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout to bind descriptor sets against
    pub fn layout(&self) -> vk::PipelineLayout {
        self.entry.pipeline_layout
    }

    /// Cache entry the pipeline came from
    pub fn entry(&self) -> &Arc<PipeEntry<D>> {
        &self.entry
    }

    /// Number of descriptor sets, including empty placeholders
    pub fn set_count(&self) -> usize {
        self.entry.set_layouts.len()
    }

    /// Next unused descriptor set for set number `set` in the current frame
    pub fn next_set(&self, set: u32) -> VulkanResult<Arc<DescriptorSet>> {
        self.entry.acquire_set(self.slot, set)
    }
}

#[derive(Default)]
struct InstanceSlot {
    chunks: Vec<Buffer>,
    chunk: usize,
    offset: vk::DeviceSize,
}

/// Per-frame bump allocator for instance matrices
#[derive(Default)]
struct InstanceBuffers {
    slots: Vec<InstanceSlot>,
}

impl InstanceBuffers {
    fn new(buffering: usize) -> Self {
        Self {
            slots: (0..buffering).map(|_| InstanceSlot::default()).collect(),
        }
    }

    fn push<D: PipelineDevice>(
        &mut self,
        device: &D,
        slot: usize,
        bytes: &[u8],
    ) -> VulkanResult<(vk::Buffer, vk::DeviceSize)> {
        let size = bytes.len() as vk::DeviceSize;
        let slot = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| VulkanError::usage(format!("frame slot {slot} out of range")))?;

        loop {
            if let Some(chunk) = slot.chunks.get(slot.chunk) {
                if slot.offset + size <= chunk.size() {
                    let offset = slot.offset;
                    chunk.write(offset, bytes)?;
                    slot.offset = (offset + size).next_multiple_of(16);
                    return Ok((chunk.handle(), offset));
                }
                slot.chunk += 1;
                slot.offset = 0;
            } else {
                let buffer = device.create_instance_buffer(size.max(INSTANCE_CHUNK))?;
                slot.chunks.push(buffer);
            }
        }
    }

    fn reset(&mut self, slot: usize) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.chunk = 0;
            slot.offset = 0;
        }
    }

    fn drain<D: PipelineDevice>(&mut self, device: &D) {
        for slot in &mut self.slots {
            for buffer in slot.chunks.drain(..) {
                device.retire_buffer(buffer);
            }
        }
    }
}

/// The pipeline cache
pub struct Pipes<D: PipelineDevice = Gfx> {
    device: D,
    cache: Mutex<HashMap<PipeKey, Arc<PipeEntry<D>>>>,
    instances: Mutex<InstanceBuffers>,
    slot: AtomicUsize,
    buffering: usize,
    samples: vk::SampleCountFlags,
    sample_shading: bool,
}

impl<D: PipelineDevice> Pipes<D> {
    /// Empty cache for `buffering` frames in flight rendering at `samples`
    pub fn new(device: D, buffering: usize, samples: vk::SampleCountFlags) -> Self {
        let buffering = buffering.max(1);
        let sample_shading = device.sample_shading_supported() && samples != vk::SampleCountFlags::TYPE_1;
        Self {
            device,
            cache: Mutex::new(HashMap::new()),
            instances: Mutex::new(InstanceBuffers::new(buffering)),
            slot: AtomicUsize::new(0),
            buffering,
            samples,
            sample_shading,
        }
    }

    /// Cached pipeline for `render_pass`, populating and compiling on first use
    pub fn get(
        &self,
        render_pass: vk::RenderPass,
        state: RenderState,
        shader: &Arc<ShaderSet>,
    ) -> VulkanResult<Pipe<D>> {
        let key = PipeKey {
            state,
            shader: ShaderKey(shader.clone()),
            layout: VertexLayout::STANDARD,
        };

        let entry = {
            let mut cache = lock(&self.cache);
            match cache.get(&key) {
                Some(entry) => entry.clone(),
                None => {
                    let entry = Arc::new(PipeEntry::populate(&self.device, shader, self.buffering)?);
                    cache.insert(key.clone(), entry.clone());
                    entry
                }
            }
        };

        let pipeline = entry.pipeline_for(render_pass, || {
            self.device.create_graphics_pipeline(&PipelineDesc {
                render_pass,
                layout: entry.pipeline_layout,
                shader,
                vertex_layout: key.layout,
                state,
                samples: self.samples,
                sample_shading: self.sample_shading,
            })
        })?;

        Ok(Pipe {
            entry,
            pipeline,
            slot: self.slot(),
        })
    }

    /// Copy instance matrices into this frame's instance buffers
    ///
    /// Returns the buffer and byte offset to bind at the instance binding.
    pub fn push_instances(&self, instances: &[InstanceData]) -> VulkanResult<(vk::Buffer, vk::DeviceSize)> {
        if instances.is_empty() {
            return Err(VulkanError::usage("draw without instances"));
        }
        lock(&self.instances).push(&self.device, self.slot(), bytemuck::cast_slice(instances))
    }

    /// Recycle the current frame slot's descriptor sets and instance buffers
    /// and move to the next slot
    ///
    /// Call once per presented frame, after submission. Returns how many
    /// descriptor sets were still referenced by callers.
    pub fn rotate(&self) -> usize {
        let slot = self.slot();
        let held = lock(&self.cache)
            .values()
            .map(|entry| entry.release_slot(slot))
            .sum();
        lock(&self.instances).reset(slot);
        self.slot.store((slot + 1) % self.buffering, Ordering::Release);
        held
    }

    /// Retire every pipeline built against `render_pass`
    pub fn forget_render_pass(&self, render_pass: vk::RenderPass) {
        for entry in lock(&self.cache).values() {
            entry.forget(render_pass);
        }
    }

    /// Change the sample count used for pipelines compiled from now on
    ///
    /// Existing pipelines belong to the render pass they were built for and
    /// must be forgotten with that render pass.
    pub fn set_samples(&mut self, samples: vk::SampleCountFlags) {
        self.samples = samples;
        self.sample_shading = self.device.sample_shading_supported() && samples != vk::SampleCountFlags::TYPE_1;
    }

    /// Sample count used for new pipelines
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Current frame slot
    pub fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        lock(&self.cache).len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: PipelineDevice> Drop for Pipes<D> {
    fn drop(&mut self) {
        lock(&self.instances).drain(&self.device);
        lock(&self.cache).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::reflect::tests::{module, Res};
    use crate::render::backends::vulkan::testing::FakeDevice;
    use ash::vk::Handle;
    use rspirv::spirv::ExecutionModel;

    fn shader(vertex: &[(u32, u32, Res)], fragment: &[(u32, u32, Res)]) -> Arc<ShaderSet> {
        Arc::new(ShaderSet::new(
            "test",
            module(ExecutionModel::Vertex, vertex),
            module(ExecutionModel::Fragment, fragment),
        ))
    }

    fn default_shader() -> Arc<ShaderSet> {
        shader(&[(0, 0, Res::Uniform)], &[(1, 0, Res::Uniform), (1, 1, Res::Texture)])
    }

    fn render_pass(n: u64) -> vk::RenderPass {
        vk::RenderPass::from_raw(0x1000 + n)
    }

    #[test]
    fn test_same_key_same_pipeline() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_4);
        let shader = default_shader();

        let a = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
        let b = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();

        assert_eq!(a.pipeline(), b.pipeline());
        assert!(Arc::ptr_eq(a.entry(), b.entry()));
        assert_eq!(device.pipelines_created(), 1);
        assert_eq!(pipes.len(), 1);
    }

    #[test]
    fn test_equal_content_shares_entry() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);

        let a = pipes.get(render_pass(1), RenderState::default(), &default_shader()).unwrap();
        let b = pipes.get(render_pass(1), RenderState::default(), &default_shader()).unwrap();

        assert_eq!(a.pipeline(), b.pipeline());
        assert_eq!(device.pipeline_layouts_created(), 1);
    }

    #[test]
    fn test_render_passes_share_layouts() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_4);
        let shader = default_shader();

        let a = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
        let b = pipes.get(render_pass(2), RenderState::default(), &shader).unwrap();

        assert_ne!(a.pipeline(), b.pipeline());
        assert_eq!(a.layout(), b.layout());
        assert_eq!(device.pipelines_created(), 2);
        assert_eq!(device.set_layouts_created(), 2);
        assert_eq!(a.entry().pipeline_count(), 2);
    }

    #[test]
    fn test_state_is_part_of_key() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
        let shader = default_shader();

        let filled = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
        let wire = pipes.get(render_pass(1), RenderState::wireframe(), &shader).unwrap();

        assert_ne!(filled.pipeline(), wire.pipeline());
        assert_eq!(pipes.len(), 2);
        assert_eq!(device.last_pipeline_state(), Some(RenderState::wireframe()));
    }

    #[test]
    fn test_sparse_sets_keep_numbering() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
        let shader = shader(&[(0, 0, Res::Uniform)], &[(2, 0, Res::Texture)]);

        let pipe = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
        assert_eq!(pipe.set_count(), 3);
        assert!(pipe.entry().set_layouts()[1].is_empty());
        assert_eq!(pipe.entry().set_layouts()[2].set, 2);

        assert!(pipe.next_set(0).is_ok());
        assert!(pipe.next_set(2).is_ok());
        assert!(matches!(pipe.next_set(1), Err(VulkanError::EmptyDescriptorLayout { set: 1 })));
        assert!(matches!(pipe.next_set(7), Err(VulkanError::InvalidUsage { .. })));
    }

    #[test]
    fn test_rotation_recycles_sets_per_slot() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
        let shader = default_shader();

        let first = {
            let pipe = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
            pipe.next_set(0).unwrap().raw()
        };
        assert_eq!(pipes.rotate(), 0);
        assert_eq!(pipes.slot(), 1);

        let second = {
            let pipe = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
            pipe.next_set(0).unwrap().raw()
        };
        assert_ne!(first, second, "frames in flight never share a set");
        pipes.rotate();
        assert_eq!(pipes.slot(), 0);

        let third = {
            let pipe = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap();
            pipe.next_set(0).unwrap().raw()
        };
        assert_eq!(first, third, "slot storage is reused after a full rotation");
    }

    #[test]
    fn test_rotation_reports_held_sets() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
        let pipe = pipes.get(render_pass(1), RenderState::default(), &default_shader()).unwrap();

        let held = pipe.next_set(0).unwrap();
        assert_eq!(pipes.rotate(), 1);
        drop(held);
    }

    #[test]
    fn test_forget_render_pass_retires_pipelines() {
        let device = FakeDevice::default();
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
        let shader = default_shader();

        let old = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap().pipeline();
        pipes.forget_render_pass(render_pass(1));
        assert_eq!(device.pipelines_retired(), 1);

        let new = pipes.get(render_pass(1), RenderState::default(), &shader).unwrap().pipeline();
        assert_ne!(old, new);
        assert_eq!(device.pipelines_created(), 2);
    }

    #[test]
    fn test_drop_retires_everything() {
        let device = FakeDevice::default();
        {
            let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);
            let pipe = pipes.get(render_pass(1), RenderState::default(), &default_shader()).unwrap();
            pipe.next_set(1).unwrap();
        }
        assert_eq!(device.pipelines_retired(), 1);
        assert_eq!(device.pipeline_layouts_retired(), 1);
        assert_eq!(device.set_layouts_retired(), 2);
        assert_eq!(device.pools_retired(), 1);
    }

    #[test]
    fn test_pipeline_failure_is_surfaced() {
        let device = FakeDevice::default();
        device.fail_pipelines(true);
        let pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_1);

        assert!(matches!(
            pipes.get(render_pass(1), RenderState::default(), &default_shader()),
            Err(VulkanError::PipelineCreation(_))
        ));
    }

    #[test]
    fn test_samples_reach_pipeline() {
        let device = FakeDevice::default();
        let mut pipes = Pipes::new(device.clone(), 2, vk::SampleCountFlags::TYPE_4);
        pipes.get(render_pass(1), RenderState::default(), &default_shader()).unwrap();
        assert_eq!(device.last_pipeline_samples(), Some(vk::SampleCountFlags::TYPE_4));

        pipes.set_samples(vk::SampleCountFlags::TYPE_1);
        pipes.get(render_pass(2), RenderState::default(), &default_shader()).unwrap();
        assert_eq!(device.last_pipeline_samples(), Some(vk::SampleCountFlags::TYPE_1));
    }
}
