//! Renderer facade
//!
//! [`Renderer`] ties the swapchain, render pass, frame ring and pipeline cache
//! into a three-call frame:
//!
//! ```text
//! if renderer.next_frame(extent)? {
//!     let cmd = renderer.command_buffer()?;
//!     let mut pipeline = renderer.bind_pipeline(cmd, RenderState::default(), "default")?;
//!     pipeline.next_set(0)?.write_pod(0, &camera)?;
//!     pipeline.draw(mesh.view(), &[transform])?;
//!     renderer.render()?;
//! }
//! ```
//!
//! A frame waits on its slot's fence, acquires a swapchain image, refreshes
//! the render target and framebuffer, records draws into secondary command
//! buffers, then records the primary, submits, presents and rotates the
//! pipeline cache, the frame ring and the deferred destruction queue.

use std::sync::Arc;

use ash::vk;

use super::initialization::context::{InstanceCore, SurfaceCore};
use super::initialization::gfx::Gfx;
use super::initialization::{VulkanError, VulkanResult};
use super::rendering::pipes::{Pipe, Pipes};
use super::rendering::render_pass::{RenderPass, RenderTarget};
use super::rendering::render_state::RenderState;
use super::rendering::shader::{ShaderDb, ShaderSet};
use super::rendering::vertex_layout::{InstanceData, INSTANCE_BINDING, VERTEX_BINDING};
use super::resources::descriptor_set::{DescriptorSet, Resource};
use super::resources::handle::Sampler;
use super::resources::mesh::MeshView;
use super::resources::texture::create_sampler;
use super::state::frame_ring::FrameRing;
use super::state::swapchain::{validate_present_mode, Swapchain, SwapchainSpec};
use crate::core::config::{sample_count_flags, ColorSpace, PresentMode, RendererConfig};
use crate::foundation::math::Mat4;
use crate::render::window::SurfaceProvider;

/// Shader loaded at startup when present
pub const DEFAULT_SHADER: &str = "default";

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted
    pub frames: u64,
    /// `next_frame` calls that produced nothing to render
    pub skipped: u64,
}

/// Highest sample count in `supported` not above `requested`
pub fn clamp_samples(requested: vk::SampleCountFlags, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| count.as_raw() <= requested.as_raw() && supported.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Group bound descriptor sets into contiguous runs starting at a set number
///
/// Each entry is (layout has no bindings, bound set). Empty layouts break a
/// run and need no set; any other layout without a bound set is an error.
fn descriptor_runs(sets: &[(bool, Option<vk::DescriptorSet>)]) -> VulkanResult<Vec<(u32, Vec<vk::DescriptorSet>)>> {
    let mut runs = Vec::new();
    let mut run: Option<(u32, Vec<vk::DescriptorSet>)> = None;
    for (index, &(empty, bound)) in sets.iter().enumerate() {
        if empty {
            runs.extend(run.take());
            continue;
        }
        let raw = bound.ok_or_else(|| {
            VulkanError::usage(format!("descriptor set {index} was not requested with next_set before draw"))
        })?;
        run.get_or_insert_with(|| (index as u32, Vec::new())).1.push(raw);
    }
    runs.extend(run);
    Ok(runs)
}

fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

struct Recording {
    target: RenderTarget,
    image: u32,
}

/// The rendering core
pub struct Renderer {
    gfx: Gfx,
    config: RendererConfig,
    shaders: ShaderDb,
    sampler: Arc<Sampler>,
    pipes: Pipes,
    frames: FrameRing,
    render_pass: RenderPass,
    swapchain: Swapchain,
    supported_samples: vk::SampleCountFlags,
    samples: vk::SampleCountFlags,
    present_mode: PresentMode,
    color_space: ColorSpace,
    recording: Option<Recording>,
    stats: FrameStats,
}

impl Renderer {
    /// Create the instance, device, swapchain and everything a frame needs
    /// for the window behind `provider`
    pub fn new(provider: &impl SurfaceProvider, config: RendererConfig) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;

        let extensions = provider.required_extensions()?;
        let instance = InstanceCore::new(&config.application_name, &extensions, config.validation_enabled())?;
        let raw_surface = provider.create_surface(&instance.instance)?;
        let surface = SurfaceCore::new(instance, raw_surface);
        let gfx = Gfx::new(&surface, config.buffering)?;

        let limits = gfx.shared().limits;
        let supported_samples = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let requested = config.sample_count().unwrap_or(vk::SampleCountFlags::TYPE_1);
        let samples = clamp_samples(requested, supported_samples);
        if samples != requested {
            log::warn!(
                "{} MSAA samples requested, device supports {}",
                requested.as_raw(),
                samples.as_raw()
            );
        }

        let supported_modes = surface.present_modes(gfx.physical_device())?;
        let present_mode = if validate_present_mode(config.present_mode, &supported_modes).is_ok() {
            config.present_mode
        } else {
            log::warn!("Present mode {:?} unsupported, using FIFO", config.present_mode);
            PresentMode::Fifo
        };
        let color_space = config.color_space;

        let spec = SwapchainSpec {
            extent: provider.framebuffer_extent(),
            present_mode,
            color_space,
        };
        let mut swapchain = Swapchain::new(gfx.clone(), surface, spec);
        swapchain.refresh(spec)?;
        let color_format = swapchain.surface_format(color_space)?;

        let render_pass = RenderPass::new(gfx.clone(), color_format, samples)?;
        let pipes = Pipes::new(gfx.clone(), gfx.buffering(), samples);
        let frames = FrameRing::new(gfx.clone())?;
        let sampler = create_sampler(&gfx)?;

        let mut shaders = ShaderDb::new();
        if let Err(e) = shaders.load(&config.shaders, DEFAULT_SHADER) {
            log::warn!("Default shader not loaded: {e}");
        }

        log::info!(
            "Renderer ready: {} frame(s) in flight, {} sample(s), {:?}",
            gfx.buffering(),
            samples.as_raw(),
            present_mode
        );

        Ok(Self {
            gfx,
            config,
            shaders,
            sampler,
            pipes,
            frames,
            render_pass,
            swapchain,
            supported_samples,
            samples,
            present_mode,
            color_space,
            recording: None,
            stats: FrameStats::default(),
        })
    }

    /// Start a frame for a window of `extent`
    ///
    /// Returns false when there is nothing to render into: a minimized
    /// window, or a swapchain that had to be rebuilt first. Draw only after
    /// `true`, then call [`Renderer::render`].
    pub fn next_frame(&mut self, extent: vk::Extent2D) -> VulkanResult<bool> {
        self.gfx.check_validation()?;
        if self.recording.is_some() {
            log::warn!("next_frame called while a frame is recording");
            return Ok(false);
        }
        if extent.width == 0 || extent.height == 0 {
            self.stats.skipped += 1;
            return Ok(false);
        }

        self.swapchain.request(SwapchainSpec {
            extent,
            present_mode: self.present_mode,
            color_space: self.color_space,
        });
        self.frames.wait()?;

        let acquired = {
            let queue = self.gfx.lock_queue();
            self.swapchain.acquire(&queue, self.frames.current().draw_semaphore())?
        };
        let Some(index) = acquired else {
            self.stats.skipped += 1;
            return Ok(false);
        };

        match self.begin_recording(index) {
            Ok(recording) => {
                self.recording = Some(recording);
                Ok(true)
            }
            Err(e) => {
                self.abandon_frame();
                Err(e)
            }
        }
    }

    fn begin_recording(&mut self, index: u32) -> VulkanResult<Recording> {
        if let Some(old) = self.render_pass.rebuild(self.swapchain.format(), self.samples)? {
            self.pipes.forget_render_pass(old);
            self.pipes.set_samples(self.samples);
            self.frames.invalidate();
        }

        let (image, view) = self
            .swapchain
            .image(index)
            .ok_or_else(|| VulkanError::usage(format!("acquired image {index} not in swapchain")))?;
        let target = self.render_pass.refresh(image, view, self.swapchain.extent())?;
        self.frames.refresh(self.render_pass.raw(), &target)?;
        Ok(Recording { target, image: index })
    }

    /// Give up the acquired image after a failure between acquire and submit
    ///
    /// The slot's semaphore and fence are put back in a usable state and the
    /// swapchain is rebuilt, so the next `next_frame` starts over.
    fn abandon_frame(&mut self) {
        self.recording = None;
        {
            let queue = self.gfx.lock_queue();
            if let Err(e) = self.frames.abandon(&queue) {
                log::error!("Abandoned frame could not be released: {e}");
            }
        }
        self.swapchain.abandon();
        self.stats.skipped += 1;
    }

    /// Give up the frame started by `next_frame` without presenting it
    ///
    /// Returns false when no frame was recording.
    pub fn cancel_frame(&mut self) -> bool {
        if self.recording.is_none() {
            return false;
        }
        self.abandon_frame();
        true
    }

    /// Secondary command buffer draws are recorded into by default
    pub fn command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        self.frame_active()?;
        self.frames.current().secondary()
    }

    /// Begin another secondary command buffer for this frame
    pub fn begin_secondary(&mut self) -> VulkanResult<vk::CommandBuffer> {
        self.frame_active()?;
        self.frames.current_mut().begin_secondary()
    }

    /// Bind the pipeline for `state` and shader `shader_id` on `cmd`
    ///
    /// `cmd` must be one of this frame's secondary command buffers. Viewport,
    /// scissor and line width are set to cover the whole target.
    pub fn bind_pipeline(&self, cmd: vk::CommandBuffer, state: RenderState, shader_id: &str) -> VulkanResult<Pipeline<'_>> {
        let recording = self.frame_active()?;
        let shader = self.shaders.get(shader_id)?;
        if !self.frames.current().open_secondaries().contains(&cmd) {
            return Err(VulkanError::usage("command buffer is not recording in this frame"));
        }

        let pipe = self.pipes.get(self.render_pass.raw(), state, &shader)?;
        let extent = recording.target.extent;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let line_width = if self.gfx.shared().features.wide_lines == vk::TRUE {
            state.line_width
        } else {
            1.0
        };

        let device = self.gfx.device();
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipe.pipeline());
            device.cmd_set_viewport(cmd, 0, &[viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_set_line_width(cmd, line_width);
        }

        Ok(Pipeline {
            gfx: &self.gfx,
            pipes: &self.pipes,
            sets: vec![None; pipe.set_count()],
            pipe,
            cmd,
        })
    }

    /// Record, submit and present the frame started by `next_frame`
    ///
    /// Returns false without a frame in progress, or when the image could
    /// not be presented because the swapchain went out of date.
    pub fn render(&mut self) -> VulkanResult<bool> {
        self.gfx.check_validation()?;
        let Some(recording) = self.recording.take() else {
            return Ok(false);
        };

        if let Err(e) = self.submit(&recording) {
            self.abandon_frame();
            return Err(e);
        }

        let presented = {
            let queue = self.gfx.lock_queue();
            self.swapchain.present(&queue, self.frames.current().present_semaphore())?
        };
        log::trace!("Frame {} image {} presented: {presented}", self.stats.frames, recording.image);

        let held = self.pipes.rotate();
        if held > 0 {
            log::trace!("{held} descriptor set(s) still referenced at rotation");
        }
        self.frames.rotate();
        self.gfx.rotate_deferred();
        self.stats.frames += 1;

        self.gfx.check_validation()?;
        Ok(presented)
    }

    fn submit(&mut self, recording: &Recording) -> VulkanResult<()> {
        let secondaries = self.frames.end_secondaries()?;
        let frame = self.frames.current();
        self.render_pass.execute(
            frame.primary(),
            frame.framebuffer()?,
            &recording.target,
            &secondaries,
            self.config.clear_color,
        )?;

        let queue = self.gfx.lock_queue();
        self.frames.submit(&queue)
    }

    /// Change the present mode; the swapchain is rebuilt at the next frame
    pub fn set_present_mode(&mut self, mode: PresentMode) -> VulkanResult<()> {
        validate_present_mode(mode, &self.swapchain.supported_present_modes()?)?;
        self.present_mode = mode;
        Ok(())
    }

    /// Change the swapchain colour space; applied at the next frame
    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.color_space = color_space;
    }

    /// Change the MSAA sample count, clamped to what the device supports
    ///
    /// The render pass and its pipelines are rebuilt at the next frame.
    /// Returns the sample count that will be used.
    pub fn set_msaa(&mut self, samples: u32) -> VulkanResult<u32> {
        let requested = sample_count_flags(samples)
            .ok_or_else(|| VulkanError::usage(format!("unsupported MSAA sample count {samples}")))?;
        self.samples = clamp_samples(requested, self.supported_samples);
        Ok(self.samples.as_raw())
    }

    /// Make a shader program available to `bind_pipeline`
    pub fn register_shader(&mut self, shader: ShaderSet) -> Arc<ShaderSet> {
        self.shaders.register(shader)
    }

    /// Load the SPIR-V pair `id` from the configured shader directories
    pub fn load_shader(&mut self, id: &str) -> VulkanResult<Arc<ShaderSet>> {
        self.shaders.load(&self.config.shaders, id)
    }

    /// Loaded shader sets
    pub fn shaders(&self) -> &ShaderDb {
        &self.shaders
    }

    /// Device bundle shared with resources
    pub fn gfx(&self) -> &Gfx {
        &self.gfx
    }

    /// Linear sampler shared by textures
    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    /// Counters for presented and skipped frames
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Requested presentation mode
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Requested output color space
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Sample count the next frame renders with
    pub fn msaa_samples(&self) -> u32 {
        self.samples.as_raw()
    }

    /// Extent of the current swapchain
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Swapchain rebuild counter
    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain.generation()
    }

    /// True between `next_frame` and `render`
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Block until the GPU is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.gfx.device().device_wait_idle().map_err(VulkanError::Api) }
    }

    fn frame_active(&self) -> VulkanResult<&Recording> {
        self.recording
            .as_ref()
            .ok_or_else(|| VulkanError::usage("no frame in progress, call next_frame first"))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Device wait failed during shutdown: {e}");
        }
        self.recording = None;
        self.gfx.flush_deferred();
        log::debug!("Renderer dropped after {} frame(s)", self.stats.frames);
    }
}

/// A bound pipeline recording into one command buffer
pub struct Pipeline<'r> {
    gfx: &'r Gfx,
    pipes: &'r Pipes,
    pipe: Pipe,
    cmd: vk::CommandBuffer,
    sets: Vec<Option<Arc<DescriptorSet>>>,
}

impl<'r> Pipeline<'r> {
    /// Fresh descriptor set `set` for the following draws
    ///
    /// Sets are pooled per frame slot, so the returned set is only valid
    /// for this frame.
    pub fn next_set(&mut self, set: u32) -> VulkanResult<BoundSet<'r>> {
        let slot = self
            .sets
            .get_mut(set as usize)
            .ok_or_else(|| VulkanError::usage(format!("pipeline has no descriptor set {set}")))?;
        let descriptor = self.pipe.next_set(set)?;
        *slot = Some(descriptor.clone());
        Ok(BoundSet {
            gfx: self.gfx,
            set: descriptor,
        })
    }

    /// Draw `mesh` once per transform in `instances`
    ///
    /// An empty mesh or an empty instance list records nothing.
    /// Otherwise every non-empty descriptor set of the pipeline must have been
    /// requested with [`Pipeline::next_set`].
    pub fn draw(&mut self, mesh: MeshView, instances: &[Mat4]) -> VulkanResult<()> {
        if mesh.count == 0 || instances.is_empty() {
            return Ok(());
        }

        let layouts = self.pipe.entry().set_layouts();
        let bound: Vec<_> = layouts
            .iter()
            .zip(&self.sets)
            .map(|(layout, set)| (layout.is_empty(), set.as_ref().map(|set| set.raw())))
            .collect();
        let runs = descriptor_runs(&bound)?;

        let transforms: Vec<InstanceData> = instances.iter().map(|m| (*m).into()).collect();
        let (instance_buffer, instance_offset) = self.pipes.push_instances(&transforms)?;

        let device = self.gfx.device();
        let cmd = self.cmd;
        unsafe {
            for (first, sets) in &runs {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipe.layout(),
                    *first,
                    sets,
                    &[],
                );
            }

            debug_assert_eq!(INSTANCE_BINDING, VERTEX_BINDING + 1);
            device.cmd_bind_vertex_buffers(
                cmd,
                VERTEX_BINDING,
                &[mesh.vertex_buffer, instance_buffer],
                &[0, instance_offset],
            );

            let instance_count = transforms.len() as u32;
            match mesh.index_buffer {
                Some(index_buffer) => {
                    device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(cmd, mesh.count, instance_count, mesh.first, 0, 0);
                }
                None => device.cmd_draw(cmd, mesh.count, instance_count, mesh.first, 0),
            }
        }
        Ok(())
    }

    /// Secondary command buffer recording this pipeline's draws
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Layout the pipeline's descriptor sets bind against
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipe.layout()
    }
}

/// A descriptor set acquired for the current frame
pub struct BoundSet<'r> {
    gfx: &'r Gfx,
    set: Arc<DescriptorSet>,
}

impl BoundSet<'_> {
    /// Point `binding` at a texture or buffer
    pub fn update(&self, binding: u32, resource: Resource<'_>) -> VulkanResult<&Self> {
        self.set.update(self.gfx, binding, resource)?;
        Ok(self)
    }

    /// Copy `bytes` into the uniform buffer behind `binding`
    pub fn write(&self, binding: u32, bytes: &[u8]) -> VulkanResult<&Self> {
        self.set.write(self.gfx, binding, bytes)?;
        Ok(self)
    }

    /// Write a plain-old-data value to the uniform behind `binding`
    pub fn write_pod<T: bytemuck::Pod>(&self, binding: u32, value: &T) -> VulkanResult<&Self> {
        self.write(binding, bytemuck::bytes_of(value))
    }

    /// Raw descriptor set handle
    pub fn raw(&self) -> vk::DescriptorSet {
        self.set.raw()
    }

    /// Set number in the pipeline layout
    pub fn set_number(&self) -> u32 {
        self.set.set_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_clamp_samples_to_supported() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(clamp_samples(vk::SampleCountFlags::TYPE_4, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_samples(vk::SampleCountFlags::TYPE_8, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_samples(vk::SampleCountFlags::TYPE_2, supported), vk::SampleCountFlags::TYPE_2);
    }

    #[test]
    fn test_clamp_samples_falls_back_to_one() {
        assert_eq!(
            clamp_samples(vk::SampleCountFlags::TYPE_8, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            clamp_samples(vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_clamp_skips_unsupported_gaps() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_8;
        assert_eq!(clamp_samples(vk::SampleCountFlags::TYPE_4, supported), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_descriptor_runs_contiguous() {
        let a = vk::DescriptorSet::from_raw(1);
        let b = vk::DescriptorSet::from_raw(2);
        let runs = descriptor_runs(&[(false, Some(a)), (false, Some(b))]).unwrap();
        assert_eq!(runs, vec![(0, vec![a, b])]);
    }

    #[test]
    fn test_descriptor_runs_split_at_empty_sets() {
        let a = vk::DescriptorSet::from_raw(1);
        let c = vk::DescriptorSet::from_raw(3);
        let runs = descriptor_runs(&[(false, Some(a)), (true, None), (false, Some(c))]).unwrap();
        assert_eq!(runs, vec![(0, vec![a]), (2, vec![c])]);

        let leading = descriptor_runs(&[(true, None), (false, Some(c))]).unwrap();
        assert_eq!(leading, vec![(1, vec![c])]);
    }

    #[test]
    fn test_descriptor_runs_require_bound_sets() {
        let a = vk::DescriptorSet::from_raw(1);
        let result = descriptor_runs(&[(false, Some(a)), (false, None)]);
        assert!(matches!(result, Err(VulkanError::InvalidUsage { .. })));
    }

    #[test]
    fn test_no_sets_no_runs() {
        assert!(descriptor_runs(&[]).unwrap().is_empty());
        assert!(descriptor_runs(&[(true, None), (true, None)]).unwrap().is_empty());
    }

    #[test]
    fn test_viewport_covers_extent() {
        let vp = viewport(vk::Extent2D { width: 640, height: 480 });
        assert_eq!((vp.width, vp.height), (640.0, 480.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
    }
}
