//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules,
//! coordinated by the [`Renderer`] facade.

/// Vulkan initialization types (instance, surface, device)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors)
pub mod resources;

/// Vulkan rendering operations (shaders, pipelines, render passes)
pub mod rendering;

/// Vulkan state management (swapchain, frames in flight, sync)
pub mod state;

/// Renderer facade
pub mod renderer;

#[cfg(test)]
pub mod testing;

pub use renderer::{BoundSet, FrameStats, Pipeline, Renderer, DEFAULT_SHADER};

pub use initialization::context::{InstanceCore, SurfaceCore};
pub use initialization::gfx::Gfx;
pub use initialization::{VulkanError, VulkanResult};

pub use resources::buffer::{Buffer, MemoryLocation};
pub use resources::descriptor_set::Resource;
pub use resources::mesh::{MeshView, StaticMesh};
pub use resources::texture::Texture;

pub use rendering::render_state::RenderState;
pub use rendering::shader::ShaderSet;
pub use rendering::vertex_layout::Vertex;
