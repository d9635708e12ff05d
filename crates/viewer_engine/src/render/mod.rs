//! # Rendering
//!
//! The Vulkan rendering core and the window it presents to.
//!
//! - **Renderer**: frame facade over the swapchain, render pass, frame ring
//!   and pipeline cache
//! - **Platform**: GLFW window providing the presentation surface

/// Graphics backend implementations
pub mod backends;

/// Window platform
pub mod window;

pub use backends::vulkan::{
    BoundSet, FrameStats, Pipeline, RenderState, Renderer, Resource, ShaderSet, StaticMesh, Texture, Vertex,
    VulkanError, VulkanResult,
};
pub use window::{Platform, SurfaceProvider, WindowDesc, WindowError, WindowState};
