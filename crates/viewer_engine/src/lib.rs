//! # Viewer Engine
//!
//! Vulkan rendering core for a real-time 3D scene viewer.
//!
//! ## Features
//!
//! - **Frame facade**: `next_frame` / `bind_pipeline` / `render`
//! - **Swapchain management**: resize, present mode and colour space changes
//!   rebuild lazily at the next frame
//! - **Pipeline cache**: pipelines and descriptor layouts derived from SPIR-V
//!   reflection, keyed by render state and shader
//! - **Deferred destruction**: replaced resources live until the GPU can no
//!   longer reference them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use viewer_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     viewer_engine::foundation::logging::init();
//!     let mut platform = Platform::new(&WindowDesc::new("viewer", 1280, 720))?;
//!     let mut renderer = Renderer::new(&platform, RendererConfig::default())?;
//!
//!     while !platform.should_close() {
//!         platform.poll();
//!         if renderer.next_frame(platform.state().framebuffer)? {
//!             // bind pipelines and draw
//!             renderer.render()?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Raw Vulkan types used in the public API
pub use ash::vk;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        core::config::{ColorSpace, Config, PresentMode, RendererConfig, ShaderConfig},
        foundation::math::{Mat4, Vec3, Vec4},
        render::{
            BoundSet, FrameStats, Pipeline, Platform, RenderState, Renderer, Resource, ShaderSet, StaticMesh,
            SurfaceProvider, Texture, Vertex, VulkanError, VulkanResult, WindowDesc,
        },
    };
}
