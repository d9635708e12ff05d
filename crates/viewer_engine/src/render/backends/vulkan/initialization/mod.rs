//! Vulkan initialization: instance, surface, device selection and the
//! shared device context

pub mod context;
pub mod gfx;

pub use context::{VulkanError, VulkanResult};
