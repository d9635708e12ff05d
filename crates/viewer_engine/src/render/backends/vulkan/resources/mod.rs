//! GPU resources and their lifetimes

/// GPU buffers with VMA-backed memory
pub mod buffer;

/// Deferred destruction of retired resources
pub mod defer;

/// Descriptor set pooling and updates
pub mod descriptor_set;

/// Owned device handles
pub mod handle;

/// Images and image views
pub mod image;

/// Static vertex/index meshes
pub mod mesh;

/// Sampled textures
pub mod texture;
