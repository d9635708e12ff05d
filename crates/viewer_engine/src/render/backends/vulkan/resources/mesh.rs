//! Immutable meshes in device-local memory

use std::mem::size_of;

use ash::vk;

use super::buffer::Buffer;
use super::defer::Deferred;
use crate::render::backends::vulkan::initialization::gfx::Gfx;
use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::rendering::vertex_layout::Vertex;

/// Vertex and optional 32-bit index buffers uploaded once
///
/// Dropping a mesh retires its buffers, so it may be dropped while a
/// submitted frame still draws it.
pub struct StaticMesh {
    vertices: Deferred<Buffer>,
    indices: Option<Deferred<Buffer>>,
    vertex_count: u32,
    index_count: u32,
}

impl StaticMesh {
    /// Upload vertices and, when non-empty, indices
    pub fn new(gfx: &Gfx, vertices: &[Vertex], indices: &[u32]) -> VulkanResult<Self> {
        Self::from_bytes(gfx, bytemuck::cast_slice(vertices), bytemuck::cast_slice(indices))
    }

    /// Upload raw interleaved vertex bytes and little-endian u32 index bytes
    pub fn from_bytes(gfx: &Gfx, vertex_bytes: &[u8], index_bytes: &[u8]) -> VulkanResult<Self> {
        let (vertex_count, index_count) = element_counts(vertex_bytes.len(), index_bytes.len())?;

        let vertices = gfx.defer(Buffer::upload(gfx, vertex_bytes, vk::BufferUsageFlags::VERTEX_BUFFER)?);
        let indices = if index_count > 0 {
            Some(gfx.defer(Buffer::upload(gfx, index_bytes, vk::BufferUsageFlags::INDEX_BUFFER)?))
        } else {
            None
        };

        Ok(Self {
            vertices,
            indices,
            vertex_count,
            index_count,
        })
    }

    /// Vertices uploaded
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Indices uploaded; zero for a non-indexed mesh
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Draw the whole mesh
    pub fn view(&self) -> MeshView {
        let count = if self.indices.is_some() { self.index_count } else { self.vertex_count };
        MeshView {
            vertex_buffer: self.vertices.handle(),
            index_buffer: self.indices.as_ref().map(|indices| indices.handle()),
            first: 0,
            count,
        }
    }

    /// Draw `count` indices (or vertices) starting at `first`
    pub fn range(&self, first: u32, count: u32) -> VulkanResult<MeshView> {
        let full = self.view();
        if first.checked_add(count).map_or(true, |end| end > full.count) {
            return Err(VulkanError::usage(format!(
                "mesh range {first}+{count} exceeds {} elements",
                full.count
            )));
        }
        Ok(MeshView { first, count, ..full })
    }
}

/// Borrow-free description of what a draw call reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshView {
    /// Interleaved vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// 32-bit index buffer; `None` draws vertices in order
    pub index_buffer: Option<vk::Buffer>,
    /// First index (or vertex)
    pub first: u32,
    /// Indices (or vertices) drawn
    pub count: u32,
}

fn element_counts(vertex_bytes: usize, index_bytes: usize) -> VulkanResult<(u32, u32)> {
    let stride = size_of::<Vertex>();
    if vertex_bytes == 0 || vertex_bytes % stride != 0 {
        return Err(VulkanError::usage(format!(
            "vertex data of {vertex_bytes} bytes is not a non-empty multiple of {stride}"
        )));
    }
    if index_bytes % size_of::<u32>() != 0 {
        return Err(VulkanError::usage(format!("index data of {index_bytes} bytes is not a multiple of 4")));
    }
    Ok(((vertex_bytes / stride) as u32, (index_bytes / size_of::<u32>()) as u32))
}
