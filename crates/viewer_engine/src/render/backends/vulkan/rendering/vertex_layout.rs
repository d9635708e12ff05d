//! Vertex input layouts
//!
//! Every pipeline reads interleaved [`Vertex`] data from binding 0 and one
//! column-major model matrix per instance from binding 1.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Interleaved vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], color: [f32; 4], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, normal, uv }
    }
}

/// Per-instance data: a model matrix, column-major
pub type InstanceData = [[f32; 4]; 4];

/// Binding of the per-vertex stream
pub const VERTEX_BINDING: u32 = 0;
/// Binding of the per-instance stream
pub const INSTANCE_BINDING: u32 = 1;
/// First location of the instance matrix columns
pub const INSTANCE_LOCATION: u32 = 4;

/// Identity of a vertex input layout, part of the pipeline cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    name: &'static str,
}

impl VertexLayout {
    /// Interleaved [`Vertex`] plus instance matrices
    pub const STANDARD: Self = Self { name: "standard" };

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Vertex input binding descriptions
    pub fn bindings(&self) -> [vk::VertexInputBindingDescription; 2] {
        [
            vk::VertexInputBindingDescription {
                binding: VERTEX_BINDING,
                stride: size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: INSTANCE_BINDING,
                stride: size_of::<InstanceData>() as u32,
                input_rate: vk::VertexInputRate::INSTANCE,
            },
        ]
    }

    /// Vertex input attribute descriptions
    pub fn attributes(&self) -> [vk::VertexInputAttributeDescription; 8] {
        let vertex = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            binding: VERTEX_BINDING,
            location,
            format,
            offset: offset as u32,
        };
        let column = |index: u32| vk::VertexInputAttributeDescription {
            binding: INSTANCE_BINDING,
            location: INSTANCE_LOCATION + index,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: index * size_of::<[f32; 4]>() as u32,
        };

        [
            vertex(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            vertex(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, color)),
            vertex(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            vertex(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
            column(0),
            column(1),
            column(2),
            column(3),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 48);
        let attributes = VertexLayout::STANDARD.attributes();
        let offsets: Vec<u32> = attributes[..4].iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 28, 40]);
    }

    #[test]
    fn test_instance_columns_follow_vertex_locations() {
        let attributes = VertexLayout::STANDARD.attributes();
        for (index, attribute) in attributes[4..].iter().enumerate() {
            assert_eq!(attribute.binding, INSTANCE_BINDING);
            assert_eq!(attribute.location, INSTANCE_LOCATION + index as u32);
            assert_eq!(attribute.offset, index as u32 * 16);
        }
        assert_eq!(VertexLayout::STANDARD.bindings()[1].stride, 64);
    }
}
