//! Fixed-function state selected per draw

use std::hash::{Hash, Hasher};

use ash::vk;

/// Rasterization state that is baked into a pipeline
#[derive(Debug, Clone, Copy)]
pub struct RenderState {
    /// Fill or line rasterization
    pub polygon_mode: vk::PolygonMode,
    /// Primitive assembly
    pub topology: vk::PrimitiveTopology,
    /// Test and write depth when the pass has a depth buffer
    pub depth_test: bool,
    /// Only used as the pipeline's static value; the draw sets it dynamically
    pub line_width: f32,
}

impl RenderState {
    /// Default state with polygons drawn as lines
    pub fn wireframe() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::LINE,
            ..Self::default()
        }
    }

    /// Replace the primitive topology
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Enable or disable the depth test
    pub fn with_depth_test(mut self, enabled: bool) -> Self {
        self.depth_test = enabled;
        self
    }

    /// Line width for line topologies and wireframe
    pub fn with_line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            depth_test: true,
            line_width: 1.0,
        }
    }
}

// line width compares by bit pattern so the state can key a hash map
impl PartialEq for RenderState {
    fn eq(&self, other: &Self) -> bool {
        self.polygon_mode == other.polygon_mode
            && self.topology == other.topology
            && self.depth_test == other.depth_test
            && self.line_width.to_bits() == other.line_width.to_bits()
    }
}

impl Eq for RenderState {}

impl Hash for RenderState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.polygon_mode.hash(state);
        self.topology.hash(state);
        self.depth_test.hash(state);
        self.line_width.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equal_states_collapse() {
        let mut set = HashSet::new();
        set.insert(RenderState::default());
        set.insert(RenderState::default().with_line_width(1.0));
        set.insert(RenderState::wireframe());
        set.insert(RenderState::default().with_line_width(2.0));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_default_is_filled_triangles() {
        let state = RenderState::default();
        assert_eq!(state.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert!(state.depth_test);
    }
}
