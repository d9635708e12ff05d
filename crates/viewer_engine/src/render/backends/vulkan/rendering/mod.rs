//! Pipelines, shaders and the render pass

pub mod pipes;
pub mod reflect;
pub mod render_pass;
pub mod render_state;
pub mod shader;
pub mod vertex_layout;
